//! Error types for command dispatch
//!
//! Each failure class has its own type so callers can always tell a bad
//! argument from a failed transport from a response that did not match its
//! model:
//!
//! - [`ParameterError`] / [`BuildError`]: raised while preparing, before any
//!   network activity
//! - [`TransportError`]: raised by a [`Transport`](crate::ports::Transport)
//! - [`ResponseError`]: the response did not match the declared model
//! - [`CommandError`]: what `Command::execute` returns, wrapping the above

use std::fmt;
use std::time::Duration;

use courier_common::error::{CommonError, ErrorClassification, ErrorSeverity};
use courier_common::impl_error_classification;
use courier_domain::{
    impl_domain_status_conversions, CourierError, HttpMethod, Location, ParamType, Request,
    RequestId, Response,
};
use thiserror::Error;

use crate::command::CommandState;

/// Argument validation and filtering failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("operation '{operation}' is missing required parameter '{name}'")]
    MissingParameter { operation: String, name: String },

    #[error("operation '{operation}' does not accept parameter '{name}'")]
    UnknownParameter { operation: String, name: String },

    #[error("parameter '{name}' must be of type {expected}, got {actual}")]
    InvalidType { name: String, expected: ParamType, actual: String },

    #[error("parameter '{name}' is invalid: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("parameter '{name}' uses unknown filter '{filter}'")]
    UnknownFilter { name: String, filter: String },

    #[error("filter '{filter}' failed on parameter '{name}': {reason}")]
    FilterFailed { name: String, filter: String, reason: String },

    #[error("parameters are frozen; cannot set '{name}'")]
    Frozen { name: String },
}

impl ParameterError {
    /// Parameter the error refers to
    pub fn parameter(&self) -> &str {
        match self {
            Self::MissingParameter { name, .. }
            | Self::UnknownParameter { name, .. }
            | Self::InvalidType { name, .. }
            | Self::InvalidValue { name, .. }
            | Self::UnknownFilter { name, .. }
            | Self::FilterFailed { name, .. }
            | Self::Frozen { name } => name,
        }
    }
}

/// Request construction failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("operation '{operation}' sends parameter '{parameter}' in the body, but {method} requests carry no body")]
    BodyNotAllowed { operation: String, parameter: String, method: HttpMethod },

    #[error("operation '{operation}' mixes {first} and {second} body parameters")]
    ConflictingBody { operation: String, first: Location, second: Location },

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to serialize {format} body for '{operation}': {message}")]
    Serialization { operation: String, format: &'static str, message: String },
}

/// Broad category of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Dns,
    Tls,
    Io,
    /// The server answered with a non-success status
    Status,
    Cancelled,
    Other,
}

impl_domain_status_conversions!(TransportErrorKind {
    Connect => "connect",
    Timeout => "timeout",
    Dns => "dns",
    Tls => "tls",
    Io => "io",
    Status => "status",
    Cancelled => "cancelled",
    Other => "other",
});

/// Failure reported by a transport
///
/// Carries whatever request/response context was available when the
/// failure happened.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub request_id: Option<RequestId>,
    pub response: Option<Box<Response>>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), status: None, request_id: None, response: None }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(TransportErrorKind::Cancelled, "request cancelled")
    }

    /// A non-success response, kept on the error
    pub fn from_status(response: Response) -> Self {
        let message = if response.reason.is_empty() {
            format!("unsuccessful response status {}", response.status)
        } else {
            format!("unsuccessful response status {} {}", response.status, response.reason)
        };
        Self {
            kind: TransportErrorKind::Status,
            message,
            status: Some(response.status),
            request_id: None,
            response: Some(Box::new(response)),
        }
    }

    #[must_use]
    pub fn with_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_deref()
    }
}

impl ErrorClassification for TransportError {
    fn is_retryable(&self) -> bool {
        match self.kind {
            TransportErrorKind::Connect
            | TransportErrorKind::Timeout
            | TransportErrorKind::Dns
            | TransportErrorKind::Io => true,
            TransportErrorKind::Status => {
                matches!(self.status, Some(status) if status >= 500 || status == 429)
            }
            TransportErrorKind::Tls | TransportErrorKind::Cancelled | TransportErrorKind::Other => {
                false
            }
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self.kind {
            TransportErrorKind::Cancelled => ErrorSeverity::Info,
            _ if self.is_retryable() => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        self.response()
            .and_then(|r| r.headers.get("Retry-After"))
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// Pass 2xx responses through; turn anything else into a `Status` error
///
/// # Errors
/// Returns a `TransportError` of kind `Status` carrying the response.
pub fn ensure_success(request: &Request, response: Response) -> Result<Response, TransportError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(TransportError::from_status(response).with_request(request.id))
    }
}

/// The response did not match the operation's declared result shape
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("response to '{operation}' is not valid JSON: {message}")]
    InvalidJson { operation: String, message: String },

    #[error("response to '{operation}' is not valid XML: {message}")]
    InvalidXml { operation: String, message: String },

    #[error("model '{model}' requires property '{property}', which the response lacks")]
    MissingProperty { model: String, property: String },

    #[error("property '{property}' of model '{model}' must be of type {expected}, got {actual}")]
    TypeMismatch { model: String, property: String, expected: ParamType, actual: String },

    #[error("filter '{filter}' failed on property '{property}': {reason}")]
    FilterFailed { property: String, filter: String, reason: String },

    #[error("response model '{0}' is not described")]
    UnknownModel(String),
}

/// Response processing errors, by their long name
pub type ResponseProcessingError = ResponseError;

/// An event handler failed; dispatch stopped at that handler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler for '{event}' failed: {message}")]
pub struct EventError {
    pub event: String,
    pub message: String,
}

impl EventError {
    /// Handler-side constructor; the mediator fills in the event name
    pub fn new(message: impl Into<String>) -> Self {
        Self { event: String::new(), message: message.into() }
    }

    #[must_use]
    pub fn in_event(mut self, event: &str) -> Self {
        if self.event.is_empty() {
            self.event = event.to_string();
        }
        self
    }
}

/// Errors returned by `Command`
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    #[error("invalid arguments for '{operation}': {}", ValidationList(.errors))]
    Validation { operation: String, errors: Vec<ParameterError> },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("command '{operation}' failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Response(#[from] ResponseError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("command '{operation}' is {state}; {action} needs it {expected}")]
    InvalidState {
        operation: String,
        state: CommandState,
        action: &'static str,
        expected: CommandState,
    },
}

impl CommandError {
    /// Whether the arguments were rejected before any request existed
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn parameter_errors(&self) -> &[ParameterError] {
        match self {
            Self::Validation { errors, .. } => errors,
            _ => &[],
        }
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Transport { source, .. } => Some(source),
            _ => None,
        }
    }
}

struct ValidationList<'a>(&'a [ParameterError]);

impl fmt::Display for ValidationList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl ErrorClassification for CommandError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Transport { source, .. } => source.severity(),
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transport { source, .. } => source.retry_after(),
            _ => None,
        }
    }
}

/// Structural problems in a service description
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("operation '{0}' is described more than once")]
    DuplicateOperation(String),

    #[error("model '{0}' is described more than once")]
    DuplicateModel(String),

    #[error("parameter '{parameter}' of '{operation}' is declared more than once")]
    DuplicateParameter { operation: String, parameter: String },

    #[error("parameter '{parameter}' of '{operation}' has no location")]
    MissingLocation { operation: String, parameter: String },

    #[error("operation '{operation}' references unknown model '{model}'")]
    UnknownModel { operation: String, model: String },

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl_error_classification!(CatalogError, Common,
    Self::DuplicateOperation(_)
    | Self::DuplicateModel(_)
    | Self::DuplicateParameter { .. }
    | Self::MissingLocation { .. }
    | Self::UnknownModel { .. } => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    }
);

/// Errors surfaced by `ServiceClient`
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("command not found: '{0}'")]
    CommandNotFound(String),

    #[error("operation '{0}' is not paginated")]
    NotPaginated(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl_error_classification!(ClientError, Common,
    Self::CommandNotFound(_) | Self::NotPaginated(_) => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::Command(e) => {
        retryable: e.is_retryable(),
        severity: e.severity(),
        critical: e.is_critical(),
        retry_after: e.retry_after(),
    },
    Self::Catalog(e) => {
        retryable: e.is_retryable(),
        severity: e.severity(),
        critical: e.is_critical(),
    }
);

impl From<ClientError> for CourierError {
    fn from(err: ClientError) -> Self {
        let message = err.to_string();
        match err {
            ClientError::CommandNotFound(_) => Self::NotFound(message),
            ClientError::NotPaginated(_) => Self::InvalidInput(message),
            ClientError::Catalog(_) => Self::Config(message),
            ClientError::Command(CommandError::Validation { .. } | CommandError::Build(_)) => {
                Self::InvalidInput(message)
            }
            ClientError::Command(CommandError::Transport { .. }) => Self::Network(message),
            ClientError::Command(CommandError::Response(_)) => Self::Serialization(message),
            ClientError::Common(CommonError::Config { .. }) => Self::Config(message),
            ClientError::Common(CommonError::Serialization { .. }) => Self::Serialization(message),
            ClientError::Command(_) => Self::Internal(message),
        }
    }
}
