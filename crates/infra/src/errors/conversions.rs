//! Conversions from external infrastructure errors into courier errors.

use courier_core::errors::{TransportError, TransportErrorKind};
use courier_domain::CourierError;
use reqwest::Error as HttpError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub CourierError);

impl From<InfraError> for CourierError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<CourierError> for InfraError {
    fn from(value: CourierError) -> Self {
        InfraError(value)
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → TransportError */
/* -------------------------------------------------------------------------- */

/// Classify a reqwest failure
///
/// reqwest does not expose DNS or TLS failures as distinct kinds, so they
/// are recognised from the error chain.
pub fn transport_error(err: &HttpError) -> TransportError {
    let kind = transport_kind(err);
    let mut error = TransportError::new(kind, error_chain(err));
    error.status = err.status().map(|status| status.as_u16());
    error
}

fn transport_kind(err: &HttpError) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }
    if err.is_status() {
        return TransportErrorKind::Status;
    }

    let chain = error_chain(err).to_ascii_lowercase();
    if chain.contains("dns") || chain.contains("failed to lookup address") {
        return TransportErrorKind::Dns;
    }
    if chain.contains("certificate") || chain.contains("tls") || chain.contains("handshake") {
        return TransportErrorKind::Tls;
    }

    #[cfg(not(target_arch = "wasm32"))]
    if err.is_connect() {
        return TransportErrorKind::Connect;
    }

    if err.is_body() || err.is_decode() {
        TransportErrorKind::Io
    } else if err.is_request() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    }
}

/// `err` and every source below it, joined with `: `
fn error_chain(err: &HttpError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → CourierError */
/* -------------------------------------------------------------------------- */

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        if value.is_builder() {
            return InfraError(CourierError::Config(format!("invalid HTTP client setup: {value}")));
        }
        if let Some(status) = value.status() {
            let code = status.as_u16();
            let message = format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));
            return InfraError(match code {
                404 => CourierError::NotFound(message),
                400..=499 => CourierError::InvalidInput(message),
                _ => CourierError::Network(message),
            });
        }
        InfraError(CourierError::Network(transport_error(&value).to_string()))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
