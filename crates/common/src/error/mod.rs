//! Shared error vocabulary
//!
//! [`CommonError`] holds the failures several crates raise the same way
//! (bad configuration, data that does not decode). Module errors embed it as
//! a `Common` variant and expose a uniform [`ErrorClassification`], which
//! retry subscribers and the log plugin consult instead of matching on
//! concrete types.
//!
//! ```rust,ignore
//! #[derive(Debug, Error)]
//! pub enum CatalogError {
//!     #[error("operation '{0}' is described more than once")]
//!     DuplicateOperation(String),
//!
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//! }
//!
//! impl_error_classification!(CatalogError, Common,
//!     Self::DuplicateOperation(_) => {
//!         retryable: false,
//!         severity: ErrorSeverity::Error,
//!         critical: false,
//!     }
//! );
//! ```

use std::fmt;
use std::time::Duration;

pub type CommonResult<T> = Result<T, CommonError>;

/// Failures shared across crates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// A setting is missing or unusable
    Config { message: String, field: Option<String> },

    /// Data could not be encoded or decoded
    Serialization { message: String, format: Option<String> },
}

impl CommonError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), field: None }
    }

    /// Configuration error pinned to one setting
    pub fn config_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), format: None }
    }

    /// Serialization error for a named format (`JSON`, `TOML`)
    pub fn serialization_format(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message, field: Some(field) } => {
                write!(f, "Configuration error in field '{field}': {message}")
            }
            Self::Config { message, field: None } => write!(f, "Configuration error: {message}"),
            Self::Serialization { message, format: Some(format) } => {
                write!(f, "Serialization error ({format}): {message}")
            }
            Self::Serialization { message, format: None } => write!(f, "Serialization error: {message}"),
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Error
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_format("JSON", err.to_string())
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization_format("TOML", err.to_string())
    }
}

/// Uniform questions asked of any error
pub trait ErrorClassification {
    /// Whether sending again may succeed (timeouts, dropped connections,
    /// 5xx responses)
    fn is_retryable(&self) -> bool;

    fn severity(&self) -> ErrorSeverity;

    /// Whether an invariant was broken
    fn is_critical(&self) -> bool;

    /// Delay the failure itself asks for, e.g. from `Retry-After`
    fn retry_after(&self) -> Option<Duration>;
}

/// How loudly a failure should be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        })
    }
}

/// Implement [`ErrorClassification`] for an error that embeds a
/// [`CommonError`]
///
/// The `$common_variant` arm delegates; every listed pattern maps to the
/// given expressions. `retry_after` defaults to `None` for patterns that do
/// not name one.
#[macro_export]
macro_rules! impl_error_classification {
    (
        $error_type:ty,
        $common_variant:ident
        $(,
            $variant:pat => {
                retryable: $retryable:expr,
                severity: $severity:expr,
                critical: $critical:expr
                $(, retry_after: $retry_after:expr)?
                $(,)?
            }
        )*
        $(,)?
    ) => {
        impl $crate::error::ErrorClassification for $error_type {
            fn is_retryable(&self) -> bool {
                match self {
                    Self::$common_variant(e) => e.is_retryable(),
                    $($variant => $retryable,)*
                }
            }

            fn severity(&self) -> $crate::error::ErrorSeverity {
                match self {
                    Self::$common_variant(e) => e.severity(),
                    $($variant => $severity,)*
                }
            }

            fn is_critical(&self) -> bool {
                match self {
                    Self::$common_variant(e) => e.is_critical(),
                    $($variant => $critical,)*
                }
            }

            fn retry_after(&self) -> Option<std::time::Duration> {
                match self {
                    Self::$common_variant(e) => e.retry_after(),
                    $($($variant => $retry_after,)?)*
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_its_field() {
        let err = CommonError::config_field("base_url", "must not be empty");
        assert_eq!(err.to_string(), "Configuration error in field 'base_url': must not be empty");
        assert_eq!(CommonError::config("no base URL").to_string(), "Configuration error: no base URL");
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Error);
    }

    #[test]
    fn decode_failures_record_their_format() {
        let json = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid JSON");
        let err = CommonError::from(json);
        assert!(matches!(&err, CommonError::Serialization { format: Some(f), .. } if f == "JSON"));
        assert!(err.to_string().starts_with("Serialization error (JSON)"));

        let toml = toml::from_str::<toml::Value>("key = ").expect_err("invalid TOML");
        assert!(matches!(CommonError::from(toml), CommonError::Serialization { format: Some(f), .. } if f == "TOML"));
    }

    #[test]
    fn severity_orders_and_prints() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARN");
    }
}
