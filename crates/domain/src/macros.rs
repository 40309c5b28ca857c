//! Macro for implementing Display and FromStr for keyword enums
//!
//! Description files spell locations, parameter types and error kinds as
//! lowercase keywords. This macro maps each variant to its keyword in both
//! directions, parsing case-insensitively.
//!
//! # Example
//!
//! ```rust
//! use courier_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Encoding {
//!     Json,
//!     Xml,
//! }
//!
//! impl_domain_status_conversions!(Encoding {
//!     Json => "json",
//!     Xml => "xml",
//! });
//!
//! assert_eq!("JSON".parse::<Encoding>(), Ok(Encoding::Json));
//! assert_eq!(Encoding::Xml.to_string(), "xml");
//! ```

/// Implements Display and FromStr traits for keyword enums
///
/// # Arguments
///
/// * `$enum_name` - The name of the enum type
/// * `$variant => $str` - Mapping of enum variants to their lowercase
///   keywords
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
