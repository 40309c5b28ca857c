//! Infrastructure error handling

pub mod conversions;

pub use conversions::{transport_error, InfraError};
