//! # Courier Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - The reqwest-backed HTTP transport
//! - Client configuration loading (environment, JSON, TOML)
//! - Service description file loading
//! - Tracing initialisation
//!
//! ## Architecture
//! - Implements traits defined in `courier-core`
//! - Contains all "impure" code (network, file system, global subscriber)

pub mod config;
pub mod description;
pub mod errors;
pub mod http;
pub mod observability;

// Re-export commonly used items
pub use description::{load_catalog, load_description};
pub use errors::InfraError;
pub use http::{HttpTransport, HttpTransportBuilder};
pub use observability::{init_tracing, LogFormat};
