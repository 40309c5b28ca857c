//! # Courier Domain
//!
//! Plain data shared by every Courier crate.
//!
//! This crate contains:
//! - HTTP request/response values (`Request`, `Response`, `Headers`)
//! - Service description types (operations, parameters, models)
//! - Client configuration structures
//! - Domain error type and Result alias
//!
//! ## Architecture
//! - No dependencies on other Courier crates
//! - No I/O; loading and sending live in `courier-infra` and `courier-core`

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
