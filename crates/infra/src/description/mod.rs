//! Service description files

pub mod loader;

pub use loader::{load_catalog, load_description, parse_description};
