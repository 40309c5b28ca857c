//! Command plugins
//!
//! Each plugin is a [`CommandSubscriber`](crate::events::CommandSubscriber)
//! attached to a client's mediator with `ServiceClient::add_subscriber`.

pub mod auth;
pub mod backoff;
pub mod history;
pub mod log;
pub mod mock;

pub use auth::HeaderAuthPlugin;
pub use backoff::BackoffPlugin;
pub use history::{HistoryEntry, HistoryPlugin};
pub use log::LogPlugin;
pub use mock::MockPlugin;
