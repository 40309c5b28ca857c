//! # Courier Core
//!
//! Service-description driven command logic - no HTTP client of its own.
//!
//! This crate contains:
//! - The operation catalog, parameter validation and filters
//! - Request building from URI templates and parameter locations
//! - Response parsing into result models
//! - The command state machine and its event mediator
//! - Batching, the request pool, pagination and plugins
//!
//! ## Architecture Principles
//! - Only depends on `courier-common` and `courier-domain`
//! - Everything that touches the network sits behind the [`Transport`] port
//! - Cross-cutting behaviour is added by subscribing to command events

pub mod batch;
pub mod client;
pub mod command;
pub mod description;
pub mod errors;
pub mod events;
pub mod iterator;
pub mod parameters;
pub mod plugins;
pub mod pool;
pub mod ports;
pub mod request;
pub mod response;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

mod xml;

pub use batch::{
    AffinityDivisor, Batch, BatchDivisor, BatchItem, BatchResult, BatchTransfer, BatchTransferError,
    ChunkDivisor, CommandBatchTransfer, RequestBatchTransfer,
};
pub use client::{ServiceClient, ServiceClientBuilder};
pub use command::{Command, CommandContext, CommandState};
pub use description::{CommandFactory, NameResolver, OperationCatalog, SnakeCaseResolver};
pub use errors::{
    BuildError, CatalogError, ClientError, CommandError, EventError, ParameterError, ResponseError,
    TransportError, TransportErrorKind,
};
pub use events::{
    CommandEvent, CommandSubscriber, ErrorResolution, Event, EventMediator, ListenerId, Propagation,
};
pub use iterator::{CommandPageFetcher, Page, PageFetcher, ResourceIterator};
pub use parameters::{FilterRegistry, ParameterBag, ValidatedParameters};
pub use plugins::{BackoffPlugin, HeaderAuthPlugin, HistoryPlugin, LogPlugin, MockPlugin};
pub use pool::{PoolEvent, PoolReport, RequestPool, RetryObserver};
pub use ports::Transport;
pub use request::{LocationRegistry, RequestBuilder};
pub use response::{CommandResult, ResponseParser};
