//! Client-wide constants
//!
//! Defaults shared by configuration, batching and retry policies.

// Transport defaults
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

// Batching
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_PARALLEL_BATCHES: usize = 5;

// Retry/backoff
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 2] = [500, 503];

// History plugin
pub const DEFAULT_HISTORY_LIMIT: usize = 10;
