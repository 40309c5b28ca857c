//! Resilience primitives
//!
//! Delay policies used by retry subscribers. Scheduling the retry itself is
//! left to the caller (the request pool polls, commands sleep).

pub mod backoff;

pub use backoff::{
    Backoff, BackoffStrategy, Jitter, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, MAX_BACKOFF_EXPONENT,
};
