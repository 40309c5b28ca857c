//! Time abstractions
//!
//! Real and mock clocks used wherever a component compares the current time
//! against a deadline.

pub mod clock;

pub use clock::{Clock, MockClock, SystemClock};
