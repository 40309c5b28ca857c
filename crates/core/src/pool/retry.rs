//! Retry observers

use std::time::{Duration, Instant};

use courier_common::time::Clock;
use courier_domain::RequestId;

/// A pending one-shot retry of one pool request
///
/// The observer never sleeps: the pool asks [`is_ready`](Self::is_ready) on
/// every polling tick and re-queues the request the first time it answers
/// yes, then drops the observer. A further retry needs a new observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryObserver {
    request_id: RequestId,
    retry_at: Instant,
}

impl RetryObserver {
    pub fn new(request_id: RequestId, delay: Duration, clock: &dyn Clock) -> Self {
        Self { request_id, retry_at: clock.now() + delay }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn retry_at(&self) -> Instant {
        self.retry_at
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        now >= self.retry_at
    }

    /// Time left before the retry is due
    pub fn remaining(&self, now: Instant) -> Duration {
        self.retry_at.saturating_duration_since(now)
    }
}
