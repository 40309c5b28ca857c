//! Exponential backoff retries

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use courier_common::resilience::{Backoff, BackoffStrategy, Jitter};
use courier_domain::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_STATUS_CODES};
use courier_domain::{BackoffConfig, RequestId};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::errors::{TransportError, TransportErrorKind};
use crate::events::{
    CommandEvent, CommandSubscriber, ErrorResolution, EventMediator, ListenerId, Propagation, COMMAND_ERROR,
    COMMAND_PROCESS,
};
use crate::pool::{PoolEvent, POOL_COMPLETE, POOL_REQUEST_ERROR};

/// Retries failed requests after `base * 2^n` delays
///
/// Works on both command errors (by resolving them with a retry) and pool
/// errors (by asking the pool to park the request behind a retry observer).
/// Only retryable failures count: configured status codes and transport
/// error kinds. Each request is retried at most `max_retries` times.
#[derive(Debug)]
pub struct BackoffPlugin {
    max_retries: u32,
    statuses: Vec<u16>,
    kinds: Vec<TransportErrorKind>,
    backoff: Backoff,
    retries: Mutex<HashMap<RequestId, u32>>,
}

impl BackoffPlugin {
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            statuses: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            kinds: vec![
                TransportErrorKind::Connect,
                TransportErrorKind::Timeout,
                TransportErrorKind::Dns,
                TransportErrorKind::Io,
            ],
            backoff: Backoff::default(),
            retries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        let strategy = BackoffStrategy::Exponential {
            initial_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        };
        let jitter = if config.jitter { Jitter::Full } else { Jitter::None };
        Self::new().with_max_retries(config.max_retries).with_backoff(Backoff::new(strategy, jitter))
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Status codes worth retrying
    #[must_use]
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Transport failure kinds worth retrying
    #[must_use]
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = TransportErrorKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_retryable(&self, error: &TransportError) -> bool {
        match (error.kind, error.status) {
            (TransportErrorKind::Status, Some(status)) => self.statuses.contains(&status),
            (kind, _) => self.kinds.contains(&kind),
        }
    }

    /// Retries already granted to a request
    pub fn retries(&self, request_id: RequestId) -> u32 {
        self.retries.lock().get(&request_id).copied().unwrap_or(0)
    }

    /// Forget every retry count
    pub fn reset(&self) {
        self.retries.lock().clear();
    }

    /// Delay before the next retry of `request_id`, or `None` once the
    /// failure is not retryable or the retries are used up
    pub fn next_delay(&self, request_id: RequestId, error: &TransportError) -> Option<Duration> {
        if !self.is_retryable(error) {
            return None;
        }
        let mut retries = self.retries.lock();
        let count = retries.entry(request_id).or_insert(0);
        if *count >= self.max_retries {
            retries.remove(&request_id);
            info!(%request_id, max_retries = self.max_retries, "retries exhausted");
            return None;
        }
        let delay = self.backoff.delay_for(*count);
        *count += 1;
        debug!(%request_id, retry = *count, delay = ?delay, error = %error, "scheduling retry");
        Some(delay)
    }

    fn forget(&self, request_id: RequestId) {
        self.retries.lock().remove(&request_id);
    }

    /// Subscribe to a request pool's errors
    pub fn attach_to_pool(self: Arc<Self>, events: &Arc<EventMediator<PoolEvent>>) -> Vec<ListenerId> {
        let plugin = Arc::clone(&self);
        let on_error = events.subscribe(
            POOL_REQUEST_ERROR,
            move |event: &mut PoolEvent| {
                if let PoolEvent::RequestError { request, error, retry_after, .. } = event {
                    if retry_after.is_none() {
                        *retry_after = plugin.next_delay(request.id, error);
                    }
                }
                Ok(Propagation::Continue)
            },
            0,
        );
        let plugin = self;
        let on_complete = events.subscribe(
            POOL_COMPLETE,
            move |_: &mut PoolEvent| {
                plugin.reset();
                Ok(Propagation::Continue)
            },
            0,
        );
        vec![on_error, on_complete]
    }
}

impl Default for BackoffPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSubscriber for BackoffPlugin {
    fn attach(self: Arc<Self>, events: &Arc<EventMediator<CommandEvent>>) -> Vec<ListenerId> {
        let plugin = Arc::clone(&self);
        let on_error = events.subscribe(
            COMMAND_ERROR,
            move |event: &mut CommandEvent| {
                let CommandEvent::Error { request, error, resolution, .. } = event else {
                    return Ok(Propagation::Continue);
                };
                if resolution.is_some() {
                    return Ok(Propagation::Continue);
                }
                match plugin.next_delay(request.id, error) {
                    Some(after) => {
                        *resolution = Some(ErrorResolution::Retry { after });
                        Ok(Propagation::Handled)
                    }
                    None => Ok(Propagation::Continue),
                }
            },
            0,
        );
        let plugin = self;
        let on_process = events.subscribe(
            COMMAND_PROCESS,
            move |event: &mut CommandEvent| {
                plugin.forget(event.request().id);
                Ok(Propagation::Continue)
            },
            0,
        );
        vec![on_error, on_process]
    }
}

#[cfg(test)]
mod tests {
    use courier_domain::Response;

    use super::*;

    #[test]
    fn delays_double_until_retries_run_out() {
        let plugin = BackoffPlugin::new();
        let id = RequestId::new();
        let error = TransportError::from_status(Response::new(503));

        let delays: Vec<_> = std::iter::from_fn(|| plugin.next_delay(id, &error)).collect();
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]);
        assert_eq!(plugin.retries(id), 0);
    }

    #[test]
    fn only_configured_failures_are_retried() {
        let plugin = BackoffPlugin::new();
        assert!(plugin.is_retryable(&TransportError::from_status(Response::new(500))));
        assert!(!plugin.is_retryable(&TransportError::from_status(Response::new(502))));
        assert!(plugin.is_retryable(&TransportError::timeout("slow")));
        assert!(!plugin.is_retryable(&TransportError::new(TransportErrorKind::Tls, "bad cert")));

        let custom = BackoffPlugin::new().with_statuses([502]).with_kinds([]);
        assert!(custom.is_retryable(&TransportError::from_status(Response::new(502))));
        assert!(!custom.is_retryable(&TransportError::timeout("slow")));
    }

    #[test]
    fn from_config_uses_configured_delays() {
        let config = BackoffConfig { max_retries: 1, base_delay_ms: 250, ..BackoffConfig::default() };
        let plugin = BackoffPlugin::from_config(&config);
        let id = RequestId::new();
        let error = TransportError::connect("refused");

        assert_eq!(plugin.next_delay(id, &error), Some(Duration::from_millis(250)));
        assert_eq!(plugin.next_delay(id, &error), None);
    }
}
