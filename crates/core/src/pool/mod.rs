//! Request pool
//!
//! A [`RequestPool`] sends a set of raw requests concurrently and keeps
//! going until every request has either completed or run out of retries.
//!
//! Retries are driven by events: when a request fails the pool publishes
//! `pool.request_error`, and a subscriber that wants a retry fills in
//! `retry_after`. The pool then parks the request next to a
//! [`RetryObserver`] keyed by request id. While observers are pending, each
//! loop iteration publishes `pool.polling` and checks them; a ready observer
//! moves its request back into the queue and is dropped.

pub mod retry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use courier_common::time::{Clock, SystemClock};
use courier_domain::{Request, RequestId, Response};
use futures::future::join_all;
use tracing::{debug, info, instrument};

pub use retry::RetryObserver;

use crate::errors::{ensure_success, EventError, TransportError};
use crate::events::{Event, EventMediator};
use crate::ports::Transport;

pub const POOL_REQUEST_ADDED: &str = "pool.request_added";
pub const POOL_REQUEST_REMOVED: &str = "pool.request_removed";
pub const POOL_BEFORE_SEND: &str = "pool.before_send";
pub const POOL_REQUEST_ERROR: &str = "pool.request_error";
pub const POOL_POLLING: &str = "pool.polling";
pub const POOL_COMPLETE: &str = "pool.complete";
pub const POOL_RETRY_SCHEDULED: &str = "pool.retry_scheduled";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Events published on a pool's mediator
#[derive(Debug)]
pub enum PoolEvent {
    RequestAdded { request_id: RequestId },
    RequestRemoved { request_id: RequestId },
    /// The request is about to be sent; subscribers may modify it
    BeforeSend { request: Request },
    /// Sending failed. Set `retry_after` to schedule a retry.
    RequestError { request: Request, error: TransportError, attempt: u32, retry_after: Option<Duration> },
    Polling { pending_retries: usize },
    Complete { succeeded: usize, failed: usize },
    RetryScheduled { request_id: RequestId, delay: Duration },
}

impl Event for PoolEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::RequestAdded { .. } => POOL_REQUEST_ADDED,
            Self::RequestRemoved { .. } => POOL_REQUEST_REMOVED,
            Self::BeforeSend { .. } => POOL_BEFORE_SEND,
            Self::RequestError { .. } => POOL_REQUEST_ERROR,
            Self::Polling { .. } => POOL_POLLING,
            Self::Complete { .. } => POOL_COMPLETE,
            Self::RetryScheduled { .. } => POOL_RETRY_SCHEDULED,
        }
    }
}

/// Final outcomes of a `send`, in the order requests were added
#[derive(Debug, Default)]
pub struct PoolReport {
    pub succeeded: Vec<(Request, Response)>,
    pub failed: Vec<(Request, TransportError)>,
}

/// Concurrent sender for raw requests with event-driven retries
pub struct RequestPool {
    transport: Arc<dyn Transport>,
    events: Arc<EventMediator<PoolEvent>>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    order: Vec<RequestId>,
    queued: Vec<Request>,
    waiting: HashMap<RequestId, Request>,
    retries: HashMap<RequestId, RetryObserver>,
    attempts: HashMap<RequestId, u32>,
    finished: HashMap<RequestId, (Request, Result<Response, TransportError>)>,
}

impl RequestPool {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            events: Arc::new(EventMediator::new()),
            clock: Arc::new(SystemClock),
            poll_interval: DEFAULT_POLL_INTERVAL,
            order: Vec::new(),
            queued: Vec::new(),
            waiting: HashMap::new(),
            retries: HashMap::new(),
            attempts: HashMap::new(),
            finished: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<EventMediator<PoolEvent>>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventMediator<PoolEvent>> {
        &self.events
    }

    /// Requests queued for the next send, not counting parked retries
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    pub fn attempts(&self, request_id: RequestId) -> u32 {
        self.attempts.get(&request_id).copied().unwrap_or(0)
    }

    /// Queue a request
    ///
    /// # Errors
    /// A failing `pool.request_added` subscriber.
    pub fn add(&mut self, request: Request) -> Result<RequestId, EventError> {
        let request_id = request.id;
        if !self.order.contains(&request_id) {
            self.order.push(request_id);
        }
        self.queued.push(request);
        self.events.publish(&mut PoolEvent::RequestAdded { request_id })?;
        Ok(request_id)
    }

    /// Drop a queued or parked request and any retry pending for it
    ///
    /// # Errors
    /// A failing `pool.request_removed` subscriber.
    pub fn remove(&mut self, request_id: RequestId) -> Result<Option<Request>, EventError> {
        self.retries.remove(&request_id);
        let removed = match self.queued.iter().position(|r| r.id == request_id) {
            Some(position) => Some(self.queued.remove(position)),
            None => self.waiting.remove(&request_id),
        };
        if removed.is_some() {
            self.events.publish(&mut PoolEvent::RequestRemoved { request_id })?;
        }
        Ok(removed)
    }

    /// Forget every request, retry and outcome
    pub fn reset(&mut self) {
        self.order.clear();
        self.queued.clear();
        self.waiting.clear();
        self.retries.clear();
        self.attempts.clear();
        self.finished.clear();
    }

    /// Send until every request has completed or exhausted its retries
    ///
    /// # Errors
    /// A failing pool event subscriber; outcomes gathered so far stay in the
    /// pool.
    #[instrument(skip(self), fields(requests = self.queued.len()))]
    pub async fn send(&mut self) -> Result<PoolReport, EventError> {
        loop {
            self.tick().await?;
            if self.queued.is_empty() && self.retries.is_empty() {
                break;
            }
            if self.queued.is_empty() {
                self.events.publish(&mut PoolEvent::Polling { pending_retries: self.retries.len() })?;
                if self.poll_retries()? == 0 {
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        let report = self.take_report();
        info!(succeeded = report.succeeded.len(), failed = report.failed.len(), "request pool complete");
        self.events.publish(&mut PoolEvent::Complete {
            succeeded: report.succeeded.len(),
            failed: report.failed.len(),
        })?;
        Ok(report)
    }

    /// Send every queued request once, concurrently
    ///
    /// Failures are published as `pool.request_error`; those that get a
    /// `retry_after` are parked behind a [`RetryObserver`], the rest are
    /// final.
    ///
    /// # Errors
    /// A failing pool event subscriber.
    pub async fn tick(&mut self) -> Result<(), EventError> {
        let queued = std::mem::take(&mut self.queued);
        if queued.is_empty() {
            return Ok(());
        }

        let mut batch = Vec::with_capacity(queued.len());
        for request in queued {
            let mut event = PoolEvent::BeforeSend { request };
            self.events.publish(&mut event)?;
            if let PoolEvent::BeforeSend { request } = event {
                *self.attempts.entry(request.id).or_insert(0) += 1;
                batch.push(request);
            }
        }

        debug!(requests = batch.len(), "sending pooled requests");
        let transport = Arc::clone(&self.transport);
        let outcomes = join_all(batch.iter().map(|request| transport.send(request))).await;

        for (request, outcome) in batch.into_iter().zip(outcomes) {
            let outcome = outcome
                .map_err(|error| error.with_request(request.id))
                .and_then(|response| ensure_success(&request, response));
            match outcome {
                Ok(response) => {
                    self.finished.insert(request.id, (request, Ok(response)));
                }
                Err(error) => self.handle_error(request, error)?,
            }
        }
        Ok(())
    }

    fn handle_error(&mut self, request: Request, error: TransportError) -> Result<(), EventError> {
        let attempt = self.attempts(request.id);
        let mut event = PoolEvent::RequestError { request, error, attempt, retry_after: None };
        self.events.publish(&mut event)?;

        if let PoolEvent::RequestError { request, error, retry_after, .. } = event {
            match retry_after {
                Some(delay) => self.schedule_retry(request, delay)?,
                None => {
                    self.finished.insert(request.id, (request, Err(error)));
                }
            }
        }
        Ok(())
    }

    /// Park `request` until `delay` has passed on the pool's clock
    ///
    /// # Errors
    /// A failing `pool.retry_scheduled` subscriber.
    pub fn schedule_retry(&mut self, request: Request, delay: Duration) -> Result<(), EventError> {
        let request_id = request.id;
        let observer = RetryObserver::new(request_id, delay, self.clock.as_ref());
        debug!(%request_id, delay = ?delay, "retry scheduled");
        self.finished.remove(&request_id);
        self.waiting.insert(request_id, request);
        self.retries.insert(request_id, observer);
        if !self.order.contains(&request_id) {
            self.order.push(request_id);
        }
        self.events.publish(&mut PoolEvent::RetryScheduled { request_id, delay })?;
        Ok(())
    }

    /// Re-queue every request whose retry is due, returning how many moved
    ///
    /// Each ready observer fires once: its request is removed from the pool
    /// and added back, and the observer is dropped.
    ///
    /// # Errors
    /// A failing `pool.request_removed` or `pool.request_added` subscriber.
    pub fn poll_retries(&mut self) -> Result<usize, EventError> {
        let now = self.clock.now();
        let mut ready: Vec<RetryObserver> =
            self.retries.values().filter(|observer| observer.is_ready(now)).copied().collect();
        ready.sort_by_key(RetryObserver::retry_at);

        let mut requeued = 0;
        for observer in ready {
            if let Some(request) = self.remove(observer.request_id())? {
                self.add(request)?;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    fn take_report(&mut self) -> PoolReport {
        let mut report = PoolReport::default();
        for request_id in std::mem::take(&mut self.order) {
            match self.finished.remove(&request_id) {
                Some((request, Ok(response))) => report.succeeded.push((request, response)),
                Some((request, Err(error))) => report.failed.push((request, error)),
                None => {}
            }
        }
        report
    }
}

impl fmt::Debug for RequestPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPool")
            .field("queued", &self.queued.len())
            .field("pending_retries", &self.retries.len())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use courier_domain::HttpMethod;
    use parking_lot::Mutex;
    use url::Url;

    use super::*;
    use crate::events::Propagation;
    use crate::testing::MockTransport;

    fn request(path: &str) -> Request {
        Request::new(HttpMethod::Get, Url::parse(&format!("https://api.example.com/{path}")).unwrap())
    }

    #[tokio::test]
    async fn report_keeps_add_order() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(Response::new(200));
        transport.push_response(Response::new(404));
        let mut pool = RequestPool::new(transport);

        let first = pool.add(request("a")).unwrap();
        let second = pool.add(request("b")).unwrap();
        let report = pool.send().await.unwrap();

        assert_eq!(report.succeeded[0].0.id, first);
        assert_eq!(report.failed[0].0.id, second);
        assert_eq!(report.failed[0].1.status, Some(404));
    }

    #[tokio::test]
    async fn retries_until_subscriber_gives_up() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(Response::new(503));
        transport.push_response(Response::new(200));
        let mut pool = RequestPool::new(transport.clone()).with_poll_interval(Duration::from_millis(1));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let names = Arc::clone(&seen);
        for name in [POOL_POLLING, POOL_RETRY_SCHEDULED, POOL_COMPLETE] {
            let names = Arc::clone(&names);
            pool.events().subscribe(
                name,
                move |event: &mut PoolEvent| {
                    names.lock().push(event.name());
                    Ok(Propagation::Continue)
                },
                0,
            );
        }
        pool.events().subscribe(
            POOL_REQUEST_ERROR,
            |event: &mut PoolEvent| {
                if let PoolEvent::RequestError { attempt, retry_after, .. } = event {
                    if *attempt < 3 {
                        *retry_after = Some(Duration::from_millis(5));
                    }
                }
                Ok(Propagation::Continue)
            },
            0,
        );

        let id = pool.add(request("flaky")).unwrap();
        let report = pool.send().await.unwrap();

        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(pool.attempts(id), 2);
        assert_eq!(transport.requests().len(), 2);
        let seen = seen.lock();
        assert_eq!(seen.first(), Some(&POOL_RETRY_SCHEDULED));
        assert!(seen.contains(&POOL_POLLING));
        assert_eq!(seen.last(), Some(&POOL_COMPLETE));
    }

    #[test]
    fn remove_drops_pending_retry() {
        let mut pool = RequestPool::new(Arc::new(MockTransport::new()));
        let parked = request("parked");
        let id = parked.id;
        pool.schedule_retry(parked, Duration::from_secs(1)).unwrap();
        assert_eq!(pool.pending_retries(), 1);

        assert!(pool.remove(id).unwrap().is_some());
        assert_eq!(pool.pending_retries(), 0);
        assert!(pool.remove(id).unwrap().is_none());
    }
}
