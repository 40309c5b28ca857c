//! Integration tests for the request pool and its retry observers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_common::time::MockClock;
use courier_core::events::Propagation;
use courier_core::pool::{POOL_REQUEST_ADDED, POOL_REQUEST_ERROR};
use courier_core::testing::MockTransport;
use courier_core::{BackoffPlugin, PoolEvent, RequestPool, TransportError};
use courier_domain::{HttpMethod, Request, Response};
use url::Url;

fn request() -> Request {
    Request::new(HttpMethod::Get, Url::parse("https://api.example.com/v1/people").unwrap())
}

#[tokio::test]
async fn retry_after_five_seconds_requeues_exactly_once() {
    let transport = Arc::new(MockTransport::new());
    transport.push_error(TransportError::connect("connection refused"));
    transport.push_response(Response::new(200));

    let clock = MockClock::new();
    let mut pool = RequestPool::new(transport.clone()).with_clock(Arc::new(clock.clone()));

    let added = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&added);
    pool.events().subscribe(
        POOL_REQUEST_ADDED,
        move |_: &mut PoolEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Propagation::Continue)
        },
        0,
    );
    pool.events().subscribe(
        POOL_REQUEST_ERROR,
        |event: &mut PoolEvent| {
            if let PoolEvent::RequestError { attempt: 1, retry_after, .. } = event {
                *retry_after = Some(Duration::from_secs(5));
            }
            Ok(Propagation::Continue)
        },
        0,
    );

    let id = pool.add(request()).unwrap();
    pool.tick().await.unwrap();
    assert_eq!(pool.pending_retries(), 1);
    assert!(pool.is_empty());

    clock.advance(Duration::from_millis(4_999));
    assert_eq!(pool.poll_retries().unwrap(), 0);
    assert!(pool.is_empty());

    clock.advance(Duration::from_millis(1));
    assert_eq!(pool.poll_retries().unwrap(), 1);
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.pending_retries(), 0);

    clock.advance(Duration::from_secs(60));
    assert_eq!(pool.poll_retries().unwrap(), 0);
    assert_eq!(pool.len(), 1);

    let report = pool.send().await.unwrap();
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.succeeded[0].0.id, id);
    assert_eq!(pool.attempts(id), 2);
    assert_eq!(added.load(Ordering::SeqCst), 2);
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn backoff_plugin_gives_up_after_max_retries() {
    let transport = Arc::new(MockTransport::new());
    for _ in 0..3 {
        transport.push_response(Response::new(503));
    }

    let plugin = Arc::new(BackoffPlugin::new().with_max_retries(2).with_backoff(
        courier_common::Backoff::fixed(Duration::from_millis(1)),
    ));
    let mut pool = RequestPool::new(transport.clone()).with_poll_interval(Duration::from_millis(1));
    Arc::clone(&plugin).attach_to_pool(pool.events());

    pool.add(request()).unwrap();
    let report = pool.send().await.unwrap();

    assert!(report.succeeded.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].1.status, Some(503));
    assert_eq!(transport.requests().len(), 3);
}
