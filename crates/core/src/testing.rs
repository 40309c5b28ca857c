//! Test doubles
//!
//! [`MockTransport`] answers from a FIFO of canned outcomes and records
//! every request it sees, so tests can assert on what would have gone over
//! the wire.
//!
//! Compiled for this crate's tests and behind the `test-utils` feature.

use std::collections::VecDeque;

use async_trait::async_trait;
use courier_domain::{Request, Response};
use parking_lot::Mutex;

use crate::errors::TransportError;
use crate::ports::Transport;

/// In-memory [`Transport`]
///
/// When the queue is empty, `send` fails with a connect error.
#[derive(Debug, Default)]
pub struct MockTransport {
    outcomes: Mutex<VecDeque<Result<Response, TransportError>>>,
    batch_failures: Mutex<VecDeque<Option<TransportError>>>,
    requests: Mutex<Vec<Request>>,
    batch_sizes: Mutex<Vec<usize>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Response) {
        self.outcomes.lock().push_back(Ok(response));
    }

    pub fn push_error(&self, error: TransportError) {
        self.outcomes.lock().push_back(Err(error));
    }

    /// Queue the outcome of the next `send_batch` call: `Some` fails the
    /// whole call, `None` lets it through
    pub fn push_batch_outcome(&self, failure: Option<TransportError>) {
        self.batch_failures.lock().push_back(failure);
    }

    /// Requests sent so far, batched ones included
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Size of each `send_batch` call, in call order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.outcomes.lock().len()
    }

    fn next_outcome(&self, request: &Request) -> Result<Response, TransportError> {
        self.requests.lock().push(request.clone());
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::connect("mock transport has no queued response")))
            .map_err(|error| error.with_request(request.id))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        self.next_outcome(request)
    }

    async fn send_batch(
        &self,
        requests: &[Request],
    ) -> Result<Vec<Result<Response, TransportError>>, TransportError> {
        self.batch_sizes.lock().push(requests.len());
        if let Some(Some(failure)) = self.batch_failures.lock().pop_front() {
            self.requests.lock().extend(requests.iter().cloned());
            return Err(failure);
        }
        Ok(requests.iter().map(|request| self.next_outcome(request)).collect())
    }
}
