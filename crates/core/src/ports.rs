//! Port interfaces for sending requests
//!
//! These traits define the boundary between command dispatch and the HTTP
//! stack that actually talks to the network.

use async_trait::async_trait;
use courier_domain::{Request, Response};

use crate::errors::TransportError;

/// Sends prepared requests
///
/// Implementations should report non-2xx responses as errors of kind
/// `Status` carrying the response. Commands also pass every `Ok` response
/// through [`ensure_success`], so a transport that returns them as `Ok`
/// behaves the same.
///
/// [`ensure_success`]: crate::errors::ensure_success
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request
    async fn send(&self, request: &Request) -> Result<Response, TransportError>;

    /// Send a group of requests that share this transport
    ///
    /// The inner results are per-request outcomes in input order. An outer
    /// `Err` means the whole group failed (nothing can be attributed to a
    /// single request). The default sends one request at a time.
    async fn send_batch(
        &self,
        requests: &[Request],
    ) -> Result<Vec<Result<Response, TransportError>>, TransportError> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.send(request).await);
        }
        Ok(results)
    }
}
