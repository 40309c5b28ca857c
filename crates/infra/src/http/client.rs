use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::errors::{ensure_success, TransportError, TransportErrorKind};
use courier_core::ports::Transport;
use courier_domain::constants::{DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use courier_domain::{ClientConfig, CourierError, Request, Response};
use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client as ReqwestClient, Method};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::errors::{transport_error, InfraError};

/// Default number of requests `send_batch` keeps in flight
const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// [`Transport`] over a shared reqwest client.
///
/// Every 2xx response is returned as-is; anything else becomes a `Status`
/// error carrying the response. Retrying is left to command subscribers.
#[derive(Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl HttpTransport {
    /// Start building a new transport.
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self, CourierError> {
        Self::builder().build()
    }

    /// Transport using the timeout, user agent and default headers of `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, CourierError> {
        Self::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .default_headers(config.default_headers.clone())
            .build()
    }

    /// Token that aborts every in-flight and future request when cancelled.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn to_reqwest(&self, request: &Request) -> Result<reqwest::Request, TransportError> {
        let invalid = |message: String| TransportError::new(TransportErrorKind::Other, message).with_request(request.id);

        let method = Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| invalid(format!("invalid method {}: {e}", request.method)))?;
        let mut builder = self.client.request(method, request.full_url());

        let mut headers = HeaderMap::new();
        for (name, value) in request.headers.iter() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| invalid(format!("invalid header name '{name}': {e}")))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| invalid(format!("invalid value for header '{name}': {e}")))?;
            headers.append(name, value);
        }

        if let Some(body) = &request.body {
            if let Some(content_type) = &body.content_type {
                if !headers.contains_key(CONTENT_TYPE) {
                    let value = HeaderValue::from_str(content_type)
                        .map_err(|e| invalid(format!("invalid content type '{content_type}': {e}")))?;
                    headers.insert(CONTENT_TYPE, value);
                }
            }
            builder = builder.body(body.bytes.clone());
        }

        builder.headers(headers).build().map_err(|e| transport_error(&e).with_request(request.id))
    }

    async fn read_response(response: reqwest::Response) -> Result<Response, reqwest::Error> {
        let status = response.status();
        let mut converted = Response::new(status.as_u16());
        converted.reason = status.canonical_reason().unwrap_or_default().to_string();
        for (name, value) in response.headers() {
            converted.headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        converted.body = response.bytes().await?.to_vec();
        Ok(converted)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(request_id = %request.id, method = %request.method))]
    async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        let outgoing = self.to_reqwest(request)?;
        let url = outgoing.url().clone();
        debug!(%url, "sending HTTP request");

        let exchange = async {
            let response = self.client.execute(outgoing).await?;
            Self::read_response(response).await
        };
        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                return Err(TransportError::cancelled().with_request(request.id));
            }
            result = exchange => result.map_err(|e| {
                let error = transport_error(&e).with_request(request.id);
                debug!(%url, kind = %error.kind, error = %error.message, "HTTP request failed");
                error
            })?,
        };

        debug!(%url, status = response.status, bytes = response.body.len(), "received HTTP response");
        ensure_success(request, response)
    }

    async fn send_batch(
        &self,
        requests: &[Request],
    ) -> Result<Vec<Result<Response, TransportError>>, TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::cancelled());
        }
        debug!(requests = requests.len(), "sending HTTP batch");

        let outcomes = join_all(requests.iter().map(|request| async move {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| TransportError::cancelled().with_request(request.id))?;
            self.send(request).await
        }))
        .await;
        Ok(outcomes)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("available_permits", &self.permits.available_permits())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Builder for [`HttpTransport`].
#[derive(Debug)]
pub struct HttpTransportBuilder {
    timeout: Duration,
    user_agent: String,
    default_headers: BTreeMap<String, String>,
    max_concurrency: usize,
    cancel: Option<CancellationToken>,
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_headers: BTreeMap::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            cancel: None,
        }
    }
}

impl HttpTransportBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn default_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Requests `send_batch` keeps in flight at once.
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Share a cancellation token with the caller.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<HttpTransport, CourierError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.default_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CourierError::Config(format!("invalid default header name '{name}': {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| CourierError::Config(format!("invalid value for default header '{name}': {e}")))?;
            headers.insert(header_name, header_value);
        }

        let client = ReqwestClient::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .default_headers(headers)
            .no_proxy()
            .build()
            .map_err(|err| {
                warn!(error = %err, "failed to build HTTP client");
                CourierError::from(InfraError::from(err))
            })?;

        Ok(HttpTransport {
            client,
            permits: Arc::new(Semaphore::new(self.max_concurrency)),
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}
