//! Paginated results
//!
//! A [`ResourceIterator`] walks a paginated listing one item at a time,
//! fetching the next page only when the current one is used up. The
//! continuation token is opaque: whatever the last page returned is handed
//! back on the next fetch, and a page without one ends the iteration.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use courier_domain::{OperationDescription, PaginationSpec};
use futures::stream::{self, Stream};
use serde_json::Value;
use tracing::debug;

use crate::command::{Command, CommandContext};
use crate::errors::{CommandError, ResponseError};
use crate::parameters::filters::type_name;
use crate::parameters::ParameterBag;

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Token for the following page; `None` on the last page
    pub next_token: Option<String>,
}

/// Fetches pages for a [`ResourceIterator`]
#[async_trait]
pub trait PageFetcher: Send {
    type Error: Send;

    /// Fetch the page after `token` (the first page when `None`)
    async fn fetch(&mut self, token: Option<&str>, page_size: Option<usize>) -> Result<Page, Self::Error>;
}

/// Runs a fresh command for every page of a paginated operation
pub struct CommandPageFetcher {
    operation: Arc<OperationDescription>,
    pagination: PaginationSpec,
    args: ParameterBag,
    context: Arc<CommandContext>,
}

impl CommandPageFetcher {
    pub(crate) fn new(
        operation: Arc<OperationDescription>,
        pagination: PaginationSpec,
        args: ParameterBag,
        context: Arc<CommandContext>,
    ) -> Self {
        Self { operation, pagination, args, context }
    }
}

impl std::fmt::Debug for CommandPageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPageFetcher")
            .field("operation", &self.operation.name)
            .field("pagination", &self.pagination)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PageFetcher for CommandPageFetcher {
    type Error = CommandError;

    async fn fetch(&mut self, token: Option<&str>, page_size: Option<usize>) -> Result<Page, CommandError> {
        let mut args = self.args.clone();
        if let Some(token) = token {
            args = args.with(self.pagination.token_param.clone(), token);
        }
        if let (Some(param), Some(size)) = (&self.pagination.page_size_param, page_size) {
            args = args.with(param.clone(), size);
        }

        let mut command = Command::new(Arc::clone(&self.operation), args, Arc::clone(&self.context));
        let result = command.execute().await?;

        let items = match result.path(&self.pagination.items_path) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(ResponseError::TypeMismatch {
                    model: result.model.clone().unwrap_or_else(|| self.operation.name.clone()),
                    property: self.pagination.items_path.clone(),
                    expected: courier_domain::ParamType::Array,
                    actual: type_name(other).to_string(),
                }
                .into());
            }
        };
        let next_token = match result.path(&self.pagination.token_path) {
            Some(Value::String(token)) if !token.is_empty() => Some(token.clone()),
            Some(Value::Number(token)) => Some(token.to_string()),
            _ => None,
        };
        Ok(Page { items, next_token })
    }
}

/// Lazy, forward-only walk over every item of a paginated listing
#[derive(Debug)]
pub struct ResourceIterator<F> {
    fetcher: F,
    page: VecDeque<Value>,
    next_token: Option<String>,
    exhausted: bool,
    limit: Option<usize>,
    page_size: Option<usize>,
    retrieved: usize,
    iterated: usize,
    requests: usize,
}

impl<F: PageFetcher> ResourceIterator<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            page: VecDeque::new(),
            next_token: None,
            exhausted: false,
            limit: None,
            page_size: None,
            retrieved: 0,
            iterated: 0,
            requests: 0,
        }
    }

    /// Stop after `limit` items; page sizes shrink so no more are fetched
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Items fetched from the service so far
    pub fn retrieved_count(&self) -> usize {
        self.retrieved
    }

    /// Items handed out by `next` so far
    pub fn iterated_count(&self) -> usize {
        self.iterated
    }

    /// Pages fetched so far
    pub fn request_count(&self) -> usize {
        self.requests
    }

    pub fn next_token(&self) -> Option<&str> {
        self.next_token.as_deref()
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.iterated >= limit)
    }

    fn requested_size(&self) -> Option<usize> {
        match (self.page_size, self.limit) {
            (Some(size), Some(limit)) => Some(size.min(limit.saturating_sub(self.retrieved))),
            (None, Some(limit)) => Some(limit.saturating_sub(self.retrieved)),
            (size, None) => size,
        }
    }

    /// Next item, fetching another page when the current one is used up
    ///
    /// # Errors
    /// Whatever the fetcher returns; the iterator can be polled again
    /// afterwards and retries the same page.
    pub async fn next(&mut self) -> Result<Option<Value>, F::Error> {
        loop {
            if self.limit_reached() {
                return Ok(None);
            }
            if let Some(item) = self.page.pop_front() {
                self.iterated += 1;
                return Ok(Some(item));
            }
            if self.exhausted || self.limit.is_some_and(|limit| self.retrieved >= limit) {
                return Ok(None);
            }

            let size = self.requested_size();
            let page = self.fetcher.fetch(self.next_token.as_deref(), size).await?;
            self.requests += 1;
            self.retrieved += page.items.len();
            debug!(request = self.requests, items = page.items.len(), has_more = page.next_token.is_some(), "page fetched");

            self.exhausted = page.next_token.is_none();
            self.next_token = page.next_token;
            self.page = page.items.into();
        }
    }

    /// Drain the iterator into a vector
    ///
    /// # Errors
    /// The first fetch error.
    pub async fn collect_all(&mut self) -> Result<Vec<Value>, F::Error> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Items as a stream; the stream ends after yielding an error
    pub fn into_stream(self) -> impl Stream<Item = Result<Value, F::Error>> {
        stream::unfold(Some(self), |state| async move {
            let mut iterator = state?;
            match iterator.next().await {
                Ok(Some(item)) => Some((Ok(item), Some(iterator))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }
}
