//! Batching
//!
//! A [`Batch`] queues items, asks its [`BatchDivisor`] to split them into
//! transfer groups, and hands each group to its [`BatchTransfer`]. Groups
//! run concurrently up to a limit; outcomes are reported per item in queue
//! order.
//!
//! A group whose transfer fails as a whole marks every item of that group
//! failed with the shared cause; other groups are unaffected. Only when
//! every group fails that way does `flush` return a [`BatchTransferError`].

pub mod divisor;
pub mod transfer;

use std::fmt;
use std::sync::Arc;

use courier_domain::constants::DEFAULT_MAX_PARALLEL_BATCHES;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

pub use divisor::{AffinityDivisor, BatchDivisor, BatchItem, ChunkDivisor};
pub use transfer::{BatchTransfer, CommandBatchTransfer, RequestBatchTransfer};

use crate::errors::{TransportError, TransportErrorKind};

/// Why one item failed
#[derive(Debug, Clone)]
pub enum BatchItemError<E> {
    /// The item itself failed
    Item(E),
    /// Its whole transfer group failed
    Systemic(Arc<TransportError>),
}

impl<E: fmt::Display> fmt::Display for BatchItemError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item(error) => error.fmt(f),
            Self::Systemic(cause) => write!(f, "batch transfer failed: {cause}"),
        }
    }
}

#[derive(Debug)]
pub struct BatchSuccess<T, O> {
    /// Position in the queue
    pub index: usize,
    pub item: T,
    pub output: O,
}

#[derive(Debug)]
pub struct BatchFailure<T, E> {
    /// Position in the queue
    pub index: usize,
    pub item: T,
    pub error: BatchItemError<E>,
}

/// Outcome of a flush, both lists in queue order
#[derive(Debug)]
pub struct BatchResult<T, O, E> {
    pub succeeded: Vec<BatchSuccess<T, O>>,
    pub failed: Vec<BatchFailure<T, E>>,
}

impl<T, O, E> BatchResult<T, O, E> {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T, O, E> Default for BatchResult<T, O, E> {
    fn default() -> Self {
        Self { succeeded: Vec::new(), failed: Vec::new() }
    }
}

/// Every transfer group failed as a whole
///
/// Carries the items (in queue order) and the strategies in effect so the
/// caller can retry with different ones.
pub struct BatchTransferError<T, X: ?Sized> {
    pub items: Vec<T>,
    pub cause: Arc<TransportError>,
    pub divisor: Arc<dyn BatchDivisor<T>>,
    pub transfer: Arc<X>,
}

impl<T, X: ?Sized> fmt::Debug for BatchTransferError<T, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchTransferError")
            .field("items", &self.items.len())
            .field("cause", &self.cause)
            .finish_non_exhaustive()
    }
}

impl<T, X: ?Sized> fmt::Display for BatchTransferError<T, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch of {} items failed to transfer: {}", self.items.len(), self.cause)
    }
}

impl<T, X: ?Sized> std::error::Error for BatchTransferError<T, X> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// Result of [`Batch::flush`]
pub type FlushResult<T, X> = Result<
    BatchResult<T, <X as BatchTransfer<T>>::Output, <X as BatchTransfer<T>>::Error>,
    BatchTransferError<T, X>,
>;

/// Queue of items waiting to be transferred
pub struct Batch<T, X: ?Sized> {
    items: Vec<T>,
    divisor: Arc<dyn BatchDivisor<T>>,
    transfer: Arc<X>,
    max_parallel: usize,
}

impl<T, X> Batch<T, X>
where
    T: Send,
    X: BatchTransfer<T> + ?Sized,
{
    pub fn new(divisor: Arc<dyn BatchDivisor<T>>, transfer: Arc<X>) -> Self {
        Self { items: Vec::new(), divisor, transfer, max_parallel: DEFAULT_MAX_PARALLEL_BATCHES }
    }

    /// Transfer groups allowed in flight at once
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn enqueue(&mut self, item: T) -> &mut Self {
        self.items.push(item);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn divisor(&self) -> &Arc<dyn BatchDivisor<T>> {
        &self.divisor
    }

    pub fn transfer(&self) -> &Arc<X> {
        &self.transfer
    }

    /// Transfer everything queued, leaving the batch empty
    ///
    /// # Errors
    /// `BatchTransferError` when every transfer group failed as a whole.
    pub async fn flush(&mut self) -> FlushResult<T, X> {
        let items = std::mem::take(&mut self.items);
        if items.is_empty() {
            return Ok(BatchResult::default());
        }

        let chunks = self.split(items);
        let total_chunks = chunks.len();
        debug!(items = chunks.iter().map(|(i, _)| i.len()).sum::<usize>(), chunks = total_chunks, "flushing batch");

        let transfer = Arc::clone(&self.transfer);
        let transferred: Vec<_> = stream::iter(chunks)
            .map(|(indices, mut chunk)| {
                let transfer = Arc::clone(&transfer);
                async move {
                    let outcome = transfer.transfer(&mut chunk).await;
                    (indices, chunk, outcome)
                }
            })
            .buffered(self.max_parallel)
            .collect()
            .await;

        let mut result = BatchResult::default();
        let mut systemic_chunks = 0;
        let mut first_cause = None;

        for (indices, chunk, outcome) in transferred {
            match outcome {
                Ok(outputs) => {
                    let expected = chunk.len();
                    let mut outputs = outputs.into_iter();
                    for (index, item) in indices.into_iter().zip(chunk) {
                        match outputs.next() {
                            Some(Ok(output)) => result.succeeded.push(BatchSuccess { index, item, output }),
                            Some(Err(error)) => {
                                result.failed.push(BatchFailure { index, item, error: BatchItemError::Item(error) });
                            }
                            None => {
                                let cause = Arc::new(TransportError::new(
                                    TransportErrorKind::Other,
                                    format!("transfer returned fewer than {expected} outcomes"),
                                ));
                                result.failed.push(BatchFailure { index, item, error: BatchItemError::Systemic(cause) });
                            }
                        }
                    }
                }
                Err(cause) => {
                    warn!(items = chunk.len(), error = %cause, "batch transfer failed");
                    systemic_chunks += 1;
                    let cause = Arc::new(cause);
                    first_cause.get_or_insert_with(|| Arc::clone(&cause));
                    for (index, item) in indices.into_iter().zip(chunk) {
                        result.failed.push(BatchFailure {
                            index,
                            item,
                            error: BatchItemError::Systemic(Arc::clone(&cause)),
                        });
                    }
                }
            }
        }

        result.succeeded.sort_by_key(|s| s.index);
        result.failed.sort_by_key(|f| f.index);

        if let Some(cause) = first_cause.filter(|_| systemic_chunks == total_chunks) {
            return Err(BatchTransferError {
                items: result.failed.into_iter().map(|f| f.item).collect(),
                cause,
                divisor: Arc::clone(&self.divisor),
                transfer: Arc::clone(&self.transfer),
            });
        }
        Ok(result)
    }

    /// Move items into their groups; indices the divisor skipped form one
    /// last group
    fn split(&self, items: Vec<T>) -> Vec<(Vec<usize>, Vec<T>)> {
        let groups = self.divisor.divide(&items);
        let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();

        let mut chunks = Vec::with_capacity(groups.len() + 1);
        for group in groups {
            let (indices, chunk): (Vec<usize>, Vec<T>) =
                group.into_iter().filter_map(|i| slots.get_mut(i)?.take().map(|item| (i, item))).unzip();
            if !indices.is_empty() {
                chunks.push((indices, chunk));
            }
        }

        let (indices, rest): (Vec<usize>, Vec<T>) =
            slots.into_iter().enumerate().filter_map(|(i, slot)| slot.map(|item| (i, item))).unzip();
        if !indices.is_empty() {
            chunks.push((indices, rest));
        }
        chunks
    }
}

impl<T, X: ?Sized> fmt::Debug for Batch<T, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("items", &self.items.len())
            .field("max_parallel", &self.max_parallel)
            .finish_non_exhaustive()
    }
}
