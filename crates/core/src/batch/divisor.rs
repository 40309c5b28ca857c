//! Splitting a queue into transfer groups

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use courier_domain::constants::DEFAULT_MAX_BATCH_SIZE;
use courier_domain::Request;

use crate::command::Command;

/// An item that knows which transport resource it must share
pub trait BatchItem {
    /// Items with equal keys may travel in the same transfer
    fn affinity_key(&self) -> String;
}

impl BatchItem for Request {
    fn affinity_key(&self) -> String {
        self.origin_key()
    }
}

impl BatchItem for Command {
    fn affinity_key(&self) -> String {
        Command::affinity_key(self)
    }
}

/// Splits items into groups, each sent by one transfer call
pub trait BatchDivisor<T>: Send + Sync {
    /// Groups of indices into `items`. Every index should appear exactly
    /// once; group order is transfer order.
    fn divide(&self, items: &[T]) -> Vec<Vec<usize>>;
}

type KeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// Groups items by affinity key, then chunks each group
///
/// Groups keep the order in which their first item was queued; items keep
/// queue order inside their group.
pub struct AffinityDivisor<T> {
    max_batch_size: usize,
    key: KeyFn<T>,
}

impl<T: BatchItem> AffinityDivisor<T> {
    pub fn new(max_batch_size: usize) -> Self {
        Self::with_key(max_batch_size, |item: &T| item.affinity_key())
    }
}

impl<T: BatchItem> Default for AffinityDivisor<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH_SIZE)
    }
}

impl<T> AffinityDivisor<T> {
    /// Group with a custom key function
    pub fn with_key<F>(max_batch_size: usize, key: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self { max_batch_size: max_batch_size.max(1), key: Arc::new(key) }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

impl<T> BatchDivisor<T> for AffinityDivisor<T> {
    fn divide(&self, items: &[T]) -> Vec<Vec<usize>> {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let key = (self.key)(item);
            let slot = *positions.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(index);
        }

        groups
            .into_iter()
            .flat_map(|group| group.chunks(self.max_batch_size).map(<[usize]>::to_vec).collect::<Vec<_>>())
            .collect()
    }
}

impl<T> fmt::Debug for AffinityDivisor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AffinityDivisor").field("max_batch_size", &self.max_batch_size).finish_non_exhaustive()
    }
}

/// Chunks items by size only, ignoring affinity
#[derive(Debug, Clone, Copy)]
pub struct ChunkDivisor {
    max_batch_size: usize,
}

impl ChunkDivisor {
    pub fn new(max_batch_size: usize) -> Self {
        Self { max_batch_size: max_batch_size.max(1) }
    }
}

impl Default for ChunkDivisor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH_SIZE)
    }
}

impl<T> BatchDivisor<T> for ChunkDivisor {
    fn divide(&self, items: &[T]) -> Vec<Vec<usize>> {
        (0..items.len()).collect::<Vec<_>>().chunks(self.max_batch_size).map(<[usize]>::to_vec).collect()
    }
}
