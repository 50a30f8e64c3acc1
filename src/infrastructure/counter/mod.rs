//! Sharded (decentralized) counters
//!
//! A counter is split into cache-line aligned cells. Each thread updates the
//! cell picked by its shard hint, so concurrent mutators of the same counter
//! do not bounce one cache line between cores. The exact value is the sum of
//! all cells; it is only exact once in-flight updates have completed.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

static NEXT_SHARD_HINT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static SHARD_HINT: usize = NEXT_SHARD_HINT.fetch_add(1, Ordering::Relaxed);
}

/// One counter cell, aligned to cache line size to prevent false sharing
#[cfg_attr(any(target_arch = "x86", target_arch = "x86_64"), repr(align(64)))]
#[cfg_attr(any(target_arch = "arm", target_arch = "aarch64"), repr(align(128)))]
#[derive(Debug, Default)]
struct CounterCell {
    value: AtomicI64,
}

/// Signed counter that is either centralized (one cell) or decentralized
/// (one cell per shard)
#[derive(Debug)]
pub struct ShardedCounter {
    cells: Box<[CounterCell]>,
}

impl ShardedCounter {
    /// Creates a counter backed by a single cell
    pub fn centralized() -> Self {
        Self::with_cells(1)
    }

    /// Creates a counter backed by `shards` cells (at least one)
    pub fn decentralized(shards: usize) -> Self {
        Self::with_cells(shards.max(1))
    }

    fn with_cells(count: usize) -> Self {
        let cells = (0..count).map(|_| CounterCell::default()).collect();
        Self { cells }
    }

    /// Returns true if updates are spread across several cells
    #[inline]
    pub fn is_decentralized(&self) -> bool {
        self.cells.len() > 1
    }

    /// Number of cells
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.cells.len()
    }

    /// Adds a signed delta to the calling thread's cell
    #[inline]
    pub fn add(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        let idx = if self.cells.len() == 1 {
            0
        } else {
            SHARD_HINT.with(|hint| *hint) % self.cells.len()
        };
        self.cells[idx].value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Sums every cell
    pub fn read(&self) -> i64 {
        self.cells
            .iter()
            .map(|cell| cell.value.load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for ShardedCounter {
    fn default() -> Self {
        Self::centralized()
    }
}
