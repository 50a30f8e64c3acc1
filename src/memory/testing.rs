//! Allocator doubles used by the unit tests

use super::{RawAllocator, SystemAllocator};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Allocator that records every live block and panics on double or
/// mismatched frees; optionally refuses allocations past a byte limit.
#[derive(Default)]
pub(crate) struct TrackingAllocator {
    live: Mutex<HashMap<usize, usize>>,
    frees: AtomicUsize,
    limit: Option<usize>,
}

impl TrackingAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Refuses any allocation that would push live bytes past `limit`
    pub(crate) fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub(crate) fn live_blocks(&self) -> usize {
        self.live.lock().len()
    }

    pub(crate) fn live_bytes(&self) -> usize {
        self.live.lock().values().sum()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    fn fits(&self, live: &HashMap<usize, usize>, extra: usize) -> bool {
        match self.limit {
            Some(limit) => live.values().sum::<usize>() + extra <= limit,
            None => true,
        }
    }
}

impl RawAllocator for TrackingAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let mut live = self.live.lock();
        if !self.fits(&live, size) {
            return None;
        }
        let ptr = SystemAllocator.allocate(size)?;
        live.insert(ptr.as_ptr() as usize, size);
        Some(ptr)
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let mut live = self.live.lock();
        let recorded = live.get(&(ptr.as_ptr() as usize)).copied();
        assert_eq!(recorded, Some(old_size), "realloc of unknown block");
        if new_size > old_size && !self.fits(&live, new_size - old_size) {
            return None;
        }
        let res = unsafe { SystemAllocator.reallocate(ptr, old_size, new_size)? };
        live.remove(&(ptr.as_ptr() as usize));
        live.insert(res.as_ptr() as usize, new_size);
        Some(res)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        let recorded = self.live.lock().remove(&(ptr.as_ptr() as usize));
        assert_eq!(recorded, Some(size), "double or mismatched free");
        self.frees.fetch_add(1, Ordering::SeqCst);
        unsafe { SystemAllocator.deallocate(ptr, size) };
    }
}
