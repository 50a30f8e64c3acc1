//! Memory accounting for table data
//!
//! Every allocation, reallocation and free made on behalf of the engine goes
//! through [`DbMemory`]. Each call reports a signed size delta: when an owning
//! table is supplied the delta lands in that table's sharded counter,
//! otherwise in the engine-wide miscellaneous counter.
//!
//! Two failure modes are offered per call site:
//! - the default (`alloc`, `realloc`) treats allocator failure as fatal and
//!   aborts through [`std::alloc::handle_alloc_error`];
//! - the `_fnf` ("failure not fatal") variants return `None` so the caller
//!   can turn the shortage into a user-visible error.

#[cfg(test)]
pub(crate) mod testing;

use crate::reclaim::ThreadProgress;
use crate::table::Table;
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::trace;

/// Alignment of every block handed out by the engine
pub const DB_ALIGN: usize = 16;

#[inline]
fn db_layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size.max(1), DB_ALIGN).ok()
}

/// Allocator collaborator beneath the accounting layer
pub trait RawAllocator: Send + Sync {
    /// Allocates `size` bytes aligned to [`DB_ALIGN`]
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// Resizes a block, possibly moving it
    ///
    /// # Safety
    /// `ptr` must come from this allocator and currently span `old_size` bytes.
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>>;

    /// Releases a block
    ///
    /// # Safety
    /// `ptr` must come from this allocator, span `size` bytes and not be
    /// used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize);
}

/// Allocator backed by the global Rust allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl RawAllocator for SystemAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = db_layout(size)?;
        // SAFETY: layout has a non-zero size.
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let old_layout = db_layout(old_size)?;
        db_layout(new_size)?;
        // SAFETY: caller guarantees ptr/old_size describe a live block.
        NonNull::new(unsafe { alloc::realloc(ptr.as_ptr(), old_layout, new_size.max(1)) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        if let Some(layout) = db_layout(size) {
            // SAFETY: caller guarantees ptr/size describe a live block.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// Raw block pointer moved into a deferred free operation
struct SendPtr(NonNull<u8>);

// SAFETY: the block is exclusively owned by the deferred operation once
// scheduled; nothing else touches it.
unsafe impl Send for SendPtr {}

/// Accounting front-end over a [`RawAllocator`]
pub struct DbMemory {
    allocator: Arc<dyn RawAllocator>,
    misc_mem_size: AtomicI64,
    realloc_always_moves: bool,
}

impl DbMemory {
    pub fn new(allocator: Arc<dyn RawAllocator>) -> Self {
        Self::with_options(allocator, false)
    }

    pub fn with_options(allocator: Arc<dyn RawAllocator>, realloc_always_moves: bool) -> Self {
        Self {
            allocator,
            misc_mem_size: AtomicI64::new(0),
            realloc_always_moves,
        }
    }

    /// The allocator collaborator
    pub fn allocator(&self) -> &Arc<dyn RawAllocator> {
        &self.allocator
    }

    /// Memory not attributable to a single table, in bytes
    pub fn misc_mem_size(&self) -> usize {
        self.misc_mem_size.load(Ordering::Relaxed).max(0) as usize
    }

    /// Adds a signed delta to the miscellaneous counter
    pub fn add_misc(&self, delta: i64) {
        self.misc_mem_size.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    fn update(&self, table: Option<&Table>, freed: usize, allocated: usize) {
        let delta = allocated as i64 - freed as i64;
        match table {
            Some(table) => table.memory_counter().add(delta),
            None => self.add_misc(delta),
        }
    }

    /// Allocates a block; allocator failure is fatal
    pub fn alloc(&self, table: Option<&Table>, size: usize) -> NonNull<u8> {
        match self.alloc_fnf(table, size) {
            Some(ptr) => ptr,
            None => fatal_alloc_error(size),
        }
    }

    /// Allocates a block; returns `None` when the allocator cannot satisfy it
    pub fn alloc_fnf(&self, table: Option<&Table>, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.allocator.allocate(size)?;
        self.update(table, 0, size);
        Some(ptr)
    }

    /// Resizes a block; allocator failure is fatal
    ///
    /// # Safety
    /// `ptr` must be a live block of exactly `old_size` bytes obtained from
    /// this `DbMemory`.
    pub unsafe fn realloc(
        &self,
        table: Option<&Table>,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> NonNull<u8> {
        // SAFETY: forwarded caller contract.
        match unsafe { self.realloc_fnf(table, ptr, old_size, new_size) } {
            Some(ptr) => ptr,
            None => fatal_alloc_error(new_size),
        }
    }

    /// Resizes a block; on failure the old block is left untouched and
    /// `None` is returned
    ///
    /// # Safety
    /// Same contract as [`DbMemory::realloc`].
    pub unsafe fn realloc_fnf(
        &self,
        table: Option<&Table>,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let res = if self.realloc_always_moves {
            let fresh = self.allocator.allocate(new_size)?;
            // SAFETY: both blocks are live and distinct; the copy stays
            // within the smaller of the two sizes.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    ptr.as_ptr(),
                    fresh.as_ptr(),
                    old_size.min(new_size),
                );
                self.allocator.deallocate(ptr, old_size);
            }
            fresh
        } else {
            // SAFETY: forwarded caller contract.
            unsafe { self.allocator.reallocate(ptr, old_size, new_size)? }
        };
        self.update(table, old_size, new_size);
        Some(res)
    }

    /// Frees a block immediately
    ///
    /// # Safety
    /// `ptr` must be a live block of exactly `size` bytes obtained from this
    /// `DbMemory`, and no reader may still reach it.
    pub unsafe fn free(&self, table: Option<&Table>, ptr: NonNull<u8>, size: usize) {
        self.update(table, size, 0);
        // SAFETY: forwarded caller contract.
        unsafe { self.allocator.deallocate(ptr, size) };
    }

    /// Accounts `size` bytes as freed now and runs `free_fn` once every
    /// worker has passed the next thread progress checkpoint.
    ///
    /// The table counter is updated up front since the table may be gone by
    /// the time `free_fn` runs.
    pub fn schedule_deferred_free<F>(
        &self,
        progress: &ThreadProgress,
        table: Option<&Table>,
        size: usize,
        free_fn: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        self.update(table, size, 0);
        let epoch = progress.schedule_later_op(free_fn);
        trace!(size, epoch, "scheduled deferred free");
    }

    /// Schedules a raw block for deferred deallocation
    ///
    /// # Safety
    /// `ptr` must be a live block of exactly `size` bytes obtained from this
    /// `DbMemory`; after this call the caller must not free it again.
    pub unsafe fn schedule_free(
        &self,
        progress: &ThreadProgress,
        table: Option<&Table>,
        ptr: NonNull<u8>,
        size: usize,
    ) {
        let allocator = Arc::clone(&self.allocator);
        let block = SendPtr(ptr);
        self.schedule_deferred_free(progress, table, size, move || {
            // Move the whole wrapper, not just its non-Send field
            let block = block;
            // SAFETY: ownership of the block moved into this operation.
            unsafe { allocator.deallocate(block.0, size) };
        });
    }
}

#[cold]
fn fatal_alloc_error(size: usize) -> ! {
    let layout = db_layout(size).unwrap_or_else(Layout::new::<u8>);
    alloc::handle_alloc_error(layout)
}
