//! Variant payloads
//!
//! The header only knows a payload through [`TableStorage`]. Entries are
//! stored as [`DbTerm`] blocks, each holding a key and its value in one
//! allocation charged to the owning table.

use crate::error::{DbError, DbResult};
use crate::memory::{DbMemory, RawAllocator};
use crate::table::Table;
use crate::types::TableKind;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::hash::{Hash, Hasher};
use std::ptr::{self, NonNull};
use std::slice;

/// One stored entry: key bytes followed by value bytes in a single block
pub struct DbTerm {
    ptr: NonNull<u8>,
    key_len: usize,
    size: usize,
}

// SAFETY: a term exclusively owns its block and only hands out shared
// slices of it.
unsafe impl Send for DbTerm {}
unsafe impl Sync for DbTerm {}

impl DbTerm {
    /// Allocates a term for `table`; allocator shortage is reported
    pub(crate) fn new_fnf(
        mem: &DbMemory,
        table: &Table,
        key: &[u8],
        value: &[u8],
    ) -> DbResult<Self> {
        let size = key.len() + value.len();
        let ptr = mem
            .alloc_fnf(Some(table), size)
            .ok_or(DbError::OutOfMemory {
                table: table.table_id(),
                requested: size,
            })?;
        // SAFETY: the block spans `size` bytes and is not shared yet.
        unsafe {
            ptr::copy_nonoverlapping(key.as_ptr(), ptr.as_ptr(), key.len());
            ptr::copy_nonoverlapping(value.as_ptr(), ptr.as_ptr().add(key.len()), value.len());
        }
        Ok(Self {
            ptr,
            key_len: key.len(),
            size,
        })
    }

    pub fn key(&self) -> &[u8] {
        // SAFETY: the first key_len bytes were initialized at creation.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.key_len) }
    }

    pub fn value(&self) -> &[u8] {
        // SAFETY: bytes past the key up to size hold the value.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr().add(self.key_len), self.size - self.key_len) }
    }

    /// Block size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Replaces the value, resizing the block in place or by moving it
    pub(crate) fn set_value(&mut self, mem: &DbMemory, table: &Table, value: &[u8]) -> DbResult<()> {
        let new_size = self.key_len + value.len();
        // SAFETY: ptr/size describe this term's live block.
        let ptr = unsafe { mem.realloc_fnf(Some(table), self.ptr, self.size, new_size) }.ok_or(
            DbError::OutOfMemory {
                table: table.table_id(),
                requested: new_size,
            },
        )?;
        // SAFETY: the resized block spans new_size bytes.
        unsafe {
            ptr::copy_nonoverlapping(value.as_ptr(), ptr.as_ptr().add(self.key_len), value.len());
        }
        self.ptr = ptr;
        self.size = new_size;
        Ok(())
    }

    /// Frees the block now, crediting `table`
    pub(crate) fn free(self, mem: &DbMemory, table: &Table) {
        // SAFETY: the term owned the block and is consumed here.
        unsafe { mem.free(Some(table), self.ptr, self.size) };
    }

    /// Returns the block to the allocator without accounting
    ///
    /// # Safety
    /// `allocator` must be the allocator the block came from, and the bytes
    /// must already have been credited back to the table.
    pub(crate) unsafe fn release(self, allocator: &dyn RawAllocator) {
        // SAFETY: forwarded caller contract.
        unsafe { allocator.deallocate(self.ptr, self.size) };
    }
}

/// Variant payload contract
///
/// Implementations allocate entry memory through the supplied [`DbMemory`]
/// with the owning table, so that the table's counter always covers them.
pub trait TableStorage: Send + Sync {
    /// Variant tag mirrored into the header
    fn kind(&self) -> TableKind;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Inserts or replaces an entry
    fn insert(&mut self, mem: &DbMemory, table: &Table, key: &[u8], value: &[u8]) -> DbResult<()>;

    /// Removes an entry, returning true if it existed
    fn remove(&mut self, mem: &DbMemory, table: &Table, key: &[u8]) -> bool;

    fn for_each(&self, f: &mut dyn FnMut(&[u8], &[u8]));

    /// Bytes held in entry blocks
    fn memory_size(&self) -> usize;

    /// Destruction entry point: surrenders every entry block
    fn into_terms(self: Box<Self>) -> Vec<DbTerm>;
}

/// Creates payloads for new tables
pub trait StorageFactory: Send + Sync {
    fn create(&self, kind: TableKind) -> Box<dyn TableStorage>;
}

/// Hash variant for [`TableKind::Hash`], ordered variant for the tree kinds
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStorageFactory;

impl StorageFactory for DefaultStorageFactory {
    fn create(&self, kind: TableKind) -> Box<dyn TableStorage> {
        match kind {
            TableKind::Hash => Box::new(HashStorage::new(kind)),
            TableKind::Tree | TableKind::CaTree => Box::new(OrderedStorage::new(kind)),
        }
    }
}

/// Set element comparing by the term's key bytes
pub struct TermEntry(DbTerm);

impl Borrow<[u8]> for TermEntry {
    fn borrow(&self) -> &[u8] {
        self.0.key()
    }
}

impl PartialEq for TermEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.key() == other.0.key()
    }
}

impl Eq for TermEntry {}

impl Hash for TermEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.key().hash(state);
    }
}

impl PartialOrd for TermEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TermEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.key().cmp(other.0.key())
    }
}

/// Container of term entries keyed by key bytes
pub trait TermSet: Default + Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Option<&TermEntry>;
    fn take(&mut self, key: &[u8]) -> Option<TermEntry>;
    fn put(&mut self, entry: TermEntry);
    fn len(&self) -> usize;
    fn visit(&self, f: &mut dyn FnMut(&DbTerm));
    fn into_terms(self) -> Vec<DbTerm>;
}

impl TermSet for HashSet<TermEntry> {
    fn get(&self, key: &[u8]) -> Option<&TermEntry> {
        HashSet::get(self, key)
    }

    fn take(&mut self, key: &[u8]) -> Option<TermEntry> {
        HashSet::take(self, key)
    }

    fn put(&mut self, entry: TermEntry) {
        self.insert(entry);
    }

    fn len(&self) -> usize {
        HashSet::len(self)
    }

    fn visit(&self, f: &mut dyn FnMut(&DbTerm)) {
        self.iter().for_each(|entry| f(&entry.0));
    }

    fn into_terms(self) -> Vec<DbTerm> {
        self.into_iter().map(|entry| entry.0).collect()
    }
}

impl TermSet for BTreeSet<TermEntry> {
    fn get(&self, key: &[u8]) -> Option<&TermEntry> {
        BTreeSet::get(self, key)
    }

    fn take(&mut self, key: &[u8]) -> Option<TermEntry> {
        BTreeSet::take(self, key)
    }

    fn put(&mut self, entry: TermEntry) {
        self.insert(entry);
    }

    fn len(&self) -> usize {
        BTreeSet::len(self)
    }

    fn visit(&self, f: &mut dyn FnMut(&DbTerm)) {
        self.iter().for_each(|entry| f(&entry.0));
    }

    fn into_terms(self) -> Vec<DbTerm> {
        self.into_iter().map(|entry| entry.0).collect()
    }
}

/// Reference payload over a [`TermSet`]
pub struct SetStorage<S> {
    kind: TableKind,
    entries: S,
    bytes: usize,
}

/// Unordered payload
pub type HashStorage = SetStorage<HashSet<TermEntry>>;

/// Payload iterating in key order
pub type OrderedStorage = SetStorage<BTreeSet<TermEntry>>;

impl<S: TermSet> SetStorage<S> {
    pub fn new(kind: TableKind) -> Self {
        Self {
            kind,
            entries: S::default(),
            bytes: 0,
        }
    }
}

impl<S: TermSet> TableStorage for SetStorage<S> {
    fn kind(&self) -> TableKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn lookup(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.get(key).map(|entry| entry.0.value().to_vec())
    }

    fn insert(&mut self, mem: &DbMemory, table: &Table, key: &[u8], value: &[u8]) -> DbResult<()> {
        match self.entries.take(key) {
            Some(TermEntry(mut term)) => {
                let old_size = term.size();
                let res = term.set_value(mem, table, value);
                self.bytes = self.bytes - old_size + term.size();
                self.entries.put(TermEntry(term));
                res
            }
            None => {
                let term = DbTerm::new_fnf(mem, table, key, value)?;
                self.bytes += term.size();
                self.entries.put(TermEntry(term));
                Ok(())
            }
        }
    }

    fn remove(&mut self, mem: &DbMemory, table: &Table, key: &[u8]) -> bool {
        match self.entries.take(key) {
            Some(TermEntry(term)) => {
                self.bytes -= term.size();
                term.free(mem, table);
                true
            }
            None => false,
        }
    }

    fn for_each(&self, f: &mut dyn FnMut(&[u8], &[u8])) {
        self.entries.visit(&mut |term| f(term.key(), term.value()));
    }

    fn memory_size(&self) -> usize {
        self.bytes
    }

    fn into_terms(self: Box<Self>) -> Vec<DbTerm> {
        self.entries.into_terms()
    }
}
