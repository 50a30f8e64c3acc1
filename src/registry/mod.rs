//! Table registry
//!
//! Every table header is linked into one doubly linked list (the clist),
//! newest first. Deleting a table only tombstones it: the node stays linked
//! so that traversals parked on it can continue. Once the payload has been
//! destroyed through a deferred operation the node is unlinked, and the node
//! memory itself goes through one more deferred operation.
//!
//! Traversals ([`TableCursor`]) take no lock. They pin the reclamation epoch
//! before loading the list head, which keeps every node they can reach
//! allocated until they are dropped. An unlinked node keeps its `next`
//! pointer, so a cursor parked on it still reaches the rest of the list.
//!
//! Tables created during a traversal are inserted before the head the
//! cursor started from and are never visited by it.

pub mod name_index;

use crate::error::{DbError, DbResult};
use crate::memory::DbMemory;
use crate::reclaim::{ProgressPin, ThreadProgress};
use crate::table::{Table, TABLE_HEADER_SIZE};
use crate::types::{TableId, TableStatus};
use name_index::NameIndex;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, trace, warn};

/// Bytes charged to the miscellaneous counter per list node
pub const TABLE_NODE_SIZE: usize = std::mem::size_of::<TableNode>();

struct TableNode {
    table: Arc<Table>,
    next: AtomicPtr<TableNode>,
    prev: AtomicPtr<TableNode>,
}

struct NodePtr(*mut TableNode);

// SAFETY: node pointers are only dereferenced under the list lock or by
// pinned cursors; ownership of a node moves to exactly one free operation.
unsafe impl Send for NodePtr {}

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Payload destruction was scheduled
    Destroyed,
    /// The table is fixed; destruction waits for the last unfix
    Deferred { fix_count: usize },
}

pub struct Registry {
    head: AtomicPtr<TableNode>,
    nodes: Mutex<HashMap<TableId, NodePtr>>,
    by_id: RwLock<HashMap<TableId, Arc<Table>>>,
    names: NameIndex,
    live: AtomicUsize,
    next_table_id: AtomicU64,
    max_tables: usize,
    memory: Arc<DbMemory>,
    progress: Arc<ThreadProgress>,
}

impl Registry {
    pub fn new(max_tables: usize, memory: Arc<DbMemory>, progress: Arc<ThreadProgress>) -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            nodes: Mutex::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
            names: NameIndex::new(),
            live: AtomicUsize::new(0),
            next_table_id: AtomicU64::new(1),
            max_tables,
            memory,
            progress,
        }
    }

    pub fn allocate_table_id(&self) -> TableId {
        TableId(self.next_table_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn max_tables(&self) -> usize {
        self.max_tables
    }

    /// Registers a freshly built table and links it at the list head
    pub fn register(&self, table: Arc<Table>) -> DbResult<()> {
        let id = table.table_id();
        if self.live.fetch_add(1, Ordering::AcqRel) >= self.max_tables {
            self.live.fetch_sub(1, Ordering::AcqRel);
            warn!(max_tables = self.max_tables, "table limit reached");
            return Err(DbError::SystemLimit(self.max_tables));
        }
        if table.is_named() && !self.names.insert(table.name(), id) {
            self.live.fetch_sub(1, Ordering::AcqRel);
            return Err(DbError::TableAlreadyExists(table.name().to_string()));
        }

        table.memory_counter().add(TABLE_HEADER_SIZE as i64);
        self.memory.add_misc(TABLE_NODE_SIZE as i64);
        self.by_id.write().insert(id, Arc::clone(&table));

        let mut nodes = self.nodes.lock();
        let head = self.head.load(Ordering::Relaxed);
        let node = Box::into_raw(Box::new(TableNode {
            table,
            next: AtomicPtr::new(head),
            prev: AtomicPtr::new(ptr::null_mut()),
        }));
        if !head.is_null() {
            // SAFETY: linked nodes stay allocated while the list lock is held.
            unsafe { (*head).prev.store(node, Ordering::Relaxed) };
        }
        self.head.store(node, Ordering::Release);
        nodes.insert(id, NodePtr(node));
        drop(nodes);

        debug!(table = %id, "table registered");
        Ok(())
    }

    /// Live table by identity
    pub fn lookup(&self, id: TableId) -> DbResult<Arc<Table>> {
        self.by_id
            .read()
            .get(&id)
            .cloned()
            .ok_or(DbError::NoSuchTable(id))
    }

    /// Live named table by name
    pub fn lookup_name(&self, name: &str) -> DbResult<Arc<Table>> {
        let id = self
            .names
            .lookup(name)
            .ok_or_else(|| DbError::NameNotFound(name.to_string()))?;
        self.lookup(id)
            .map_err(|_| DbError::NameNotFound(name.to_string()))
    }

    /// Deletes a table
    ///
    /// The status change, index removal and the destroy-or-defer decision
    /// happen under the table's fixation lock, so a concurrent fix either
    /// precedes the delete (and defers destruction) or fails.
    pub fn delete(self: &Arc<Self>, table: &Arc<Table>) -> DbResult<DeleteOutcome> {
        let outcome = {
            let mut state = table.fixation();
            if !table.mark_tombstoned() {
                return Err(DbError::NoSuchTable(table.table_id()));
            }
            self.unregister(table);
            if state.is_fixed() {
                state.set_delete_pending();
                DeleteOutcome::Deferred {
                    fix_count: state.holder_count(),
                }
            } else {
                DeleteOutcome::Destroyed
            }
        };
        debug!(table = %table.table_id(), ?outcome, "table deleted");
        if outcome == DeleteOutcome::Destroyed {
            self.destroy_payload(table);
        }
        Ok(outcome)
    }

    /// Drops a tombstoned table from the live count and the lookup indexes;
    /// its node stays linked
    fn unregister(&self, table: &Table) {
        let id = table.table_id();
        self.by_id.write().remove(&id);
        if table.is_named() {
            self.names.remove(table.name(), id);
        }
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    /// Schedules destruction of a tombstoned table's payload
    ///
    /// The payload bytes are credited to the table now; the blocks are
    /// returned to the allocator and the node unlinked once every
    /// participant has passed a checkpoint.
    pub fn destroy_payload(self: &Arc<Self>, table: &Arc<Table>) {
        debug_assert_ne!(table.status(), TableStatus::Alive);
        let Some(payload) = table.take_payload() else {
            return;
        };
        let bytes = payload.memory_size();
        let registry = Arc::clone(self);
        let owner = Arc::clone(table);
        let allocator = Arc::clone(self.memory.allocator());
        self.memory
            .schedule_deferred_free(&self.progress, Some(table), bytes, move || {
                for term in payload.into_terms() {
                    // SAFETY: the terms came from this allocator and their
                    // bytes were credited when the free was scheduled.
                    unsafe { term.release(allocator.as_ref()) };
                }
                registry.release(&owner);
            });
        trace!(table = %table.table_id(), bytes, "payload destruction scheduled");
    }

    /// Final stage: unlink the node and schedule it for freeing
    fn release(&self, table: &Table) {
        let id = table.table_id();
        let node = {
            let mut nodes = self.nodes.lock();
            let Some(node) = nodes.remove(&id) else {
                debug_assert!(false, "released table {} has no node", id);
                return;
            };
            // SAFETY: the node and its neighbours are linked and the list
            // lock is held.
            unsafe { self.unlink(node.0) };
            node
        };

        table.memory_counter().add(-(TABLE_HEADER_SIZE as i64));
        debug_assert_eq!(
            table.memory_counter().read(),
            0,
            "table {} still holds memory at reclamation",
            id
        );
        table.mark_reclaimed();

        self.memory
            .schedule_deferred_free(&self.progress, None, TABLE_NODE_SIZE, move || {
                let node = node;
                // SAFETY: the node was unlinked before this operation was
                // scheduled and no cursor pinned before that remains.
                drop(unsafe { Box::from_raw(node.0) });
            });
        debug!(table = %id, "table reclaimed");
    }

    /// # Safety
    /// `node` must be linked and the list lock held.
    unsafe fn unlink(&self, node: *mut TableNode) {
        unsafe {
            let prev = (*node).prev.load(Ordering::Relaxed);
            let next = (*node).next.load(Ordering::Relaxed);
            if prev.is_null() {
                self.head.store(next, Ordering::Release);
            } else {
                (*prev).next.store(next, Ordering::Release);
            }
            if !next.is_null() {
                (*next).prev.store(prev, Ordering::Relaxed);
            }
            // `next` stays intact for cursors parked on this node
            (*node).prev.store(ptr::null_mut(), Ordering::Relaxed);
        }
    }

    /// Starts a lock-free traversal from the current head
    pub fn cursor(&self) -> TableCursor {
        let pin = self.progress.pin();
        let next = self.head.load(Ordering::Acquire);
        TableCursor { _pin: pin, next }
    }

    /// Visits every linked table, tombstoned ones included
    pub fn foreach_table<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Table>),
    {
        let mut cursor = self.cursor();
        while let Some(table) = cursor.next_table() {
            f(&table);
        }
    }

    /// Number of live tables
    pub fn count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Number of linked nodes, tombstoned ones included
    pub fn linked_count(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Linked tables that are no longer alive
    pub fn tombstoned_count(&self) -> usize {
        self.linked_count().saturating_sub(self.count())
    }

    /// Other named tables sharing `name`'s index stripe
    pub fn colliding_names(&self, name: &str) -> Vec<String> {
        self.names.colliding(name)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("live", &self.count())
            .field("linked", &self.linked_count())
            .field("max_tables", &self.max_tables)
            .finish()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // Still-linked nodes belong to the list; unlinked ones were handed
        // to their free operations.
        let nodes = std::mem::take(self.nodes.get_mut());
        for (_, node) in nodes {
            // SAFETY: exclusive access; each linked node is freed once.
            drop(unsafe { Box::from_raw(node.0) });
        }
    }
}

/// Lock-free registry traversal
///
/// Holds a reclamation pin for its whole lifetime, so it can be suspended
/// between scheduling slices and resumed later, possibly on another thread.
pub struct TableCursor {
    _pin: ProgressPin,
    next: *const TableNode,
}

// SAFETY: the cursor only reads nodes kept alive by its own pin, and the pin
// itself may move between threads.
unsafe impl Send for TableCursor {}

impl TableCursor {
    /// True once the end of the list has been reached
    pub fn is_exhausted(&self) -> bool {
        self.next.is_null()
    }

    /// Advances to the next linked table
    pub fn next_table(&mut self) -> Option<Arc<Table>> {
        if self.next.is_null() {
            return None;
        }
        // SAFETY: the pin was taken before the first pointer was loaded, so
        // every node reachable from it is still allocated.
        let node = unsafe { &*self.next };
        self.next = node.next.load(Ordering::Acquire);
        Some(Arc::clone(&node.table))
    }
}

impl Iterator for TableCursor {
    type Item = Arc<Table>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_table()
    }
}

impl fmt::Debug for TableCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableCursor")
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
