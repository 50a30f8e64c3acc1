//! Fixation tracking
//!
//! A process fixes a table to keep a traversal stable. While any fixation
//! is held, deleting the table only tombstones it; the payload is destroyed
//! when the last fixation is released.
//!
//! Each table keeps its holders in its header. The tracker additionally
//! records, per process, which tables it fixes, so that a process exit can
//! release everything without scanning the registry.
//!
//! Lock order: table fixation state first, then the per-process map.

use crate::error::{DbError, DbResult};
use crate::memory::DbMemory;
use crate::table::Table;
use crate::types::{ProcessId, TableId};
use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Bytes charged to the miscellaneous counter per fixation record
pub const FIXATION_RECORD_SIZE: usize =
    std::mem::size_of::<(ProcessId, usize)>() + std::mem::size_of::<(TableId, Arc<Table>)>();

/// Per-table fixation state, guarded by the table's fixation lock
#[derive(Debug, Default)]
pub struct FixationState {
    holders: LinkedHashMap<ProcessId, usize>,
    delete_pending: bool,
}

impl FixationState {
    /// Number of distinct fixing processes
    pub fn holder_count(&self) -> usize {
        self.holders.len()
    }

    pub fn is_fixed(&self) -> bool {
        !self.holders.is_empty()
    }

    /// Fix count held by `process`
    pub fn count_for(&self, process: ProcessId) -> usize {
        self.holders.get(&process).copied().unwrap_or(0)
    }

    /// Holders in fixation order
    pub fn holders(&self) -> Vec<(ProcessId, usize)> {
        self.holders.iter().map(|(p, n)| (*p, *n)).collect()
    }

    pub fn is_delete_pending(&self) -> bool {
        self.delete_pending
    }

    pub(crate) fn set_delete_pending(&mut self) {
        self.delete_pending = true;
    }

    /// Clears the pending deletion if no holder is left
    fn take_due_deletion(&mut self) -> bool {
        if self.holders.is_empty() && self.delete_pending {
            self.delete_pending = false;
            return true;
        }
        false
    }
}

/// Per-process fixation records
pub struct FixationTracker {
    by_process: Mutex<HashMap<ProcessId, LinkedHashMap<TableId, Arc<Table>>>>,
    memory: Arc<DbMemory>,
}

impl FixationTracker {
    pub fn new(memory: Arc<DbMemory>) -> Self {
        Self {
            by_process: Mutex::new(HashMap::new()),
            memory,
        }
    }

    /// Fixes `table` for `process`; nested fixes by one process are counted
    ///
    /// Returns the number of distinct processes fixing the table.
    pub fn fix(&self, table: &Arc<Table>, process: ProcessId) -> DbResult<usize> {
        let mut state = table.fixation();
        if !table.is_alive() {
            return Err(DbError::NoSuchTable(table.table_id()));
        }
        let count = state.holders.entry(process).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.by_process
                .lock()
                .entry(process)
                .or_default()
                .insert(table.table_id(), Arc::clone(table));
            self.memory.add_misc(FIXATION_RECORD_SIZE as i64);
            debug!(table = %table.table_id(), process = %process, "table fixed");
        }
        Ok(state.holder_count())
    }

    /// Releases one fixation of `table_id` held by `process`
    ///
    /// Works on tables that were deleted meanwhile. Returns the table when
    /// this release makes a deferred deletion due.
    pub fn unfix(&self, table_id: TableId, process: ProcessId) -> DbResult<Option<Arc<Table>>> {
        let table = self
            .by_process
            .lock()
            .get(&process)
            .and_then(|tables| tables.get(&table_id))
            .cloned()
            .ok_or(DbError::NotFixed {
                table: table_id,
                process,
            })?;

        let mut state = table.fixation();
        let Some(count) = state.holders.get_mut(&process) else {
            // Released concurrently by a process exit
            return Err(DbError::NotFixed {
                table: table_id,
                process,
            });
        };
        if *count > 1 {
            *count -= 1;
            return Ok(None);
        }
        state.holders.remove(&process);
        self.forget(process, table_id);
        debug!(table = %table_id, process = %process, "table unfixed");
        let due = state.take_due_deletion();
        drop(state);
        Ok(due.then_some(table))
    }

    /// Releases every fixation held by `process`
    ///
    /// Returns the tables whose deferred deletion became due.
    pub fn release_all(&self, process: ProcessId) -> Vec<Arc<Table>> {
        let Some(tables) = self.by_process.lock().remove(&process) else {
            return Vec::new();
        };
        let mut due = Vec::new();
        for (_, table) in tables {
            let mut state = table.fixation();
            if state.holders.remove(&process).is_some() {
                self.memory.add_misc(-(FIXATION_RECORD_SIZE as i64));
            }
            if state.take_due_deletion() {
                drop(state);
                due.push(table);
            }
        }
        if !due.is_empty() {
            debug!(process = %process, due = due.len(), "fixations released on exit");
        }
        due
    }

    fn forget(&self, process: ProcessId, table_id: TableId) {
        let mut by_process = self.by_process.lock();
        if let Some(tables) = by_process.get_mut(&process) {
            if tables.remove(&table_id).is_some() {
                self.memory.add_misc(-(FIXATION_RECORD_SIZE as i64));
            }
            if tables.is_empty() {
                by_process.remove(&process);
            }
        }
    }

    /// Tables fixed by `process`, in fixation order
    pub fn fixed_by(&self, process: ProcessId) -> Vec<TableId> {
        self.by_process
            .lock()
            .get(&process)
            .map(|tables| tables.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Processes holding at least one fixation
    pub fn processes(&self) -> Vec<ProcessId> {
        self.by_process.lock().keys().copied().collect()
    }

    /// Number of processes holding at least one fixation
    pub fn process_count(&self) -> usize {
        self.by_process.lock().len()
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
