//! Table header shared by every storage variant

use crate::error::{DbError, DbResult};
use crate::fixation::FixationState;
use crate::infrastructure::counter::ShardedCounter;
use crate::infrastructure::lwlock::TableLock;
use crate::memory::DbMemory;
use crate::table::storage::TableStorage;
use crate::types::{ProcessId, TableAccess, TableId, TableKind, TableStatus};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Bytes charged to a table's counter for its own header
pub const TABLE_HEADER_SIZE: usize = std::mem::size_of::<Table>();

/// Uniform table header
///
/// Identity, ownership, lifecycle status, fixation state and the memory
/// counter live here; the entries themselves live in the variant-specific
/// payload behind the table lock. The payload is taken out exactly once,
/// when the table is destroyed.
pub struct Table {
    table_id: TableId,
    name: String,
    named: bool,
    owner: ProcessId,
    kind: TableKind,
    access: TableAccess,
    created_at: u64,
    status: AtomicU8,
    payload: TableLock<Option<Box<dyn TableStorage>>>,
    fixation: Mutex<FixationState>,
    counters: ShardedCounter,
}

impl Table {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        table_id: TableId,
        name: String,
        named: bool,
        owner: ProcessId,
        kind: TableKind,
        access: TableAccess,
        created_at: u64,
        payload: TableLock<Option<Box<dyn TableStorage>>>,
        counters: ShardedCounter,
    ) -> Self {
        Self {
            table_id,
            name,
            named,
            owner,
            kind,
            access,
            created_at,
            status: AtomicU8::new(TableStatus::Alive as u8),
            payload,
            fixation: Mutex::new(FixationState::default()),
            counters,
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if the table is registered in the name index
    pub fn is_named(&self) -> bool {
        self.named
    }

    pub fn owner(&self) -> ProcessId {
        self.owner
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn access(&self) -> TableAccess {
        self.access
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn status(&self) -> TableStatus {
        TableStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_alive(&self) -> bool {
        self.status() == TableStatus::Alive
    }

    /// Alive -> Tombstoned; false if the table was already deleted
    pub(crate) fn mark_tombstoned(&self) -> bool {
        self.status
            .compare_exchange(
                TableStatus::Alive as u8,
                TableStatus::Tombstoned as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn mark_reclaimed(&self) {
        self.status
            .store(TableStatus::Reclaimed as u8, Ordering::Release);
    }

    pub(crate) fn memory_counter(&self) -> &ShardedCounter {
        &self.counters
    }

    /// Bytes currently attributed to this table, header included
    pub fn memory_size(&self) -> usize {
        self.counters.read().max(0) as usize
    }

    pub fn has_decentralized_counters(&self) -> bool {
        self.counters.is_decentralized()
    }

    pub(crate) fn fixation(&self) -> MutexGuard<'_, FixationState> {
        self.fixation.lock()
    }

    /// Number of processes currently fixing the table
    pub fn fix_count(&self) -> usize {
        self.fixation.lock().holder_count()
    }

    /// May `process` read entries
    pub fn can_read(&self, process: ProcessId) -> bool {
        self.access != TableAccess::Private || self.owner == process
    }

    /// May `process` write entries
    pub fn can_write(&self, process: ProcessId) -> bool {
        self.access == TableAccess::Public || self.owner == process
    }

    /// Number of entries; zero once the table is deleted
    pub fn size(&self) -> usize {
        if !self.is_alive() {
            return 0;
        }
        self.payload.read().as_ref().map_or(0, |storage| storage.len())
    }

    pub fn lookup(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        let guard = self.payload.read();
        let storage = self.live_payload(guard.as_deref())?;
        Ok(storage.lookup(key))
    }

    pub fn insert(&self, mem: &DbMemory, key: &[u8], value: &[u8]) -> DbResult<()> {
        let mut guard = self.payload.write();
        if !self.is_alive() {
            return Err(DbError::NoSuchTable(self.table_id));
        }
        match guard.as_deref_mut() {
            Some(storage) => storage.insert(mem, self, key, value),
            None => Err(DbError::NoSuchTable(self.table_id)),
        }
    }

    pub fn remove(&self, mem: &DbMemory, key: &[u8]) -> DbResult<bool> {
        let mut guard = self.payload.write();
        if !self.is_alive() {
            return Err(DbError::NoSuchTable(self.table_id));
        }
        match guard.as_deref_mut() {
            Some(storage) => Ok(storage.remove(mem, self, key)),
            None => Err(DbError::NoSuchTable(self.table_id)),
        }
    }

    /// Visits every entry in the variant's iteration order
    pub fn for_each(&self, f: &mut dyn FnMut(&[u8], &[u8])) -> DbResult<()> {
        let guard = self.payload.read();
        let storage = self.live_payload(guard.as_deref())?;
        storage.for_each(f);
        Ok(())
    }

    fn live_payload<'a>(
        &self,
        payload: Option<&'a dyn TableStorage>,
    ) -> DbResult<&'a dyn TableStorage> {
        match payload {
            Some(storage) if self.is_alive() => Ok(storage),
            _ => Err(DbError::NoSuchTable(self.table_id)),
        }
    }

    /// Removes the payload for destruction; `None` if already taken
    pub(crate) fn take_payload(&self) -> Option<Box<dyn TableStorage>> {
        self.payload.write().take()
    }

    /// Snapshot of the header for diagnostics
    pub fn info(&self) -> TableInfo {
        TableInfo {
            id: self.table_id,
            name: self.name.clone(),
            named: self.named,
            owner: self.owner,
            kind: self.kind,
            access: self.access,
            status: self.status(),
            size: self.size(),
            memory: self.memory_size(),
            fix_count: self.fix_count(),
            decentralized_counters: self.has_decentralized_counters(),
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("table_id", &self.table_id)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .finish()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Table(id={}, name={}, kind={}, owner={})",
            self.table_id, self.name, self.kind, self.owner
        )
    }
}

/// Serializable table description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub id: TableId,
    pub name: String,
    pub named: bool,
    pub owner: ProcessId,
    pub kind: TableKind,
    pub access: TableAccess,
    pub status: TableStatus,
    pub size: usize,
    pub memory: usize,
    pub fix_count: usize,
    pub decentralized_counters: bool,
    pub created_at: u64,
}
