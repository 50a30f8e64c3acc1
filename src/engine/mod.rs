//! Engine service handle
//!
//! [`Engine`] owns every shared component (memory accounting, thread
//! progress, registry, fixation tracker and enumerator) and exposes the
//! operations the command layer needs. There is no global state: several
//! engines may coexist, e.g. one per test.

use crate::config::{ConfigResult, EngineConfig};
use crate::enumerator::{
    AccessVisibility, AllTablesCompletion, AllTablesReply, AllTablesService, Visibility,
};
use crate::error::{DbError, DbResult};
use crate::fixation::FixationTracker;
use crate::infrastructure::counter::ShardedCounter;
use crate::memory::{DbMemory, RawAllocator, SystemAllocator};
use crate::reclaim::ThreadProgress;
use crate::registry::{DeleteOutcome, Registry};
use crate::scheduler::AuxWork;
use crate::table::{DefaultStorageFactory, StorageFactory, Table, TableBuilder, TableInfo};
use crate::types::{ProcessId, TableAccess, TableId, TableKind};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Creation options for a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableOptions {
    pub kind: TableKind,
    pub access: TableAccess,
    /// Register the name so it can be looked up and must be unique
    pub named: bool,
    /// Counter mode; the engine default applies when unset
    pub decentralized_counters: Option<bool>,
}

impl TableOptions {
    pub fn new(kind: TableKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn named(mut self) -> Self {
        self.named = true;
        self
    }

    pub fn access(mut self, access: TableAccess) -> Self {
        self.access = access;
        self
    }

    pub fn decentralized_counters(mut self, enabled: bool) -> Self {
        self.decentralized_counters = Some(enabled);
        self
    }
}

/// What a process exit cleaned up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExitSummary {
    pub cancelled_requests: usize,
    /// Deferred deletions completed by releasing the process' fixations
    pub deletions_unblocked: usize,
    pub tables_deleted: usize,
}

/// Serializable engine snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub table_count: usize,
    pub linked_tables: usize,
    pub tombstoned_tables: usize,
    pub max_tables: usize,
    pub misc_memory: usize,
    pub epoch: u64,
    pub pending_later_ops: usize,
    pub executed_later_ops: u64,
    pub fixing_processes: usize,
    pub tables: Vec<TableInfo>,
}

/// Builder wiring custom collaborators into an engine
pub struct EngineBuilder {
    config: EngineConfig,
    allocator: Arc<dyn RawAllocator>,
    visibility: Arc<dyn Visibility>,
    storage: Arc<dyn StorageFactory>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            allocator: Arc::new(SystemAllocator),
            visibility: Arc::new(AccessVisibility),
            storage: Arc::new(DefaultStorageFactory),
        }
    }

    pub fn allocator(mut self, allocator: Arc<dyn RawAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Predicate deciding which tables enumerations report
    pub fn visibility(mut self, visibility: Arc<dyn Visibility>) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn storage_factory(mut self, storage: Arc<dyn StorageFactory>) -> Self {
        self.storage = storage;
        self
    }

    pub fn start(self) -> ConfigResult<Arc<Engine>> {
        self.config.validate()?;
        let memory = Arc::new(DbMemory::with_options(
            self.allocator,
            self.config.realloc_always_moves,
        ));
        let progress = Arc::new(ThreadProgress::new());
        let registry = Arc::new(Registry::new(
            self.config.max_tables,
            Arc::clone(&memory),
            Arc::clone(&progress),
        ));
        let enumerator =
            AllTablesService::new(Arc::clone(&registry), self.visibility, Arc::clone(&memory));
        let fixations = FixationTracker::new(Arc::clone(&memory));

        info!(
            max_tables = self.config.max_tables,
            spin_count = ?self.config.spin_count,
            counter_shards = self.config.counter_shards,
            "engine started"
        );
        Ok(Arc::new(Engine {
            config: self.config,
            memory,
            progress,
            registry,
            fixations,
            enumerator,
            storage: self.storage,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct Engine {
    config: EngineConfig,
    memory: Arc<DbMemory>,
    progress: Arc<ThreadProgress>,
    registry: Arc<Registry>,
    fixations: FixationTracker,
    enumerator: AllTablesService,
    storage: Arc<dyn StorageFactory>,
    closed: AtomicBool,
}

impl Engine {
    /// Starts an engine with default collaborators
    pub fn start(config: EngineConfig) -> ConfigResult<Arc<Self>> {
        EngineBuilder::new(config).start()
    }

    /// Starts an engine configured from the environment
    pub fn from_env() -> ConfigResult<Arc<Self>> {
        Self::start(EngineConfig::from_env()?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<DbMemory> {
        &self.memory
    }

    pub fn progress(&self) -> &Arc<ThreadProgress> {
        &self.progress
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn enumerator(&self) -> &AllTablesService {
        &self.enumerator
    }

    // ---- table lifecycle ----

    pub fn create_table(
        &self,
        owner: ProcessId,
        name: &str,
        options: TableOptions,
    ) -> DbResult<TableId> {
        let id = self.registry.allocate_table_id();
        let counters = if options
            .decentralized_counters
            .unwrap_or(self.config.decentralized_counters)
        {
            ShardedCounter::decentralized(self.config.counter_shards)
        } else {
            ShardedCounter::centralized()
        };
        let table = TableBuilder::new(id, name.to_string(), owner)
            .named(options.named)
            .access(options.access)
            .counters(counters)
            .spin(self.config.spin_count)
            .build(self.storage.create(options.kind));
        debug_assert_eq!(table.kind(), options.kind);

        self.registry.register(Arc::new(table))?;
        debug!(table = %id, name, owner = %owner, kind = %options.kind, "table created");
        Ok(id)
    }

    /// Deletes a table; destruction is deferred while it is fixed
    pub fn delete_table(&self, caller: ProcessId, id: TableId) -> DbResult<DeleteOutcome> {
        let table = self.writable(caller, id)?;
        self.registry.delete(&table)
    }

    /// Identity of a named table
    pub fn whereis(&self, name: &str) -> DbResult<TableId> {
        self.registry.lookup_name(name).map(|t| t.table_id())
    }

    // ---- data operations ----

    pub fn insert(&self, caller: ProcessId, id: TableId, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.writable(caller, id)?.insert(&self.memory, key, value)
    }

    pub fn lookup(&self, caller: ProcessId, id: TableId, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        self.readable(caller, id)?.lookup(key)
    }

    pub fn remove_key(&self, caller: ProcessId, id: TableId, key: &[u8]) -> DbResult<bool> {
        self.writable(caller, id)?.remove(&self.memory, key)
    }

    pub fn table_size(&self, caller: ProcessId, id: TableId) -> DbResult<usize> {
        Ok(self.readable(caller, id)?.size())
    }

    fn readable(&self, caller: ProcessId, id: TableId) -> DbResult<Arc<Table>> {
        let table = self.registry.lookup(id)?;
        if !table.can_read(caller) {
            return Err(DbError::AccessDenied {
                table: id,
                process: caller,
            });
        }
        Ok(table)
    }

    fn writable(&self, caller: ProcessId, id: TableId) -> DbResult<Arc<Table>> {
        let table = self.registry.lookup(id)?;
        if !table.can_write(caller) {
            return Err(DbError::AccessDenied {
                table: id,
                process: caller,
            });
        }
        Ok(table)
    }

    // ---- fixation ----

    /// Fixes a table for `caller`; returns the number of fixing processes
    pub fn fix(&self, caller: ProcessId, id: TableId) -> DbResult<usize> {
        let table = self.readable(caller, id)?;
        self.fixations.fix(&table, caller)
    }

    /// Releases one fixation; completes a deferred deletion if it was the last
    pub fn unfix(&self, caller: ProcessId, id: TableId) -> DbResult<()> {
        if let Some(table) = self.fixations.unfix(id, caller)? {
            self.registry.destroy_payload(&table);
        }
        Ok(())
    }

    pub fn fix_count(&self, id: TableId) -> DbResult<usize> {
        Ok(self.registry.lookup(id)?.fix_count())
    }

    // ---- enumeration ----

    /// Lists every table visible to `requester`, possibly over several steps
    pub fn all_tables(&self, requester: ProcessId, budget: Option<usize>) -> AllTablesReply {
        self.enumerator
            .request(requester, budget.unwrap_or(self.config.scan_budget))
    }

    /// Resumes the parked enumeration for one step
    pub fn handle_yielded_all_request(&self, budget: usize) -> Option<AllTablesCompletion> {
        self.enumerator.step(budget)
    }

    pub fn cancel_all_tables(&self, requester: ProcessId) -> usize {
        self.enumerator.cancel(requester)
    }

    // ---- statistics ----

    pub fn table_count(&self) -> usize {
        self.registry.count()
    }

    pub fn colliding_names(&self, name: &str) -> Vec<String> {
        self.registry.colliding_names(name)
    }

    pub fn misc_memory_size(&self) -> usize {
        self.memory.misc_mem_size()
    }

    pub fn table_memory_size(&self, id: TableId) -> DbResult<usize> {
        Ok(self.registry.lookup(id)?.memory_size())
    }

    /// Auxiliary work a scheduler worker should pick up
    pub fn aux_work(&self) -> AuxWork {
        let mut work = AuxWork::NONE;
        if self.enumerator.has_pending_work() {
            work = work | AuxWork::ALL_TABLES_YIELD;
        }
        if self.progress.pending_count() > 0 {
            work = work | AuxWork::LATER_OP;
        }
        work
    }

    pub fn info(&self) -> EngineInfo {
        let mut tables = Vec::new();
        self.registry.foreach_table(|table| tables.push(table.info()));
        EngineInfo {
            table_count: self.registry.count(),
            linked_tables: self.registry.linked_count(),
            tombstoned_tables: self.registry.tombstoned_count(),
            max_tables: self.registry.max_tables(),
            misc_memory: self.memory.misc_mem_size(),
            epoch: self.progress.current_epoch(),
            pending_later_ops: self.progress.pending_count(),
            executed_later_ops: self.progress.executed_count(),
            fixing_processes: self.fixations.process_count(),
            tables,
        }
    }

    // ---- process lifecycle ----

    /// Cleans up after a terminated process
    ///
    /// Drops its enumeration requests, releases its fixations (completing
    /// deletions they were blocking) and deletes the tables it owns.
    pub fn on_process_exit(&self, process: ProcessId) -> ExitSummary {
        let cancelled_requests = self.enumerator.cancel(process);

        let unblocked = self.fixations.release_all(process);
        for table in &unblocked {
            self.registry.destroy_payload(table);
        }

        let owned: Vec<Arc<Table>> = self
            .registry
            .cursor()
            .filter(|t| t.is_alive() && t.owner() == process)
            .collect();
        let mut tables_deleted = 0;
        for table in owned {
            // A concurrent delete may have won
            if self.registry.delete(&table).is_ok() {
                tables_deleted += 1;
            }
        }

        let summary = ExitSummary {
            cancelled_requests,
            deletions_unblocked: unblocked.len(),
            tables_deleted,
        };
        debug!(process = %process, ?summary, "process exit handled");
        summary
    }

    /// Deletes every table and runs all outstanding reclamation
    ///
    /// Callers must have stopped issuing operations; scheduler workers may
    /// stay registered. Reclamation a live cursor could still observe runs
    /// when that cursor is dropped. Returns the number of later operations
    /// run now; repeated calls do nothing.
    pub fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }
        self.enumerator.shutdown();

        for process in self.fixations.processes() {
            for table in self.fixations.release_all(process) {
                self.registry.destroy_payload(&table);
            }
        }

        let tables: Vec<Arc<Table>> = self.registry.cursor().collect();
        for table in tables {
            if table.is_alive() {
                let _ = self.registry.delete(&table);
            } else {
                // Tombstoned while fixed; its holders are gone now
                self.registry.destroy_payload(&table);
            }
        }

        let drained = self.progress.drain_all();
        info!(
            drained,
            held_back = self.progress.pending_count(),
            misc_memory = self.memory.misc_mem_size(),
            "engine shut down"
        );
        drained
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
