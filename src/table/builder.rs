//! TableBuilder for fluent table construction
//!
//! Provides a builder pattern for creating table headers with:
//! - Identity, name and owner
//! - Access level and name registration
//! - Memory counter mode and lock spin level

use crate::config::SpinCount;
use crate::infrastructure::counter::ShardedCounter;
use crate::infrastructure::lwlock::TableLock;
use crate::table::{Table, TableStorage};
use crate::types::{current_timestamp, ProcessId, TableAccess, TableId};

/// Builder for constructing [`Table`] headers
///
/// # Example
/// ```
/// use memtab::table::{DefaultStorageFactory, StorageFactory, TableBuilder};
/// use memtab::types::{ProcessId, TableAccess, TableId, TableKind};
///
/// let storage = DefaultStorageFactory.create(TableKind::Tree);
/// let table = TableBuilder::new(TableId(1), "users".to_string(), ProcessId(7))
///     .named(true)
///     .access(TableAccess::Public)
///     .build(storage);
/// assert_eq!(table.kind(), TableKind::Tree);
/// ```
#[derive(Debug)]
pub struct TableBuilder {
    table_id: TableId,
    name: String,
    owner: ProcessId,
    named: bool,
    access: TableAccess,
    counters: Option<ShardedCounter>,
    spin: SpinCount,
}

impl TableBuilder {
    /// Create a new table builder with required fields
    pub fn new(table_id: TableId, name: String, owner: ProcessId) -> Self {
        Self {
            table_id,
            name,
            owner,
            named: false,
            access: TableAccess::default(),
            counters: None,
            spin: SpinCount::default(),
        }
    }

    /// Register the table under its name
    pub fn named(mut self, named: bool) -> Self {
        self.named = named;
        self
    }

    pub fn access(mut self, access: TableAccess) -> Self {
        self.access = access;
        self
    }

    /// Use an explicit memory counter (centralized by default)
    pub fn counters(mut self, counters: ShardedCounter) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Spread memory accounting over `shards` cells
    pub fn decentralized(self, shards: usize) -> Self {
        self.counters(ShardedCounter::decentralized(shards))
    }

    /// Set the table lock spin level
    pub fn spin(mut self, spin: SpinCount) -> Self {
        self.spin = spin;
        self
    }

    /// Build the header around `storage`; the kind is taken from the payload
    pub fn build(self, storage: Box<dyn TableStorage>) -> Table {
        let kind = storage.kind();
        Table::from_parts(
            self.table_id,
            self.name,
            self.named,
            self.owner,
            kind,
            self.access,
            current_timestamp(),
            TableLock::with_spin(Some(storage), self.spin),
            self.counters.unwrap_or_default(),
        )
    }
}
