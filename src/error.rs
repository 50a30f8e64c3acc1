//! Engine error definitions

use crate::types::{ProcessId, TableId};
use thiserror::Error;

/// User-visible failure conditions
///
/// Accounting and reclamation problems never surface here; they are
/// internal invariants checked with debug assertions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    /// Table does not exist or has already been deleted
    #[error("No such table: {0}")]
    NoSuchTable(TableId),
    /// No live named table carries this name
    #[error("No table named: {0}")]
    NameNotFound(String),
    /// A named table with this name already exists
    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),
    /// The configured maximum number of tables is reached
    #[error("System limit reached: at most {0} tables")]
    SystemLimit(usize),
    /// The allocator could not satisfy a failure-not-fatal request
    #[error("Out of memory allocating {requested} bytes for table {table}")]
    OutOfMemory { table: TableId, requested: usize },
    /// The caller's rights on the table do not allow the operation
    #[error("Process {process} may not access table {table}")]
    AccessDenied { table: TableId, process: ProcessId },
    /// The caller holds no fixation on the table
    #[error("Table {table} is not fixed by {process}")]
    NotFixed { table: TableId, process: ProcessId },
}

/// Result type for engine operations
pub type DbResult<T> = Result<T, DbError>;
