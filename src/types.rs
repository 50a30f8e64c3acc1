use serde::{Deserialize, Serialize};
use std::fmt;

/// Global type definitions
///
/// Stores identifiers, enumerations, and constants used globally by the table engine

/// Default maximum number of live tables (overridable through configuration)
pub const DEFAULT_MAX_TABLES: usize = 8192;

/// Environment variable overriding the maximum table count
pub const MAX_TABLES_ENV: &str = "MEMTAB_MAX_TABLES";

/// Default enumeration work budget (tables visited per scheduling slice)
pub const DEFAULT_SCAN_BUDGET: usize = 1000;

/// Number of stripes in the table name index
pub const NAME_INDEX_STRIPES: usize = 256;

/// Opaque table identity, unique for the lifetime of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#Tab<{}>", self.0)
    }
}

/// Identity of a process (any entity that owns tables, fixes them or
/// requests enumerations)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<0.{}.0>", self.0)
    }
}

/// Identity of an "all tables" request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Storage variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// Linear hash table
    #[default]
    Hash,
    /// Balanced (AVL) tree
    Tree,
    /// Contention adapting tree
    CaTree,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Hash => write!(f, "hash"),
            TableKind::Tree => write!(f, "tree"),
            TableKind::CaTree => write!(f, "catree"),
        }
    }
}

/// Table access level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableAccess {
    /// Only the owner may read or write
    Private,
    /// Everyone may read, only the owner may write
    #[default]
    Protected,
    /// Everyone may read and write
    Public,
}

impl fmt::Display for TableAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableAccess::Private => write!(f, "private"),
            TableAccess::Protected => write!(f, "protected"),
            TableAccess::Public => write!(f, "public"),
        }
    }
}

/// Lifecycle status of a table header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TableStatus {
    /// Visible to lookups and enumerations
    Alive = 0,
    /// Deleted; payload possibly still pending destruction
    Tombstoned = 1,
    /// Payload destroyed and node unlinked from the registry
    Reclaimed = 2,
}

impl TableStatus {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TableStatus::Alive,
            1 => TableStatus::Tombstoned,
            _ => TableStatus::Reclaimed,
        }
    }
}

/// Get current timestamp in seconds since the Unix epoch
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
