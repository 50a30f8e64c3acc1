//! Memtab in-memory table engine library
//!
//! Table metadata and lifecycle layer: registry of live and tombstoned
//! tables, cooperative table enumeration, sharded memory accounting,
//! deferred reclamation and fixation tracking.

// Global type definitions
pub mod config;
pub mod error;
pub mod types;

// Import various modules
pub mod engine;
pub mod enumerator;
pub mod fixation;
pub mod infrastructure;
pub mod memory;
pub mod reclaim;
pub mod registry;
pub mod scheduler;
pub mod table;

// Re-export engine items for easier access
pub use engine::{Engine, EngineBuilder, EngineInfo, ExitSummary, TableOptions};
pub use enumerator::{AllTablesCompletion, AllTablesReply};

// Re-export error items for easier access
pub use config::{ConfigError, EngineConfig};
pub use error::{DbError, DbResult};
