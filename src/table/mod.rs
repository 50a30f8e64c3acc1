//! Table headers and variant payloads
//!
//! This module implements the per-table state shared by all storage
//! variants:
//! - Header with identity, owner, status and fixation state
//! - Sharded memory counter charged by every entry allocation
//! - Variant payload behind a spin-then-park table lock

pub mod builder;
pub mod storage;
pub mod table;

pub use builder::TableBuilder;
pub use storage::{
    DbTerm, DefaultStorageFactory, HashStorage, OrderedStorage, StorageFactory, TableStorage,
};
pub use table::{Table, TableInfo, TABLE_HEADER_SIZE};
