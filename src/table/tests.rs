use super::*;
use crate::error::DbError;
use crate::memory::testing::TrackingAllocator;
use crate::memory::DbMemory;
use crate::types::{ProcessId, TableAccess, TableId, TableKind, TableStatus};
use std::sync::Arc;

fn setup_table(kind: TableKind) -> (Arc<TrackingAllocator>, DbMemory, Table) {
    let tracker = Arc::new(TrackingAllocator::new());
    let mem = DbMemory::new(tracker.clone());
    let table = TableBuilder::new(TableId(1), "t".to_string(), ProcessId(1))
        .build(DefaultStorageFactory.create(kind));
    (tracker, mem, table)
}

#[test]
fn test_insert_lookup_remove_accounting() {
    let (tracker, mem, table) = setup_table(TableKind::Hash);

    table.insert(&mem, b"a", b"hello").unwrap();
    assert_eq!(table.size(), 1);
    assert_eq!(table.memory_size(), 6);
    assert_eq!(table.lookup(b"a").unwrap(), Some(b"hello".to_vec()));
    assert_eq!(table.lookup(b"missing").unwrap(), None);

    // Replacing the value resizes the block
    table.insert(&mem, b"a", b"hello world").unwrap();
    assert_eq!(table.size(), 1);
    assert_eq!(table.memory_size(), 12);
    assert_eq!(table.lookup(b"a").unwrap(), Some(b"hello world".to_vec()));

    table.insert(&mem, b"a", b"").unwrap();
    assert_eq!(table.memory_size(), 1);

    assert!(table.remove(&mem, b"a").unwrap());
    assert!(!table.remove(&mem, b"a").unwrap());
    assert_eq!(table.memory_size(), 0);
    assert_eq!(tracker.live_blocks(), 0);
    assert_eq!(mem.misc_mem_size(), 0);
}

#[test]
fn test_ordered_storage_iterates_in_key_order() {
    for kind in [TableKind::Tree, TableKind::CaTree] {
        let (_tracker, mem, table) = setup_table(kind);
        for key in [b"c", b"a", b"b"] {
            table.insert(&mem, key, b"v").unwrap();
        }

        let mut keys = Vec::new();
        table.for_each(&mut |key, _| keys.push(key.to_vec())).unwrap();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        for term in table.take_payload().unwrap().into_terms() {
            term.free(&mem, &table);
        }
        assert_eq!(table.memory_size(), 0);
    }
}

#[test]
fn test_out_of_memory_is_reported() {
    let tracker = Arc::new(TrackingAllocator::with_limit(8));
    let mem = DbMemory::new(tracker.clone());
    let table = TableBuilder::new(TableId(5), "small".to_string(), ProcessId(1))
        .build(DefaultStorageFactory.create(TableKind::Hash));

    table.insert(&mem, b"key1", b"val1").unwrap();
    let err = table.insert(&mem, b"key2", b"val2").unwrap_err();
    assert_eq!(
        err,
        DbError::OutOfMemory {
            table: TableId(5),
            requested: 8
        }
    );

    // A failed resize keeps the old value and accounting
    let err = table.insert(&mem, b"key1", b"longer value").unwrap_err();
    assert!(matches!(err, DbError::OutOfMemory { .. }));
    assert_eq!(table.lookup(b"key1").unwrap(), Some(b"val1".to_vec()));
    assert_eq!(table.memory_size(), 8);
    assert_eq!(table.size(), 1);
}

#[test]
fn test_realloc_always_moves_preserves_entry() {
    let tracker = Arc::new(TrackingAllocator::new());
    let mem = DbMemory::with_options(tracker.clone(), true);
    let table = TableBuilder::new(TableId(1), "moves".to_string(), ProcessId(1))
        .build(DefaultStorageFactory.create(TableKind::Tree));

    table.insert(&mem, b"key", b"one").unwrap();
    table.insert(&mem, b"key", b"three").unwrap();
    assert_eq!(table.lookup(b"key").unwrap(), Some(b"three".to_vec()));
    assert_eq!(table.memory_size(), 8);
    assert_eq!(tracker.live_blocks(), 1);
    // The move released the original block
    assert_eq!(tracker.free_count(), 1);
}

#[test]
fn test_tombstoned_table_rejects_operations() {
    let (_tracker, mem, table) = setup_table(TableKind::Hash);
    table.insert(&mem, b"k", b"v").unwrap();

    assert!(table.mark_tombstoned());
    assert!(!table.mark_tombstoned());
    assert_eq!(table.status(), TableStatus::Tombstoned);
    assert_eq!(table.size(), 0);
    assert_eq!(table.lookup(b"k"), Err(DbError::NoSuchTable(TableId(1))));
    assert_eq!(
        table.insert(&mem, b"k2", b"v"),
        Err(DbError::NoSuchTable(TableId(1)))
    );

    // Payload is still present until destruction
    let payload = table.take_payload().unwrap();
    assert_eq!(payload.len(), 1);
    assert_eq!(payload.memory_size(), 2);
    assert!(table.take_payload().is_none());
    for term in payload.into_terms() {
        term.free(&mem, &table);
    }
}

#[test]
fn test_access_rights() {
    let owner = ProcessId(1);
    let other = ProcessId(2);
    let build = |access| {
        TableBuilder::new(TableId(1), "acl".to_string(), owner)
            .access(access)
            .build(DefaultStorageFactory.create(TableKind::Hash))
    };

    let private = build(TableAccess::Private);
    assert!(private.can_read(owner) && private.can_write(owner));
    assert!(!private.can_read(other) && !private.can_write(other));

    let protected = build(TableAccess::Protected);
    assert!(protected.can_read(other));
    assert!(!protected.can_write(other));

    let public = build(TableAccess::Public);
    assert!(public.can_read(other) && public.can_write(other));
}

#[test]
fn test_table_info_snapshot() {
    let (_tracker, mem, table) = setup_table(TableKind::Tree);
    table.insert(&mem, b"ab", b"cd").unwrap();

    let info = table.info();
    assert_eq!(info.id, TableId(1));
    assert_eq!(info.kind, TableKind::Tree);
    assert_eq!(info.size, 1);
    assert_eq!(info.memory, 4);
    assert_eq!(info.status, TableStatus::Alive);
    assert_eq!(info.fix_count, 0);

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["kind"], "tree");
    assert_eq!(json["status"], "alive");

    for term in table.take_payload().unwrap().into_terms() {
        term.free(&mem, &table);
    }
}
