use super::*;
use crate::memory::testing::TrackingAllocator;
use crate::table::{DefaultStorageFactory, StorageFactory, TableBuilder};
use crate::types::{ProcessId, TableKind};
use std::thread;

struct Fixture {
    tracker: Arc<TrackingAllocator>,
    memory: Arc<DbMemory>,
    progress: Arc<ThreadProgress>,
    registry: Arc<Registry>,
}

fn setup(max_tables: usize) -> Fixture {
    let tracker = Arc::new(TrackingAllocator::new());
    let memory = Arc::new(DbMemory::new(tracker.clone()));
    let progress = Arc::new(ThreadProgress::new());
    let registry = Arc::new(Registry::new(
        max_tables,
        Arc::clone(&memory),
        Arc::clone(&progress),
    ));
    Fixture {
        tracker,
        memory,
        progress,
        registry,
    }
}

fn create(fx: &Fixture, name: &str, named: bool) -> DbResult<Arc<Table>> {
    let id = fx.registry.allocate_table_id();
    let table = Arc::new(
        TableBuilder::new(id, name.to_string(), ProcessId(1))
            .named(named)
            .build(DefaultStorageFactory.create(TableKind::Hash)),
    );
    fx.registry.register(Arc::clone(&table))?;
    Ok(table)
}

fn cursor_ids(registry: &Registry) -> Vec<TableId> {
    registry.cursor().map(|t| t.table_id()).collect()
}

#[test]
fn test_register_and_lookup() {
    let fx = setup(16);
    let a = create(&fx, "a", true).unwrap();
    let b = create(&fx, "b", false).unwrap();

    assert_eq!(fx.registry.count(), 2);
    assert_eq!(fx.registry.lookup(a.table_id()).unwrap().name(), "a");
    assert_eq!(fx.registry.lookup_name("a").unwrap().table_id(), a.table_id());
    // Unnamed tables are not reachable by name
    assert_eq!(
        fx.registry.lookup_name("b").unwrap_err(),
        DbError::NameNotFound("b".to_string())
    );
    assert_eq!(a.memory_size(), TABLE_HEADER_SIZE);
    assert_eq!(fx.memory.misc_mem_size(), 2 * TABLE_NODE_SIZE);

    // Newest first
    assert_eq!(cursor_ids(&fx.registry), vec![b.table_id(), a.table_id()]);
}

#[test]
fn test_system_limit() {
    let fx = setup(2);
    create(&fx, "a", false).unwrap();
    create(&fx, "b", false).unwrap();
    assert_eq!(create(&fx, "c", false).unwrap_err(), DbError::SystemLimit(2));
    assert_eq!(fx.registry.count(), 2);
    assert_eq!(fx.registry.linked_count(), 2);
}

#[test]
fn test_duplicate_names() {
    let fx = setup(16);
    create(&fx, "users", true).unwrap();
    assert_eq!(
        create(&fx, "users", true).unwrap_err(),
        DbError::TableAlreadyExists("users".to_string())
    );
    // The same name is fine for unnamed tables
    create(&fx, "users", false).unwrap();
    assert_eq!(fx.registry.count(), 2);
}

#[test]
fn test_delete_then_reclaim() {
    let fx = setup(16);
    let table = create(&fx, "doomed", true).unwrap();
    table.insert(&fx.memory, b"key", b"value").unwrap();
    assert_eq!(fx.tracker.live_blocks(), 1);

    let outcome = fx.registry.delete(&table).unwrap();
    assert_eq!(outcome, DeleteOutcome::Destroyed);
    assert_eq!(table.status(), TableStatus::Tombstoned);
    assert_eq!(fx.registry.count(), 0);
    assert_eq!(fx.registry.linked_count(), 1);
    assert_eq!(fx.registry.tombstoned_count(), 1);
    assert!(fx.registry.lookup(table.table_id()).is_err());
    assert!(fx.registry.lookup_name("doomed").is_err());
    // Payload bytes credited immediately, block still allocated
    assert_eq!(table.memory_size(), TABLE_HEADER_SIZE);
    assert_eq!(fx.tracker.live_blocks(), 1);

    // Payload op then node op
    assert_eq!(fx.progress.try_flush(), 2);
    assert_eq!(table.status(), TableStatus::Reclaimed);
    assert_eq!(table.memory_size(), 0);
    assert_eq!(fx.tracker.live_blocks(), 0);
    assert_eq!(fx.registry.linked_count(), 0);
    assert_eq!(fx.memory.misc_mem_size(), 0);

    // The name can be reused
    create(&fx, "doomed", true).unwrap();
}

#[test]
fn test_double_delete_fails() {
    let fx = setup(16);
    let table = create(&fx, "t", false).unwrap();
    fx.registry.delete(&table).unwrap();
    assert_eq!(
        fx.registry.delete(&table).unwrap_err(),
        DbError::NoSuchTable(table.table_id())
    );
}

#[test]
fn test_fixed_table_deletion_is_deferred() {
    let fx = setup(16);
    let table = create(&fx, "t", false).unwrap();
    let fixations = crate::fixation::FixationTracker::new(Arc::clone(&fx.memory));
    fixations.fix(&table, ProcessId(5)).unwrap();

    let outcome = fx.registry.delete(&table).unwrap();
    assert_eq!(outcome, DeleteOutcome::Deferred { fix_count: 1 });
    assert_eq!(fx.progress.try_flush(), 0);
    assert_eq!(fx.registry.linked_count(), 1);

    let due = fixations.unfix(table.table_id(), ProcessId(5)).unwrap();
    fx.registry.destroy_payload(&due.unwrap());
    assert_eq!(fx.progress.try_flush(), 2);
    assert_eq!(table.status(), TableStatus::Reclaimed);
}

#[test]
fn test_cursor_survives_deletion_of_current_node() {
    let fx = setup(16);
    let a = create(&fx, "a", false).unwrap();
    let b = create(&fx, "b", false).unwrap();
    let c = create(&fx, "c", false).unwrap();

    let mut cursor = fx.registry.cursor();
    assert_eq!(cursor.next_table().unwrap().table_id(), c.table_id());

    // Delete the table the cursor points at next and the one it just left
    fx.registry.delete(&b).unwrap();
    fx.registry.delete(&c).unwrap();
    // The parked cursor holds back reclamation
    assert_eq!(fx.progress.try_flush(), 0);
    assert_eq!(fx.registry.linked_count(), 3);

    let rest: Vec<TableId> = cursor.by_ref().map(|t| t.table_id()).collect();
    assert_eq!(rest, vec![b.table_id(), a.table_id()]);
    drop(cursor);

    assert_eq!(fx.progress.try_flush(), 4);
    assert_eq!(cursor_ids(&fx.registry), vec![a.table_id()]);
}

#[test]
fn test_tables_created_during_scan_are_not_visited() {
    let fx = setup(16);
    let a = create(&fx, "a", false).unwrap();

    let mut cursor = fx.registry.cursor();
    let late = create(&fx, "late", false).unwrap();
    assert_eq!(cursor.next_table().unwrap().table_id(), a.table_id());
    assert!(cursor.next_table().is_none());
    assert!(cursor.is_exhausted());

    assert_eq!(cursor_ids(&fx.registry), vec![late.table_id(), a.table_id()]);
}

#[test]
fn test_colliding_names_excludes_self() {
    let fx = setup(16);
    create(&fx, "alpha", true).unwrap();
    assert!(fx.registry.colliding_names("alpha").is_empty());
}

#[test]
fn test_foreach_table_includes_tombstones() {
    let fx = setup(16);
    let a = create(&fx, "a", false).unwrap();
    create(&fx, "b", false).unwrap();
    let _pin = fx.progress.pin();
    fx.registry.delete(&a).unwrap();

    let mut statuses = Vec::new();
    fx.registry.foreach_table(|t| statuses.push(t.status()));
    assert_eq!(statuses, vec![TableStatus::Alive, TableStatus::Tombstoned]);
}

#[test]
fn test_concurrent_churn_with_cursors() {
    let fx = setup(1024);
    let registry = Arc::clone(&fx.registry);
    let memory = Arc::clone(&fx.memory);
    let progress = Arc::clone(&fx.progress);

    let churn = {
        let registry = Arc::clone(&registry);
        let memory = Arc::clone(&memory);
        let progress = Arc::clone(&progress);
        thread::spawn(move || {
            for round in 0..200 {
                let id = registry.allocate_table_id();
                let table = Arc::new(
                    TableBuilder::new(id, format!("churn{}", round), ProcessId(1))
                        .build(DefaultStorageFactory.create(TableKind::Tree)),
                );
                registry.register(Arc::clone(&table)).unwrap();
                table.insert(&memory, b"k", b"v").unwrap();
                registry.delete(&table).unwrap();
                progress.try_flush();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let progress = Arc::clone(&progress);
            thread::spawn(move || {
                for _ in 0..200 {
                    for table in registry.cursor() {
                        // Touch the header of every reachable node
                        let _ = table.status();
                        let _ = table.name().len();
                    }
                    progress.try_flush();
                }
            })
        })
        .collect();

    churn.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    fx.progress.try_flush();

    assert_eq!(fx.registry.count(), 0);
    assert_eq!(fx.registry.linked_count(), 0);
    assert_eq!(fx.tracker.live_blocks(), 0);
    assert_eq!(fx.memory.misc_mem_size(), 0);
}
