use super::*;
use crate::memory::SystemAllocator;
use crate::table::{DefaultStorageFactory, StorageFactory, TableBuilder};
use crate::types::TableKind;

fn setup() -> (Arc<DbMemory>, FixationTracker) {
    let memory = Arc::new(DbMemory::new(Arc::new(SystemAllocator)));
    let tracker = FixationTracker::new(Arc::clone(&memory));
    (memory, tracker)
}

fn make_table(id: u64) -> Arc<Table> {
    Arc::new(
        TableBuilder::new(TableId(id), format!("t{}", id), ProcessId(1))
            .build(DefaultStorageFactory.create(TableKind::Hash)),
    )
}

#[test]
fn test_fix_and_unfix_counts() {
    let (memory, tracker) = setup();
    let table = make_table(1);
    let p1 = ProcessId(10);
    let p2 = ProcessId(11);

    assert_eq!(tracker.fix(&table, p1).unwrap(), 1);
    assert_eq!(tracker.fix(&table, p1).unwrap(), 1);
    assert_eq!(tracker.fix(&table, p2).unwrap(), 2);
    assert_eq!(table.fix_count(), 2);
    assert_eq!(table.fixation().count_for(p1), 2);
    assert_eq!(memory.misc_mem_size(), 2 * FIXATION_RECORD_SIZE);

    // Nested fix needs two releases
    assert!(tracker.unfix(table.table_id(), p1).unwrap().is_none());
    assert_eq!(table.fix_count(), 2);
    assert!(tracker.unfix(table.table_id(), p1).unwrap().is_none());
    assert_eq!(table.fix_count(), 1);
    assert!(tracker.fixed_by(p1).is_empty());

    assert!(tracker.unfix(table.table_id(), p2).unwrap().is_none());
    assert_eq!(table.fix_count(), 0);
    assert_eq!(tracker.process_count(), 0);
    assert_eq!(memory.misc_mem_size(), 0);
}

#[test]
fn test_unfix_without_fix_is_rejected() {
    let (_memory, tracker) = setup();
    let table = make_table(1);

    let err = tracker.unfix(table.table_id(), ProcessId(3)).unwrap_err();
    assert_eq!(
        err,
        DbError::NotFixed {
            table: TableId(1),
            process: ProcessId(3)
        }
    );
}

#[test]
fn test_fix_deleted_table_fails() {
    let (_memory, tracker) = setup();
    let table = make_table(1);
    assert!(table.mark_tombstoned());

    assert_eq!(
        tracker.fix(&table, ProcessId(2)),
        Err(DbError::NoSuchTable(TableId(1)))
    );
}

#[test]
fn test_last_unfix_makes_deletion_due() {
    let (_memory, tracker) = setup();
    let table = make_table(4);
    let p1 = ProcessId(1);
    let p2 = ProcessId(2);
    tracker.fix(&table, p1).unwrap();
    tracker.fix(&table, p2).unwrap();

    {
        let mut state = table.fixation();
        assert!(table.mark_tombstoned());
        state.set_delete_pending();
    }

    assert!(tracker.unfix(table.table_id(), p1).unwrap().is_none());
    let due = tracker.unfix(table.table_id(), p2).unwrap();
    assert_eq!(due.map(|t| t.table_id()), Some(TableId(4)));
    assert!(!table.fixation().is_delete_pending());
}

#[test]
fn test_release_all_on_exit() {
    let (memory, tracker) = setup();
    let pending = make_table(1);
    let other = make_table(2);
    let shared = make_table(3);
    let exiting = ProcessId(9);
    let survivor = ProcessId(8);

    for table in [&pending, &other, &shared] {
        tracker.fix(table, exiting).unwrap();
    }
    tracker.fix(&shared, survivor).unwrap();
    assert_eq!(tracker.fixed_by(exiting), vec![TableId(1), TableId(2), TableId(3)]);

    for table in [&pending, &shared] {
        let mut state = table.fixation();
        assert!(table.mark_tombstoned());
        state.set_delete_pending();
    }

    let due = tracker.release_all(exiting);
    // Table 3 is still fixed by the survivor
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].table_id(), TableId(1));
    assert!(tracker.fixed_by(exiting).is_empty());
    assert_eq!(shared.fix_count(), 1);
    assert_eq!(memory.misc_mem_size(), FIXATION_RECORD_SIZE);

    let due = tracker.unfix(TableId(3), survivor).unwrap();
    assert!(due.is_some());
    assert!(tracker.release_all(exiting).is_empty());
}

#[test]
fn test_holders_kept_in_fixation_order() {
    let (_memory, tracker) = setup();
    let table = make_table(1);
    for pid in [5, 3, 7] {
        tracker.fix(&table, ProcessId(pid)).unwrap();
    }
    let holders: Vec<u64> = table.fixation().holders().iter().map(|(p, _)| p.0).collect();
    assert_eq!(holders, vec![5, 3, 7]);
}
