mod common;

use granite::errors::ExecutionError;
use granite::executor::execute;
use granite::expression::Expression;
use granite::plan::PlanNode;
use granite::types::Value;
use stratum::transaction::TransactionState;

fn update_v_plan(table_oid: u32, new_v: i64) -> PlanNode {
    PlanNode::Update {
        table_oid,
        target_exprs: vec![
            Expression::column(0),
            Expression::constant(Value::Integer(new_v)),
        ],
        child: Box::new(PlanNode::SeqScan {
            table_oid,
            filter: None,
        }),
    }
}

fn delete_all_plan(table_oid: u32) -> PlanNode {
    PlanNode::Delete {
        table_oid,
        child: Box::new(PlanNode::SeqScan {
            table_oid,
            filter: None,
        }),
    }
}

#[test]
fn snapshot_reader_keeps_its_version_across_later_commits() {
    let db = common::setup("snapshot_reader");
    let table = db.create_id_v_table("t");

    // Writer inserts and commits at ts 1.
    let t1 = db.begin();
    assert_eq!(db.insert_rows(&t1, &table, vec![vec![1, 1]]), 1);
    assert!(db.commit(&t1));

    // Reader pins its snapshot at ts 1.
    let t2 = db.begin();
    assert_eq!(t2.read_ts(), 1);

    // A later writer updates the row to v = 2 and commits at ts 2.
    let t3 = db.begin();
    let ctx3 = db.ctx(&t3);
    execute(&update_v_plan(table.oid, 2), &ctx3).unwrap();
    assert!(db.commit(&t3));

    // The reader still sees v = 1; a fresh transaction sees v = 2.
    assert_eq!(db.scan_ints(&t2, &table), vec![vec![1, 1]]);
    let t4 = db.begin();
    assert_eq!(db.scan_ints(&t4, &table), vec![vec![1, 2]]);
}

#[test]
fn second_updater_is_tainted_and_cannot_commit() {
    let db = common::setup("write_write_conflict");
    let table = db.create_id_v_table("t");

    let setup = db.begin();
    db.insert_rows(&setup, &table, vec![vec![1, 1]]);
    assert!(db.commit(&setup));

    // First updater holds the row uncommitted.
    let t1 = db.begin();
    let ctx1 = db.ctx(&t1);
    execute(&update_v_plan(table.oid, 10), &ctx1).unwrap();

    // Second updater hits the live stamp and is tainted.
    let t2 = db.begin();
    let ctx2 = db.ctx(&t2);
    let err = execute(&update_v_plan(table.oid, 20), &ctx2).unwrap_err();
    assert!(matches!(err, ExecutionError::WriteWriteConflict(_)));
    assert_eq!(t2.state(), TransactionState::Tainted);

    // A tainted transaction may not commit; abort is always legal.
    let catalog = db.catalog.clone();
    assert!(db.txn_mgr.commit(&t2, move |oid| catalog.heap_of(oid)).is_err());
    db.abort(&t2);

    // The first updater is unaffected.
    assert!(db.commit(&t1));
    let reader = db.begin();
    assert_eq!(db.scan_ints(&reader, &table), vec![vec![1, 10]]);
}

#[test]
fn own_writes_are_visible_before_commit_and_hidden_from_others() {
    let db = common::setup("own_writes");
    let table = db.create_id_v_table("t");

    let writer = db.begin();
    db.insert_rows(&writer, &table, vec![vec![7, 70]]);
    assert_eq!(db.scan_ints(&writer, &table), vec![vec![7, 70]]);

    let other = db.begin();
    assert!(db.scan_ints(&other, &table).is_empty());

    assert!(db.commit(&writer));
    // The concurrent reader's snapshot predates the commit.
    assert!(db.scan_ints(&other, &table).is_empty());
}

#[test]
fn aborted_writes_stay_invisible() {
    let db = common::setup("aborted_writes");
    let table = db.create_id_v_table("t");

    let writer = db.begin();
    db.insert_rows(&writer, &table, vec![vec![1, 1], vec![2, 2]]);
    db.abort(&writer);

    let reader = db.begin();
    assert!(db.scan_ints(&reader, &table).is_empty());
}

#[test]
fn deletes_are_snapshot_isolated() {
    let db = common::setup("delete_visibility");
    let table = db.create_id_v_table("t");

    let setup = db.begin();
    db.insert_rows(&setup, &table, vec![vec![1, 1]]);
    assert!(db.commit(&setup));

    // Reader before the delete commits.
    let early_reader = db.begin();

    let deleter = db.begin();
    let ctx = db.ctx(&deleter);
    let result = execute(&delete_all_plan(table.oid), &ctx).unwrap();
    assert_eq!(result[0].0.value(0), &Value::Integer(1));
    assert!(db.commit(&deleter));

    // The old snapshot reconstructs the row through the undo chain; a new
    // snapshot sees the deletion.
    assert_eq!(db.scan_ints(&early_reader, &table), vec![vec![1, 1]]);
    let late_reader = db.begin();
    assert!(db.scan_ints(&late_reader, &table).is_empty());
}

#[test]
fn same_transaction_insert_then_update_then_commit() {
    let db = common::setup("insert_update_same_txn");
    let table = db.create_id_v_table("t");

    let writer = db.begin();
    db.insert_rows(&writer, &table, vec![vec![1, 1]]);
    let ctx = db.ctx(&writer);
    execute(&update_v_plan(table.oid, 5), &ctx).unwrap();
    assert_eq!(db.scan_ints(&writer, &table), vec![vec![1, 5]]);

    let concurrent = db.begin();
    assert!(db.scan_ints(&concurrent, &table).is_empty());

    assert!(db.commit(&writer));
    let reader = db.begin();
    assert_eq!(db.scan_ints(&reader, &table), vec![vec![1, 5]]);
}

#[test]
fn repeated_updates_extend_one_undo_log_and_keep_the_pre_image() {
    let db = common::setup("repeated_updates");
    let table = db.create_id_v_table("t");

    let setup = db.begin();
    db.insert_rows(&setup, &table, vec![vec![1, 1]]);
    assert!(db.commit(&setup));

    let reader = db.begin();

    // Two updates in one transaction touch the same row; the second must
    // extend the first's undo log rather than chain a second one.
    let writer = db.begin();
    let ctx = db.ctx(&writer);
    execute(&update_v_plan(table.oid, 2), &ctx).unwrap();
    let logs_after_first = writer.undo_log_num();
    execute(&update_v_plan(table.oid, 3), &ctx).unwrap();
    assert_eq!(writer.undo_log_num(), logs_after_first);
    assert!(db.commit(&writer));

    // The old reader reconstructs the original version through that log.
    assert_eq!(db.scan_ints(&reader, &table), vec![vec![1, 1]]);
    let fresh = db.begin();
    assert_eq!(db.scan_ints(&fresh, &table), vec![vec![1, 3]]);
}

#[test]
fn commits_visible_to_later_transactions() {
    let db = common::setup("later_txns_observe");
    let table = db.create_id_v_table("t");

    let t1 = db.begin();
    db.insert_rows(&t1, &table, vec![vec![1, 1]]);
    assert!(db.commit(&t1));

    // Every transaction begun after the commit observes the write.
    let t2 = db.begin();
    assert!(t2.read_ts() >= t1.commit_ts());
    assert_eq!(db.scan_ints(&t2, &table), vec![vec![1, 1]]);
}

#[test]
fn garbage_collection_below_the_watermark_preserves_live_views() {
    let db = common::setup("watermark_gc");
    let table = db.create_id_v_table("t");

    let setup = db.begin();
    db.insert_rows(&setup, &table, vec![vec![1, 1]]);
    assert!(db.commit(&setup));

    let writer = db.begin();
    let ctx = db.ctx(&writer);
    execute(&update_v_plan(table.oid, 2), &ctx).unwrap();
    assert!(db.commit(&writer));

    // All snapshots begin after both commits; the pre-image log is below
    // the watermark and collectable.
    let reader = db.begin();
    assert_eq!(db.txn_mgr.watermark(), reader.read_ts());
    db.txn_mgr.garbage_collection();

    assert_eq!(db.scan_ints(&reader, &table), vec![vec![1, 2]]);
}

#[test]
fn serializable_transaction_with_undisturbed_write_set_commits() {
    let db = common::setup("serializable_commit");
    let table = db.create_id_v_table("t");

    let setup = db.begin();
    db.insert_rows(&setup, &table, vec![vec![1, 1]]);
    assert!(db.commit(&setup));

    let txn = db.begin_serializable();
    let ctx = db.ctx(&txn);
    execute(&update_v_plan(table.oid, 9), &ctx).unwrap();
    assert!(db.commit(&txn));
    assert_eq!(txn.state(), TransactionState::Committed);
}
