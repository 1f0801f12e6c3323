//! Scenario 3 (spec.md §8): a reader pinned to a snapshot never observes a
//! writer's later commit, while a fresh reader started after that commit
//! sees it.

use decentdb::{ColumnDef, ColumnKind, Config, Database, Value};
use tempfile::tempdir;

fn pk_col(name: &str) -> ColumnDef {
    ColumnDef {
        name: name.into(),
        kind: ColumnKind::Integer,
        not_null: true,
        unique: true,
        primary_key: true,
        foreign_key: None,
    }
}

fn count_rows(db: &Database, table: &str) -> usize {
    let mut cursor = db.scan_table(table).unwrap();
    let mut n = 0;
    while cursor.next().unwrap().is_some() {
        n += 1;
    }
    n
}

fn count_rows_at(db: &Database, table: &str, reader: &decentdb::ReadTxn<'_>) -> usize {
    let mut cursor = db.scan_table_at(table, reader).unwrap();
    let mut n = 0;
    while cursor.next().unwrap().is_some() {
        n += 1;
    }
    n
}

#[test]
fn reader_repeated_query_is_stable_across_a_later_writer_commit() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.ddb");
    let db = Database::open(&path, Config::default()).unwrap();

    let txn = db.begin_write();
    db.create_table("t", vec![pk_col("id")]).unwrap();
    for _ in 0..10 {
        db.insert_row("t", vec![Value::Null]).unwrap();
    }
    db.commit(txn).unwrap();

    let reader = db.begin_read();
    let snapshot_lsn = reader.snapshot_lsn();
    assert_eq!(count_rows(&db, "t"), 10);

    let txn = db.begin_write();
    for _ in 0..5 {
        db.insert_row("t", vec![Value::Null]).unwrap();
    }
    db.commit(txn).unwrap();

    // The writer's commit must not move a reader already holding a snapshot.
    assert_eq!(reader.snapshot_lsn(), snapshot_lsn);

    // A fresh reader (and a plain scan, which opens its own snapshot) sees
    // everything committed so far.
    assert_eq!(count_rows(&db, "t"), 15);
    let later_reader = db.begin_read();
    assert!(later_reader.snapshot_lsn() > snapshot_lsn);

    drop(reader);
}

#[test]
fn reader_scanning_through_its_own_snapshot_never_sees_a_later_commit() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.ddb");
    let db = Database::open(&path, Config::default()).unwrap();

    let txn = db.begin_write();
    db.create_table("t", vec![pk_col("id")]).unwrap();
    for _ in 0..10 {
        db.insert_row("t", vec![Value::Null]).unwrap();
    }
    db.commit(txn).unwrap();

    // Pin a reader, then let a writer commit 5 more rows behind its back.
    let reader = db.begin_read();
    let txn = db.begin_write();
    for _ in 0..5 {
        db.insert_row("t", vec![Value::Null]).unwrap();
    }
    db.commit(txn).unwrap();

    // A repeated query through the pinned snapshot must keep returning the
    // old count, not the 15 rows now actually committed.
    assert_eq!(count_rows_at(&db, "t", &reader), 10);
    assert_eq!(count_rows_at(&db, "t", &reader), 10);

    // The latest (non-snapshot) view does see the writer's commit.
    assert_eq!(count_rows(&db, "t"), 15);

    drop(reader);
    let later_reader = db.begin_read();
    assert_eq!(count_rows_at(&db, "t", &later_reader), 15);
}

#[test]
fn reader_snapshot_survives_interleaved_writer_rollback() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.ddb");
    let db = Database::open(&path, Config::default()).unwrap();

    let txn = db.begin_write();
    db.create_table("t", vec![pk_col("id")]).unwrap();
    db.insert_row("t", vec![Value::Null]).unwrap();
    db.commit(txn).unwrap();

    let reader = db.begin_read();

    let txn = db.begin_write();
    db.insert_row("t", vec![Value::Null]).unwrap();
    db.rollback(txn).unwrap();

    assert_eq!(count_rows(&db, "t"), 1);
    drop(reader);
}
