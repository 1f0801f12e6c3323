//! Scenario 5 (spec.md §8): deleting a batch of rows and reinserting the
//! same number back must reuse freed pages rather than growing the file
//! without bound.

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

#[test]
fn reinserting_after_a_full_delete_does_not_grow_the_file_unbounded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.ddb");
    let config: Config = Config::builder().page_size(4096).build();
    let db = Database::open(&path, config).unwrap();

    let txn = db.begin_write();
    db.create_table("t", vec![pk_col("id")]).unwrap();
    db.commit(txn).unwrap();

    let txn = db.begin_write();
    let mut rowids = Vec::with_capacity(1000);
    for _ in 0..1000 {
        rowids.push(db.insert_row("t", vec![Value::Null]).unwrap());
    }
    db.commit(txn).unwrap();
    db.checkpoint().unwrap();
    let count_after_first_insert = db.page_count();

    let txn = db.begin_write();
    for rowid in &rowids {
        db.delete_row("t", *rowid).unwrap();
    }
    db.commit(txn).unwrap();
    db.checkpoint().unwrap();

    let txn = db.begin_write();
    for _ in 0..1000 {
        db.insert_row("t", vec![Value::Null]).unwrap();
    }
    db.commit(txn).unwrap();
    db.checkpoint().unwrap();
    let count_after_second_insert = db.page_count();

    assert!(
        count_after_second_insert <= count_after_first_insert + 1,
        "expected freed pages to be reused: first={count_after_first_insert}, second={count_after_second_insert}"
    );
}
