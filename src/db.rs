//! Database facade: ties the pager, WAL, catalog, row store and
//! transaction manager into the single entry point external callers open
//! (spec.md §6).

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::{Catalog, ColumnDef, IndexSchema, TableSchema};
use crate::codec::Value;
use crate::config::Config;
use crate::error::Result;
use crate::pager::Pager;
use crate::row::{IndexCursor, RowCursor, RowStore};
use crate::txn::{ReadTxn, TxnManager, WriteTxn};
use crate::vfs::OsVfs;
use crate::wal::Wal;

/// An open database: one `path.ddb` main file plus its `path.ddb-wal` log.
///
/// Owns `Pager`, `Wal`, `Catalog` and `TxnManager` as independent sibling
/// fields. `Catalog` holds its own `Arc<Pager>` clone rather than borrowing
/// one from this struct, which is what lets all four live here without a
/// self-referential borrow.
pub struct Database {
    pager: Arc<Pager>,
    wal: Arc<Wal>,
    catalog: Catalog,
    txns: TxnManager,
    config: Config,
}

impl Database {
    /// Opens `path`, creating it if missing. Recovers any committed-but-
    /// not-yet-checkpointed WAL frames before the catalog is loaded, so
    /// `Catalog::load` sees post-recovery state (spec.md §5.4).
    pub fn open(path: &Path, config: Config) -> Result<Self> {
        Self::open_with_vfs(path, config, Box::new(OsVfs), Box::new(OsVfs))
    }

    /// Opens with an injectable [`Vfs`] per subsystem, e.g. a
    /// [`crate::vfs::fault::FaultVfs`] wrapped in an `Arc` so a test can keep
    /// arming fail-points after this call hands off ownership.
    pub fn open_with_vfs(
        path: &Path,
        config: Config,
        pager_vfs: Box<dyn crate::vfs::Vfs>,
        wal_vfs: Box<dyn crate::vfs::Vfs>,
    ) -> Result<Self> {
        let pager = Arc::new(if path.exists() {
            Pager::open(pager_vfs, path, config.read_only)?
        } else {
            Pager::create(pager_vfs, path, config.page_size)?
        });

        let wal = Arc::new(Wal::open(wal_vfs, path, config.sync_mode)?);
        let max_committed_lsn = if config.read_only {
            pager.header_snapshot().last_checkpoint_lsn
        } else {
            wal.recover(&pager)?
        };
        pager.attach_overlay(wal.overlay());
        if !config.read_only {
            pager.attach_wal_sink(wal.clone());
        }

        let catalog = Catalog::load(pager.clone())?;
        let txns = TxnManager::new(max_committed_lsn);

        log::info!("decentdb: opened {}", path.display());
        Ok(Self {
            pager,
            wal,
            catalog,
            txns,
            config,
        })
    }

    /// Opens with `Config::from_env()`.
    pub fn open_default(path: &Path) -> Result<Self> {
        Self::open(path, Config::from_env())
    }

    /// Flushes every dirty page and truncates the WAL if no reader still
    /// needs it (spec.md §6 `close`).
    pub fn close(&self) -> Result<()> {
        if self.config.read_only {
            return Ok(());
        }
        self.checkpoint()
    }

    pub fn begin_write(&self) -> WriteTxn<'_> {
        WriteTxn::begin(&self.txns, &self.pager, &self.wal)
    }

    /// Like `begin_write`, but returns `Error::Busy` instead of blocking if
    /// another write transaction is already open (spec.md §7 BUSY).
    pub fn try_begin_write(&self) -> Result<WriteTxn<'_>> {
        WriteTxn::try_begin(&self.txns, &self.pager, &self.wal)
    }

    pub fn begin_read(&self) -> ReadTxn<'_> {
        ReadTxn::begin(&self.txns, &self.pager)
    }

    pub fn commit(&self, txn: WriteTxn<'_>) -> Result<u64> {
        let lsn = txn.commit()?;
        if self.wal.bytes_since_checkpoint() >= self.config.checkpoint_threshold_bytes {
            self.checkpoint()?;
        }
        Ok(lsn)
    }

    pub fn rollback(&self, txn: WriteTxn<'_>) -> Result<()> {
        txn.rollback()
    }

    /// Flushes dirty pages to the main file and truncates the WAL, never
    /// retiring overlay versions a live reader still pins (spec.md §5.2,
    /// §9 checkpoint_timeout). Waits for `min_active_reader_snapshot` to
    /// clear the desired lsn up to `checkpoint_timeout`; past the deadline
    /// it logs a warning and skips the WAL truncation for this call (the
    /// copy-to-main-file step above still completes), leaving the WAL
    /// untruncated until a later checkpoint catches up.
    pub fn checkpoint(&self) -> Result<()> {
        let desired_lsn = self.txns.last_committed_lsn();
        if desired_lsn == 0 {
            return Ok(());
        }

        let deadline = Instant::now() + self.config.checkpoint_timeout;
        loop {
            match self.txns.min_active_reader_snapshot() {
                Some(pinned) if pinned < desired_lsn => {
                    if Instant::now() >= deadline {
                        log::warn!(
                            "decentdb: checkpoint timeout waiting for reader pinned at lsn {pinned}, copying committed pages but skipping WAL truncation"
                        );
                        self.wal.copy_committed_to_main(&self.pager, desired_lsn)?;
                        return Ok(());
                    }
                    std::thread::yield_now();
                    continue;
                }
                _ => break,
            }
        }

        self.wal.checkpoint(&self.pager, desired_lsn)?;
        Ok(())
    }

    fn row_store(&self) -> RowStore<'_> {
        RowStore::new(&self.catalog)
    }

    // ---- schema and DML ----
    //
    // Every mutator below dirties pager-cached pages directly; none of them
    // touch the WAL by themselves. They are only durable once a caller that
    // holds the `WriteTxn` from `begin_write` calls `commit` on it — the
    // commit step is what snapshots whatever is dirty and appends it to the
    // WAL under one lsn (spec.md §6 scenario 1: "Begin write; insert
    // (1,"hello"); commit.").

    pub fn create_table(&self, name: &str, columns: Vec<ColumnDef>) -> Result<()> {
        let root = crate::btree::BTree::create(&self.pager)?.root();
        self.catalog.create_table(TableSchema {
            name: name.to_string(),
            table_root: root,
            next_rowid: 1,
            columns,
        })
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.catalog.drop_table(name)
    }

    pub fn create_index(
        &self,
        name: &str,
        table: &str,
        column: &str,
        unique: bool,
    ) -> Result<()> {
        let root = crate::btree::BTree::create(&self.pager)?.root();
        self.catalog.create_index(IndexSchema {
            name: name.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            index_root: root,
            unique,
        })
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.catalog.drop_index(name)
    }

    // ---- DML ----

    pub fn insert_row(&self, table: &str, values: Vec<Value>) -> Result<u64> {
        self.row_store().insert_row(table, values)
    }

    pub fn update_row(&self, table: &str, rowid: u64, values: Vec<Value>) -> Result<()> {
        self.row_store().update_row(table, rowid, values)
    }

    pub fn delete_row(&self, table: &str, rowid: u64) -> Result<()> {
        self.row_store().delete_row(table, rowid)
    }

    pub fn scan_table(&self, table: &str) -> Result<RowCursor<'_>> {
        self.row_store().scan_table(table)
    }

    /// Scans `table` through `reader`'s pinned snapshot rather than the
    /// latest committed state (spec.md §5.3).
    pub fn scan_table_at(&self, table: &str, reader: &ReadTxn<'_>) -> Result<RowCursor<'_>> {
        self.row_store()
            .scan_table_at_snapshot(table, reader.snapshot_lsn())
    }

    pub fn index_seek(&self, index_name: &str, value: &Value) -> Result<IndexCursor<'_>> {
        self.row_store().index_seek(index_name, value)
    }

    pub fn bulk_load(&self, table: &str, rows: Vec<Vec<Value>>) -> Result<Vec<u64>> {
        self.row_store().bulk_load(table, rows)
    }

    // ---- introspection ----

    pub fn list_tables(&self) -> Vec<String> {
        self.catalog.list_tables()
    }

    pub fn get_table_columns(&self, table: &str) -> Option<Vec<ColumnDef>> {
        self.catalog.get_table(table).map(|schema| schema.columns)
    }

    pub fn list_indexes(&self) -> Vec<String> {
        self.catalog.list_indexes()
    }

    /// Size of the main file in pages, including the header page.
    pub fn page_count(&self) -> u64 {
        self.pager.page_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnKind;
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

    fn text_col(name: &str) -> ColumnDef {
        ColumnDef {
            name: name.into(),
            kind: ColumnKind::Text,
            not_null: true,
            unique: false,
            primary_key: false,
            foreign_key: None,
        }
    }

    #[test]
    fn commit_durability_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ddb");
        {
            let db = Database::open(&path, Config::default()).unwrap();
            let txn = db.begin_write();
            db.create_table("t", vec![pk_col("id"), text_col("v")])
                .unwrap();
            db.insert_row("t", vec![Value::Null, Value::Text("hello".into())])
                .unwrap();
            db.commit(txn).unwrap();
        }
        let db = Database::open(&path, Config::default()).unwrap();
        let mut cursor = db.scan_table("t").unwrap();
        let (rowid, values) = cursor.next().unwrap().unwrap();
        assert_eq!(rowid, 1);
        assert_eq!(values[1], Value::Text("hello".into()));
    }

    #[test]
    fn reader_snapshot_does_not_see_later_writer_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ddb");
        let db = Database::open(&path, Config::default()).unwrap();

        let txn = db.begin_write();
        db.create_table("t", vec![pk_col("id")]).unwrap();
        for _ in 0..10 {
            db.insert_row("t", vec![Value::Null]).unwrap();
        }
        db.commit(txn).unwrap();

        let before = db.begin_read();
        let snapshot_before = before.snapshot_lsn();

        let txn = db.begin_write();
        for _ in 0..5 {
            db.insert_row("t", vec![Value::Null]).unwrap();
        }
        db.commit(txn).unwrap();

        assert_eq!(before.snapshot_lsn(), snapshot_before);
        let mut count = 0;
        let mut cursor = db.scan_table("t").unwrap();
        while cursor.next().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 15);
    }

    #[test]
    fn checkpoint_is_a_no_op_on_an_empty_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ddb");
        let db = Database::open(&path, Config::default()).unwrap();
        db.checkpoint().unwrap();
    }

    #[test]
    fn list_tables_and_columns_reflect_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ddb");
        let db = Database::open(&path, Config::default()).unwrap();

        let txn = db.begin_write();
        db.create_table("t", vec![pk_col("id"), text_col("v")])
            .unwrap();
        db.create_index("t_v_idx", "t", "v", false).unwrap();
        db.commit(txn).unwrap();

        assert_eq!(db.list_tables(), vec!["t".to_string()]);
        assert_eq!(db.list_indexes(), vec!["t_v_idx".to_string()]);
        assert_eq!(db.get_table_columns("t").unwrap().len(), 2);
        assert!(db.get_table_columns("missing").is_none());
    }

    #[test]
    fn try_begin_write_returns_busy_while_a_write_is_already_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ddb");
        let db = Database::open(&path, Config::default()).unwrap();

        let txn = db.begin_write();
        assert!(matches!(db.try_begin_write(), Err(crate::error::Error::Busy)));
        db.rollback(txn).unwrap();

        assert!(db.try_begin_write().is_ok());
    }

    #[test]
    fn rollback_leaves_last_committed_state_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ddb");
        let db = Database::open(&path, Config::default()).unwrap();

        let setup = db.begin_write();
        db.create_table("t", vec![pk_col("id")]).unwrap();
        db.insert_row("t", vec![Value::Null]).unwrap();
        db.commit(setup).unwrap();

        let txn = db.begin_write();
        db.insert_row("t", vec![Value::Null]).unwrap();
        db.rollback(txn).unwrap();

        let mut cursor = db.scan_table("t").unwrap();
        assert!(cursor.next().unwrap().is_some());
        assert!(cursor.next().unwrap().is_none());
    }
}
