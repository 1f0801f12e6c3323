//! Row storage: tuple ↔ rowid tables and secondary indexes built on
//! B+Trees, with constraint enforcement at the statement boundary
//! (spec.md §4.7).

use std::collections::HashMap;

use crate::btree::{index_key, index_key_parts, key_to_rowid, rowid_key, BTree, Cursor};
use crate::catalog::{constraints, Catalog, IndexSchema, TableSchema};
use crate::codec::{decode_record_with_overflow, encode_record, Value};
use crate::error::{ConstraintKind, Error, Result};
use crate::pager::Pager;

/// Binds row-storage operations to one table/index catalog. The pager
/// handle comes from the catalog itself ([`Catalog::pager`]) rather than a
/// second borrow, so callers only need to keep one reference alive.
pub struct RowStore<'a> {
    catalog: &'a Catalog,
}

impl<'a> RowStore<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    fn pager(&self) -> &'a Pager {
        self.catalog.pager()
    }

    fn require_table(&self, table: &str) -> Result<TableSchema> {
        self.catalog
            .get_table(table)
            .ok_or_else(|| Error::schema(format!("unknown table '{table}'")))
    }

    /// Resolves the rowid for an insert: the caller-supplied `INTEGER
    /// PRIMARY KEY` value, or `schema.next_rowid` if that column is `NULL`
    /// (spec.md §4.7). Writes the resolved value back into `values[pk]`.
    fn resolve_insert_rowid(schema: &TableSchema, values: &mut [Value]) -> Result<u64> {
        match schema.primary_key_index() {
            Some(pk) => match &values[pk] {
                Value::Null => {
                    let assigned = schema.next_rowid;
                    values[pk] = Value::Int64(assigned as i64);
                    Ok(assigned)
                }
                Value::Int64(n) => Ok(*n as u64),
                _ => Err(Error::schema("primary key column must be INTEGER")),
            },
            None => Ok(schema.next_rowid),
        }
    }

    fn check_row_constraints(
        &self,
        schema: &TableSchema,
        values: &[Value],
        old_values: Option<&[Value]>,
        exclude_rowid: Option<u64>,
    ) -> Result<()> {
        constraints::check_not_null(&schema.columns, values)?;

        for idx in self.catalog.indexes_for_table(&schema.name) {
            let Some(col_idx) = schema.column_index(&idx.column) else {
                continue;
            };
            if let Some(old) = old_values {
                if values[col_idx] == old[col_idx] {
                    continue;
                }
            }
            if matches!(values[col_idx], Value::Null) {
                continue;
            }
            if idx.unique {
                let value_bytes = constraints::index_value_bytes(&values[col_idx])?;
                constraints::check_unique(self.pager(), &idx, &value_bytes, exclude_rowid)?;
            }
        }

        for col in &schema.columns {
            let Some(fk) = &col.foreign_key else { continue };
            let col_idx = schema.column_index(&col.name).unwrap();
            if let Some(old) = old_values {
                if values[col_idx] == old[col_idx] {
                    continue;
                }
            }
            if matches!(values[col_idx], Value::Null) {
                continue;
            }
            let parent = self.catalog.get_table(&fk.parent_table).ok_or_else(|| {
                Error::schema(format!("unknown parent table '{}'", fk.parent_table))
            })?;
            let parent_col_idx = parent.column_index(&fk.parent_column).ok_or_else(|| {
                Error::schema(format!("unknown parent column '{}'", fk.parent_column))
            })?;
            let parent_indexes = self.catalog.indexes_for_table(&fk.parent_table);
            constraints::check_foreign_key_parent_exists(
                self.pager(),
                &parent,
                parent_col_idx,
                &parent_indexes,
                &values[col_idx],
            )?;
        }
        Ok(())
    }

    fn write_index_entries(
        &self,
        schema: &TableSchema,
        rowid: u64,
        old_values: Option<&[Value]>,
        new_values: &[Value],
    ) -> Result<()> {
        for idx in self.catalog.indexes_for_table(&schema.name) {
            let Some(col_idx) = schema.column_index(&idx.column) else {
                continue;
            };
            if let Some(old) = old_values {
                if new_values[col_idx] == old[col_idx] {
                    continue;
                }
            }
            let mut idx_tree = BTree::new(self.pager(), idx.index_root);
            if let Some(old) = old_values {
                if !matches!(old[col_idx], Value::Null) {
                    let old_bytes = constraints::index_value_bytes(&old[col_idx])?;
                    idx_tree.delete(&index_key(&old_bytes, rowid))?;
                }
            }
            if !matches!(new_values[col_idx], Value::Null) {
                let new_bytes = constraints::index_value_bytes(&new_values[col_idx])?;
                idx_tree.insert(&index_key(&new_bytes, rowid), &[])?;
            }
            if idx_tree.root() != idx.index_root {
                let mut updated = idx.clone();
                updated.index_root = idx_tree.root();
                self.catalog.put_index(updated)?;
            }
        }
        Ok(())
    }

    pub fn insert_row(&self, table: &str, mut values: Vec<Value>) -> Result<u64> {
        let mut schema = self.require_table(table)?;
        if values.len() != schema.columns.len() {
            return Err(Error::schema(format!(
                "table '{table}' expects {} columns, got {}",
                schema.columns.len(),
                values.len()
            )));
        }

        let rowid = Self::resolve_insert_rowid(&schema, &mut values)?;

        {
            let table_tree = BTree::new(self.pager(), schema.table_root);
            if table_tree.find(&rowid_key(rowid))?.is_some() {
                return Err(Error::constraint(
                    ConstraintKind::PrimaryKey,
                    format!("duplicate rowid {rowid} in table '{table}'"),
                ));
            }
        }

        self.check_row_constraints(&schema, &values, None, None)?;

        let encoded = encode_record(Some(self.pager()), &values)?;
        let mut table_tree = BTree::new(self.pager(), schema.table_root);
        table_tree.insert(&rowid_key(rowid), &encoded)?;
        schema.table_root = table_tree.root();

        self.write_index_entries(&schema, rowid, None, &values)?;

        if rowid >= schema.next_rowid {
            schema.next_rowid = rowid + 1;
        }
        self.catalog.put_table(schema)?;
        Ok(rowid)
    }

    pub fn update_row(&self, table: &str, rowid: u64, mut values: Vec<Value>) -> Result<()> {
        let mut schema = self.require_table(table)?;
        if values.len() != schema.columns.len() {
            return Err(Error::schema(format!(
                "table '{table}' expects {} columns, got {}",
                schema.columns.len(),
                values.len()
            )));
        }
        if let Some(pk) = schema.primary_key_index() {
            values[pk] = Value::Int64(rowid as i64);
        }

        let old_record = {
            let table_tree = BTree::new(self.pager(), schema.table_root);
            table_tree.find(&rowid_key(rowid))?.ok_or_else(|| {
                Error::schema(format!("no row with rowid {rowid} in table '{table}'"))
            })?
        };
        let old_values = decode_record_with_overflow(self.pager(), &old_record)?;

        self.check_row_constraints(&schema, &values, Some(&old_values), Some(rowid))?;
        self.write_index_entries(&schema, rowid, Some(&old_values), &values)?;

        let encoded = encode_record(Some(self.pager()), &values)?;
        let mut table_tree = BTree::new(self.pager(), schema.table_root);
        table_tree.insert(&rowid_key(rowid), &encoded)?;
        schema.table_root = table_tree.root();
        self.catalog.put_table(schema)?;
        Ok(())
    }

    pub fn delete_row(&self, table: &str, rowid: u64) -> Result<()> {
        let mut schema = self.require_table(table)?;
        let record = {
            let table_tree = BTree::new(self.pager(), schema.table_root);
            table_tree.find(&rowid_key(rowid))?.ok_or_else(|| {
                Error::schema(format!("no row with rowid {rowid} in table '{table}'"))
            })?
        };
        let values = decode_record_with_overflow(self.pager(), &record)?;

        if let Some(pk) = schema.primary_key_index() {
            let tables = self.catalog.tables_snapshot();
            let indexes = self.catalog.indexes_snapshot();
            let reverse_fk = self.catalog.reverse_fk_for(table);
            constraints::check_no_referencing_children(
                self.pager(),
                &reverse_fk,
                &tables,
                &indexes,
                &values[pk],
            )?;
        }

        for idx in self.catalog.indexes_for_table(table) {
            let Some(col_idx) = schema.column_index(&idx.column) else {
                continue;
            };
            if matches!(values[col_idx], Value::Null) {
                continue;
            }
            let value_bytes = constraints::index_value_bytes(&values[col_idx])?;
            let mut idx_tree = BTree::new(self.pager(), idx.index_root);
            idx_tree.delete(&index_key(&value_bytes, rowid))?;
            if idx_tree.root() != idx.index_root {
                let mut updated = idx.clone();
                updated.index_root = idx_tree.root();
                self.catalog.put_index(updated)?;
            }
        }

        let mut table_tree = BTree::new(self.pager(), schema.table_root);
        table_tree.delete(&rowid_key(rowid))?;
        schema.table_root = table_tree.root();
        self.catalog.put_table(schema)?;
        Ok(())
    }

    pub fn scan_table(&self, table: &str) -> Result<RowCursor<'a>> {
        let schema = self.require_table(table)?;
        let tree = BTree::new(self.pager(), schema.table_root);
        let inner = tree.open_cursor()?;
        Ok(RowCursor {
            pager: self.pager(),
            inner,
        })
    }

    /// Scans `table` through a pinned reader snapshot rather than the
    /// latest committed state, so a caller holding a
    /// [`crate::txn::ReadTxn`] sees the table exactly as it stood when that
    /// snapshot was taken (spec.md §5.3 snapshot isolation).
    pub fn scan_table_at_snapshot(&self, table: &str, snapshot_lsn: u64) -> Result<RowCursor<'a>> {
        let schema = self.require_table(table)?;
        let tree = BTree::at_snapshot(self.pager(), schema.table_root, snapshot_lsn);
        let inner = tree.open_cursor()?;
        Ok(RowCursor {
            pager: self.pager(),
            inner,
        })
    }

    pub fn index_seek(&self, index_name: &str, value: &Value) -> Result<IndexCursor<'a>> {
        let idx = self
            .catalog
            .get_index(index_name)
            .ok_or_else(|| Error::schema(format!("unknown index '{index_name}'")))?;
        let value_bytes = constraints::index_value_bytes(value)?;
        let tree = BTree::new(self.pager(), idx.index_root);
        let inner = tree.open_cursor_from(&index_key(&value_bytes, 0))?;
        Ok(IndexCursor {
            inner,
            target: value_bytes,
        })
    }

    /// Fast bulk-insert path: writes every row to the table B+Tree first,
    /// then replays accumulated index entries once per index rather than
    /// after every row (spec.md §4.7). Durability mode around the
    /// surrounding commit is the caller's choice, not this layer's.
    pub fn bulk_load(&self, table: &str, rows: Vec<Vec<Value>>) -> Result<Vec<u64>> {
        let mut schema = self.require_table(table)?;
        let indexes = self.catalog.indexes_for_table(table);
        let mut rowids = Vec::with_capacity(rows.len());
        let mut deferred: HashMap<String, Vec<(Vec<u8>, u64)>> = HashMap::new();

        let mut table_tree = BTree::new(self.pager(), schema.table_root);
        for mut values in rows {
            if values.len() != schema.columns.len() {
                return Err(Error::schema(format!(
                    "table '{table}' expects {} columns, got {}",
                    schema.columns.len(),
                    values.len()
                )));
            }
            let rowid = Self::resolve_insert_rowid(&schema, &mut values)?;
            self.check_row_constraints(&schema, &values, None, None)?;

            let encoded = encode_record(Some(self.pager()), &values)?;
            table_tree.insert(&rowid_key(rowid), &encoded)?;

            for idx in &indexes {
                let Some(col_idx) = schema.column_index(&idx.column) else {
                    continue;
                };
                if matches!(values[col_idx], Value::Null) {
                    continue;
                }
                let value_bytes = constraints::index_value_bytes(&values[col_idx])?;
                deferred
                    .entry(idx.name.clone())
                    .or_default()
                    .push((value_bytes, rowid));
            }

            if rowid >= schema.next_rowid {
                schema.next_rowid = rowid + 1;
            }
            rowids.push(rowid);
        }
        schema.table_root = table_tree.root();
        self.catalog.put_table(schema)?;

        for idx in &indexes {
            let Some(entries) = deferred.get(&idx.name) else {
                continue;
            };
            let mut idx_tree = BTree::new(self.pager(), idx.index_root);
            for (value_bytes, rowid) in entries {
                idx_tree.insert(&index_key(value_bytes, *rowid), &[])?;
            }
            if idx_tree.root() != idx.index_root {
                let mut updated = idx.clone();
                updated.index_root = idx_tree.root();
                self.catalog.put_index(updated)?;
            }
        }
        Ok(rowids)
    }
}

/// Forward iterator over a table's rowid-ordered rows.
pub struct RowCursor<'a> {
    pager: &'a Pager,
    inner: Cursor<'a>,
}

impl<'a> RowCursor<'a> {
    pub fn next(&mut self) -> Result<Option<(u64, Vec<Value>)>> {
        match self.inner.next()? {
            Some((key, record)) => {
                let rowid = key_to_rowid(&key)?;
                let values = decode_record_with_overflow(self.pager(), &record)?;
                Ok(Some((rowid, values)))
            }
            None => Ok(None),
        }
    }
}

/// Forward iterator over the rowids matching one index probe.
pub struct IndexCursor<'a> {
    inner: Cursor<'a>,
    target: Vec<u8>,
}

impl<'a> IndexCursor<'a> {
    pub fn next(&mut self) -> Result<Option<u64>> {
        match self.inner.next()? {
            Some((key, _)) => {
                let (value, rowid) = index_key_parts(&key)?;
                if value != self.target.as_slice() {
                    return Ok(None);
                }
                Ok(Some(rowid))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnKind, ForeignKey};
    use crate::vfs::OsVfs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn open_pager(page_size: u32) -> Arc<Pager> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ddb");
        std::mem::forget(dir);
        Arc::new(Pager::create(Box::new(OsVfs), &path, page_size).unwrap())
    }

    fn make_table(catalog: &Catalog, pager: &Pager, name: &str, columns: Vec<ColumnDef>) {
        let root = BTree::create(pager).unwrap().root();
        catalog
            .create_table(TableSchema {
                name: name.to_string(),
                table_root: root,
                next_rowid: 1,
                columns,
            })
            .unwrap();
    }

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

    fn text_col(name: &str, not_null: bool) -> ColumnDef {
        ColumnDef {
            name: name.into(),
            kind: ColumnKind::Text,
            not_null,
            unique: false,
            primary_key: false,
            foreign_key: None,
        }
    }

    #[test]
    fn insert_assigns_rowid_and_scan_returns_it() {
        let pager = open_pager(2048);
        let catalog = Catalog::create(pager.clone()).unwrap();
        make_table(
            &catalog,
            &pager,
            "users",
            vec![pk_col("id"), text_col("name", true)],
        );
        let store = RowStore::new(&catalog);
        let rowid = store
            .insert_row("users", vec![Value::Null, Value::Text("alice".into())])
            .unwrap();
        assert_eq!(rowid, 1);

        let mut cursor = store.scan_table("users").unwrap();
        let (seen_rowid, values) = cursor.next().unwrap().unwrap();
        assert_eq!(seen_rowid, 1);
        assert_eq!(values[1], Value::Text("alice".into()));
        assert!(cursor.next().unwrap().is_none());
    }

    #[test]
    fn not_null_violation_rejected() {
        let pager = open_pager(2048);
        let catalog = Catalog::create(pager.clone()).unwrap();
        make_table(
            &catalog,
            &pager,
            "users",
            vec![pk_col("id"), text_col("name", true)],
        );
        let store = RowStore::new(&catalog);
        assert!(store.insert_row("users", vec![Value::Null, Value::Null]).is_err());
    }

    #[test]
    fn unique_index_rejects_duplicate_then_update_succeeds() {
        let pager = open_pager(2048);
        let catalog = Catalog::create(pager.clone()).unwrap();
        make_table(
            &catalog,
            &pager,
            "users",
            vec![pk_col("id"), text_col("email", true)],
        );
        let idx_root = BTree::create(&pager).unwrap().root();
        catalog
            .create_index(IndexSchema {
                name: "users_email_uq".into(),
                table: "users".into(),
                column: "email".into(),
                index_root: idx_root,
                unique: true,
            })
            .unwrap();
        let store = RowStore::new(&catalog);

        store
            .insert_row("users", vec![Value::Null, Value::Text("a@x.com".into())])
            .unwrap();
        assert!(store
            .insert_row("users", vec![Value::Null, Value::Text("a@x.com".into())])
            .is_err());

        // Updating row 1 back to its own email must not trip the uniqueness check.
        store
            .update_row(
                "users",
                1,
                vec![Value::Int64(1), Value::Text("a@x.com".into())],
            )
            .unwrap();
    }

    #[test]
    fn foreign_key_restrict_blocks_delete_of_referenced_parent() {
        let pager = open_pager(2048);
        let catalog = Catalog::create(pager.clone()).unwrap();
        make_table(&catalog, &pager, "users", vec![pk_col("id")]);
        make_table(
            &catalog,
            &pager,
            "orders",
            vec![
                pk_col("id"),
                ColumnDef {
                    name: "user_id".into(),
                    kind: ColumnKind::Integer,
                    not_null: true,
                    unique: false,
                    primary_key: false,
                    foreign_key: Some(ForeignKey {
                        parent_table: "users".into(),
                        parent_column: "id".into(),
                    }),
                },
            ],
        );
        let store = RowStore::new(&catalog);
        store.insert_row("users", vec![Value::Null]).unwrap();
        assert!(store
            .insert_row("orders", vec![Value::Null, Value::Int64(99)])
            .is_err());
        store
            .insert_row("orders", vec![Value::Null, Value::Int64(1)])
            .unwrap();
        assert!(store.delete_row("users", 1).is_err());
        store.delete_row("orders", 1).unwrap();
        store.delete_row("users", 1).unwrap();
    }

    #[test]
    fn bulk_load_defers_index_writes_until_the_end() {
        let pager = open_pager(2048);
        let catalog = Catalog::create(pager.clone()).unwrap();
        make_table(
            &catalog,
            &pager,
            "users",
            vec![pk_col("id"), text_col("name", true)],
        );
        let idx_root = BTree::create(&pager).unwrap().root();
        catalog
            .create_index(IndexSchema {
                name: "users_name_idx".into(),
                table: "users".into(),
                column: "name".into(),
                index_root: idx_root,
                unique: false,
            })
            .unwrap();
        let store = RowStore::new(&catalog);

        let rows = vec![
            vec![Value::Null, Value::Text("a".into())],
            vec![Value::Null, Value::Text("b".into())],
            vec![Value::Null, Value::Text("c".into())],
        ];
        let rowids = store.bulk_load("users", rows).unwrap();
        assert_eq!(rowids, vec![1, 2, 3]);

        let mut seek = store
            .index_seek("users_name_idx", &Value::Text("b".into()))
            .unwrap();
        assert_eq!(seek.next().unwrap(), Some(2));
        assert_eq!(seek.next().unwrap(), None);
    }

    #[test]
    fn delete_row_frees_index_entry_and_table_slot() {
        let pager = open_pager(2048);
        let catalog = Catalog::create(pager.clone()).unwrap();
        make_table(
            &catalog,
            &pager,
            "users",
            vec![pk_col("id"), text_col("name", true)],
        );
        let store = RowStore::new(&catalog);
        store
            .insert_row("users", vec![Value::Null, Value::Text("alice".into())])
            .unwrap();
        store.delete_row("users", 1).unwrap();
        let mut cursor = store.scan_table("users").unwrap();
        assert!(cursor.next().unwrap().is_none());
        assert!(store.delete_row("users", 1).is_err());
    }
}
