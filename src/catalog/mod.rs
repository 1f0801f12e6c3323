//! Catalog: table/index metadata persisted as a system B+Tree inside the
//! main file (spec.md §4.7).
//!
//! Entries use this crate's own varint-based encoding (`codec::varint`)
//! rather than a fixed-width layout, since catalog entries are variable
//! length (a table's column list) and live
//! inside the single-file B+Tree format rather than a sidecar file.

pub mod constraints;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::btree::BTree;
use crate::codec::varint::{read_uvarint, write_uvarint};
use crate::error::{Error, Result};
use crate::pager::Pager;

const ENTRY_KIND_TABLE: u8 = 1;
const ENTRY_KIND_INDEX: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
    Blob,
    Bool,
}

impl ColumnKind {
    fn tag(self) -> u8 {
        match self {
            ColumnKind::Integer => 0,
            ColumnKind::Float => 1,
            ColumnKind::Text => 2,
            ColumnKind::Blob => 3,
            ColumnKind::Bool => 4,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(ColumnKind::Integer),
            1 => Ok(ColumnKind::Float),
            2 => Ok(ColumnKind::Text),
            3 => Ok(ColumnKind::Blob),
            4 => Ok(ColumnKind::Bool),
            other => Err(Error::corruption(format!("unknown column kind tag {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub parent_table: String,
    pub parent_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    pub not_null: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub foreign_key: Option<ForeignKey>,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub table_root: u64,
    pub columns: Vec<ColumnDef>,
    pub next_rowid: u64,
}

impl TableSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn primary_key_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary_key)
    }
}

#[derive(Debug, Clone)]
pub struct IndexSchema {
    pub name: String,
    pub table: String,
    pub column: String,
    pub index_root: u64,
    pub unique: bool,
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_uvarint(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

fn read_string(buf: &[u8], offset: &mut usize) -> Result<String> {
    let len = read_uvarint(buf, offset)? as usize;
    if *offset + len > buf.len() {
        return Err(Error::corruption("catalog string out of range"));
    }
    let s = String::from_utf8(buf[*offset..*offset + len].to_vec())
        .map_err(|e| Error::corruption(format!("invalid utf8 in catalog entry: {e}")))?;
    *offset += len;
    Ok(s)
}

fn encode_column(out: &mut Vec<u8>, col: &ColumnDef) {
    write_string(out, &col.name);
    out.push(col.kind.tag());
    let mut flags = 0u8;
    if col.not_null {
        flags |= 1;
    }
    if col.unique {
        flags |= 2;
    }
    if col.primary_key {
        flags |= 4;
    }
    if col.foreign_key.is_some() {
        flags |= 8;
    }
    out.push(flags);
    if let Some(fk) = &col.foreign_key {
        write_string(out, &fk.parent_table);
        write_string(out, &fk.parent_column);
    }
}

fn decode_column(buf: &[u8], offset: &mut usize) -> Result<ColumnDef> {
    let name = read_string(buf, offset)?;
    let kind_tag = *buf
        .get(*offset)
        .ok_or_else(|| Error::corruption("catalog column missing kind byte"))?;
    let kind = ColumnKind::from_tag(kind_tag)?;
    *offset += 1;
    let flags = *buf
        .get(*offset)
        .ok_or_else(|| Error::corruption("catalog column missing flags byte"))?;
    *offset += 1;
    let foreign_key = if flags & 8 != 0 {
        let parent_table = read_string(buf, offset)?;
        let parent_column = read_string(buf, offset)?;
        Some(ForeignKey {
            parent_table,
            parent_column,
        })
    } else {
        None
    };
    Ok(ColumnDef {
        name,
        kind,
        not_null: flags & 1 != 0,
        unique: flags & 2 != 0,
        primary_key: flags & 4 != 0,
        foreign_key,
    })
}

fn encode_table_schema(schema: &TableSchema) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(ENTRY_KIND_TABLE);
    write_string(&mut out, &schema.name);
    write_uvarint(&mut out, schema.table_root);
    write_uvarint(&mut out, schema.next_rowid);
    write_uvarint(&mut out, schema.columns.len() as u64);
    for col in &schema.columns {
        encode_column(&mut out, col);
    }
    out
}

fn decode_table_schema(buf: &[u8]) -> Result<TableSchema> {
    let mut offset = 1; // entry-kind tag already checked by caller
    let name = read_string(buf, &mut offset)?;
    let table_root = read_uvarint(buf, &mut offset)?;
    let next_rowid = read_uvarint(buf, &mut offset)?;
    let col_count = read_uvarint(buf, &mut offset)? as usize;
    let mut columns = Vec::with_capacity(col_count);
    for _ in 0..col_count {
        columns.push(decode_column(buf, &mut offset)?);
    }
    Ok(TableSchema {
        name,
        table_root,
        columns,
        next_rowid,
    })
}

fn encode_index_schema(schema: &IndexSchema) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(ENTRY_KIND_INDEX);
    write_string(&mut out, &schema.name);
    write_string(&mut out, &schema.table);
    write_string(&mut out, &schema.column);
    write_uvarint(&mut out, schema.index_root);
    out.push(schema.unique as u8);
    out
}

fn decode_index_schema(buf: &[u8]) -> Result<IndexSchema> {
    let mut offset = 1;
    let name = read_string(buf, &mut offset)?;
    let table = read_string(buf, &mut offset)?;
    let column = read_string(buf, &mut offset)?;
    let index_root = read_uvarint(buf, &mut offset)?;
    let unique = *buf
        .get(offset)
        .ok_or_else(|| Error::corruption("index schema missing unique flag"))?
        != 0;
    Ok(IndexSchema {
        name,
        table,
        column,
        index_root,
        unique,
    })
}

fn table_key(name: &str) -> Vec<u8> {
    let mut k = vec![ENTRY_KIND_TABLE];
    k.extend_from_slice(name.as_bytes());
    k
}

fn index_entry_key(name: &str) -> Vec<u8> {
    let mut k = vec![ENTRY_KIND_INDEX];
    k.extend_from_slice(name.as_bytes());
    k
}

/// `table_id → set<(child_table, child_column, parent_column)>` (spec.md
/// §4.7/§9), rebuilt at load and maintained incrementally on
/// `create_table`/`drop_table` rather than recomputed on every lookup.
type ReverseFkMap = HashMap<String, Vec<(String, String, String)>>;

fn rebuild_reverse_fk(tables: &HashMap<String, TableSchema>) -> ReverseFkMap {
    let mut map: ReverseFkMap = HashMap::new();
    for schema in tables.values() {
        for col in &schema.columns {
            if let Some(fk) = &col.foreign_key {
                map.entry(fk.parent_table.clone()).or_default().push((
                    schema.name.clone(),
                    col.name.clone(),
                    fk.parent_column.clone(),
                ));
            }
        }
    }
    map
}

/// Table/index metadata, cached in memory and mirrored into a system
/// B+Tree rooted at `header.root_catalog_page`.
///
/// Holds an owned `Arc<Pager>` rather than borrowing one, so a `Database`
/// can store both its `Pager` and its `Catalog` as sibling fields without
/// the catalog borrowing from a field beside it.
pub struct Catalog {
    pager: Arc<Pager>,
    root: RwLock<u64>,
    tables: RwLock<HashMap<String, TableSchema>>,
    indexes: RwLock<HashMap<String, IndexSchema>>,
    reverse_fk: RwLock<ReverseFkMap>,
}

impl Catalog {
    /// Creates a fresh, empty catalog and records its root in the header.
    pub fn create(pager: Arc<Pager>) -> Result<Self> {
        let tree = BTree::create(&pager)?;
        let root = tree.root();
        pager.update_header(|h| h.root_catalog_page = root as u32)?;
        Ok(Self {
            pager,
            root: RwLock::new(root),
            tables: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            reverse_fk: RwLock::new(HashMap::new()),
        })
    }

    /// Opens the catalog at `header.root_catalog_page`, scanning every
    /// entry into the in-memory caches; creates a fresh one if this is a
    /// brand-new database (root page id 0).
    pub fn load(pager: Arc<Pager>) -> Result<Self> {
        let root = pager.header_snapshot().root_catalog_page as u64;
        if root == 0 {
            return Self::create(pager);
        }
        let tree = BTree::new(&pager, root);
        let mut tables = HashMap::new();
        let mut indexes = HashMap::new();
        let mut cursor = tree.open_cursor()?;
        while let Some((key, value)) = cursor.next()? {
            match key.first() {
                Some(&ENTRY_KIND_TABLE) => {
                    let schema = decode_table_schema(&value)?;
                    tables.insert(schema.name.clone(), schema);
                }
                Some(&ENTRY_KIND_INDEX) => {
                    let schema = decode_index_schema(&value)?;
                    indexes.insert(schema.name.clone(), schema);
                }
                _ => return Err(Error::corruption("unknown catalog entry kind")),
            }
        }
        let reverse_fk = rebuild_reverse_fk(&tables);
        Ok(Self {
            pager,
            root: RwLock::new(root),
            tables: RwLock::new(tables),
            indexes: RwLock::new(indexes),
            reverse_fk: RwLock::new(reverse_fk),
        })
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn root(&self) -> u64 {
        *self.root.read().unwrap()
    }

    fn with_tree<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut BTree) -> Result<R>,
    {
        let root = self.root();
        let mut tree = BTree::new(&self.pager, root);
        let result = f(&mut tree)?;
        if tree.root() != root {
            *self.root.write().unwrap() = tree.root();
            self.pager
                .update_header(|h| h.root_catalog_page = tree.root() as u32)?;
        }
        Ok(result)
    }

    fn push_reverse_fk(&self, schema: &TableSchema) {
        let mut reverse = self.reverse_fk.write().unwrap();
        for col in &schema.columns {
            if let Some(fk) = &col.foreign_key {
                reverse.entry(fk.parent_table.clone()).or_default().push((
                    schema.name.clone(),
                    col.name.clone(),
                    fk.parent_column.clone(),
                ));
            }
        }
    }

    fn pop_reverse_fk(&self, schema: &TableSchema) {
        let mut reverse = self.reverse_fk.write().unwrap();
        for col in &schema.columns {
            if let Some(fk) = &col.foreign_key {
                if let Some(list) = reverse.get_mut(&fk.parent_table) {
                    list.retain(|(child_table, child_column, _)| {
                        !(child_table == &schema.name && child_column == &col.name)
                    });
                }
            }
        }
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        if self.tables.read().unwrap().contains_key(&schema.name) {
            return Err(Error::schema(format!(
                "table '{}' already exists",
                schema.name
            )));
        }
        let key = table_key(&schema.name);
        let value = encode_table_schema(&schema);
        self.with_tree(|tree| tree.insert(&key, &value))?;
        self.push_reverse_fk(&schema);
        self.tables.write().unwrap().insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Rewrites an existing table's catalog entry (e.g. after `next_rowid`
    /// advances). Column definitions and foreign keys are immutable after
    /// `create_table`, so the reverse-FK cache needs no adjustment here.
    pub fn put_table(&self, schema: TableSchema) -> Result<()> {
        let key = table_key(&schema.name);
        let value = encode_table_schema(&schema);
        self.with_tree(|tree| tree.insert(&key, &value))?;
        self.tables.write().unwrap().insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        let schema = self
            .tables
            .write()
            .unwrap()
            .remove(name)
            .ok_or_else(|| Error::schema(format!("unknown table '{name}'")))?;
        let key = table_key(name);
        self.with_tree(|tree| {
            tree.delete(&key)?;
            Ok(())
        })?;
        let index_names: Vec<String> = self
            .indexes
            .read()
            .unwrap()
            .values()
            .filter(|idx| idx.table == name)
            .map(|idx| idx.name.clone())
            .collect();
        for idx_name in index_names {
            self.drop_index(&idx_name)?;
        }
        self.pop_reverse_fk(&schema);
        Ok(())
    }

    pub fn create_index(&self, schema: IndexSchema) -> Result<()> {
        if self.indexes.read().unwrap().contains_key(&schema.name) {
            return Err(Error::schema(format!(
                "index '{}' already exists",
                schema.name
            )));
        }
        if !self.tables.read().unwrap().contains_key(&schema.table) {
            return Err(Error::schema(format!("unknown table '{}'", schema.table)));
        }
        let key = index_entry_key(&schema.name);
        let value = encode_index_schema(&schema);
        self.with_tree(|tree| tree.insert(&key, &value))?;
        self.indexes
            .write()
            .unwrap()
            .insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Rewrites an existing index's catalog entry (e.g. after its root page
    /// changes from a split or rebalance during row writes).
    pub fn put_index(&self, schema: IndexSchema) -> Result<()> {
        let key = index_entry_key(&schema.name);
        let value = encode_index_schema(&schema);
        self.with_tree(|tree| tree.insert(&key, &value))?;
        self.indexes
            .write()
            .unwrap()
            .insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.indexes
            .write()
            .unwrap()
            .remove(name)
            .ok_or_else(|| Error::schema(format!("unknown index '{name}'")))?;
        let key = index_entry_key(name);
        self.with_tree(|tree| {
            tree.delete(&key)?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Option<TableSchema> {
        self.tables.read().unwrap().get(name).cloned()
    }

    pub fn get_index(&self, name: &str) -> Option<IndexSchema> {
        self.indexes.read().unwrap().get(name).cloned()
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut v: Vec<String> = self.tables.read().unwrap().keys().cloned().collect();
        v.sort();
        v
    }

    pub fn list_indexes(&self) -> Vec<String> {
        let mut v: Vec<String> = self.indexes.read().unwrap().keys().cloned().collect();
        v.sort();
        v
    }

    pub fn indexes_for_table(&self, table: &str) -> Vec<IndexSchema> {
        let mut v: Vec<IndexSchema> = self
            .indexes
            .read()
            .unwrap()
            .values()
            .filter(|idx| idx.table == table)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    /// `(child_table, child_column, parent_column)` triples referencing
    /// `parent_table`, for the delete-time RESTRICT check.
    pub fn reverse_fk_for(&self, parent_table: &str) -> Vec<(String, String, String)> {
        self.reverse_fk
            .read()
            .unwrap()
            .get(parent_table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tables_snapshot(&self) -> HashMap<String, TableSchema> {
        self.tables.read().unwrap().clone()
    }

    pub fn indexes_snapshot(&self) -> HashMap<String, IndexSchema> {
        self.indexes.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::OsVfs;
    use tempfile::tempdir;

    fn open_pager(page_size: u32) -> Arc<Pager> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ddb");
        std::mem::forget(dir);
        Arc::new(Pager::create(Box::new(OsVfs), &path, page_size).unwrap())
    }

    fn users_schema(root: u64) -> TableSchema {
        TableSchema {
            name: "users".into(),
            table_root: root,
            next_rowid: 1,
            columns: vec![
                ColumnDef {
                    name: "id".into(),
                    kind: ColumnKind::Integer,
                    not_null: true,
                    unique: true,
                    primary_key: true,
                    foreign_key: None,
                },
                ColumnDef {
                    name: "name".into(),
                    kind: ColumnKind::Text,
                    not_null: true,
                    unique: false,
                    primary_key: false,
                    foreign_key: None,
                },
            ],
        }
    }

    #[test]
    fn create_and_get_table_roundtrips() {
        let pager = open_pager(2048);
        let catalog = Catalog::create(pager.clone()).unwrap();
        let table_root = BTree::create(&pager).unwrap().root();
        catalog.create_table(users_schema(table_root)).unwrap();

        let fetched = catalog.get_table("users").unwrap();
        assert_eq!(fetched.columns.len(), 2);
        assert_eq!(fetched.table_root, table_root);
        assert_eq!(catalog.list_tables(), vec!["users".to_string()]);
    }

    #[test]
    fn duplicate_table_name_rejected() {
        let pager = open_pager(2048);
        let catalog = Catalog::create(pager.clone()).unwrap();
        let table_root = BTree::create(&pager).unwrap().root();
        catalog.create_table(users_schema(table_root)).unwrap();
        assert!(catalog.create_table(users_schema(table_root)).is_err());
    }

    #[test]
    fn reloading_catalog_reconstructs_caches() {
        let pager = open_pager(2048);
        {
            let catalog = Catalog::create(pager.clone()).unwrap();
            let table_root = BTree::create(&pager).unwrap().root();
            catalog.create_table(users_schema(table_root)).unwrap();
            let index_root = BTree::create(&pager).unwrap().root();
            catalog
                .create_index(IndexSchema {
                    name: "users_name_idx".into(),
                    table: "users".into(),
                    column: "name".into(),
                    index_root,
                    unique: false,
                })
                .unwrap();
        }
        let catalog = Catalog::load(pager.clone()).unwrap();
        assert_eq!(catalog.list_tables(), vec!["users".to_string()]);
        assert_eq!(catalog.list_indexes(), vec!["users_name_idx".to_string()]);
        assert_eq!(catalog.indexes_for_table("users").len(), 1);
    }

    #[test]
    fn drop_table_cascades_indexes_and_reverse_fk() {
        let pager = open_pager(2048);
        let catalog = Catalog::create(pager.clone()).unwrap();
        let parent_root = BTree::create(&pager).unwrap().root();
        catalog.create_table(users_schema(parent_root)).unwrap();

        let child_root = BTree::create(&pager).unwrap().root();
        let child = TableSchema {
            name: "orders".into(),
            table_root: child_root,
            next_rowid: 1,
            columns: vec![ColumnDef {
                name: "user_id".into(),
                kind: ColumnKind::Integer,
                not_null: true,
                unique: false,
                primary_key: false,
                foreign_key: Some(ForeignKey {
                    parent_table: "users".into(),
                    parent_column: "id".into(),
                }),
            }],
        };
        catalog.create_table(child).unwrap();
        assert_eq!(catalog.reverse_fk_for("users").len(), 1);

        let idx_root = BTree::create(&pager).unwrap().root();
        catalog
            .create_index(IndexSchema {
                name: "orders_user_idx".into(),
                table: "orders".into(),
                column: "user_id".into(),
                index_root: idx_root,
                unique: false,
            })
            .unwrap();

        catalog.drop_table("orders").unwrap();
        assert!(catalog.get_table("orders").is_none());
        assert!(catalog.get_index("orders_user_idx").is_none());
        assert!(catalog.reverse_fk_for("users").is_empty());
    }

    #[test]
    fn put_table_persists_next_rowid_advance() {
        let pager = open_pager(2048);
        let catalog = Catalog::create(pager.clone()).unwrap();
        let table_root = BTree::create(&pager).unwrap().root();
        let mut schema = users_schema(table_root);
        catalog.create_table(schema.clone()).unwrap();

        schema.next_rowid = 5;
        catalog.put_table(schema).unwrap();
        assert_eq!(catalog.get_table("users").unwrap().next_rowid, 5);

        let reloaded = Catalog::load(pager.clone()).unwrap();
        assert_eq!(reloaded.get_table("users").unwrap().next_rowid, 5);
    }
}
