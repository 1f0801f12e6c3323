//! NOT NULL / UNIQUE / FOREIGN KEY enforcement against catalog-described
//! tables and indexes (spec.md §4.7, §7).
//!
//! UNIQUE and FOREIGN KEY checks probe an index tree keyed by
//! [`crate::btree::index_key`]: seek to the smallest key carrying the
//! target value, then compare the value-bytes prefix of whatever comes
//! back. Tables with no secondary index on the referenced column fall back
//! to a full scan, since spec.md does not require one to exist.

use std::collections::HashMap;

use crate::btree::{index_key, index_key_parts, BTree};
use crate::codec::{decode_record_with_overflow, Value};
use crate::error::{ConstraintKind, Error, Result};
use crate::pager::Pager;

use super::{ColumnDef, IndexSchema, TableSchema};

pub fn check_not_null(columns: &[ColumnDef], values: &[Value]) -> Result<()> {
    for (col, value) in columns.iter().zip(values) {
        if col.not_null && matches!(value, Value::Null) {
            return Err(Error::constraint(
                ConstraintKind::NotNull,
                format!("column '{}' may not be NULL", col.name),
            ));
        }
    }
    Ok(())
}

/// Encodes a value into index-key value-bytes that preserve the type's
/// natural ordering (signed integers get their sign bit flipped so
/// byte-lexicographic order matches numeric order).
pub fn index_value_bytes(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Int64(n) => Ok(((*n as u64) ^ (1u64 << 63)).to_be_bytes().to_vec()),
        Value::Float64(f) => Ok(f.to_be_bytes().to_vec()),
        Value::Bool(b) => Ok(vec![*b as u8]),
        Value::Text(s) => Ok(s.as_bytes().to_vec()),
        Value::Blob(b) => Ok(b.clone()),
        Value::Null => Err(Error::constraint(
            ConstraintKind::NotNull,
            "NULL cannot be indexed",
        )),
    }
}

/// Fails if a differently-rowid'd entry already carries `value_bytes` in
/// `index`. `exclude_rowid` lets an update re-check its own unchanged row.
pub fn check_unique(
    pager: &Pager,
    index: &IndexSchema,
    value_bytes: &[u8],
    exclude_rowid: Option<u64>,
) -> Result<()> {
    let tree = BTree::new(pager, index.index_root);
    let mut cursor = tree.open_cursor_from(&index_key(value_bytes, 0))?;
    while let Some((key, _)) = cursor.next()? {
        let (found_value, rowid) = index_key_parts(&key)?;
        if found_value != value_bytes {
            break;
        }
        if Some(rowid) != exclude_rowid {
            return Err(Error::constraint(
                ConstraintKind::Unique,
                format!("duplicate value for unique index '{}'", index.name),
            ));
        }
    }
    Ok(())
}

/// Verifies `value` exists in `parent`'s `parent_column_index` column,
/// preferring an index probe over a full scan when one is available.
pub fn check_foreign_key_parent_exists(
    pager: &Pager,
    parent: &TableSchema,
    parent_column_index: usize,
    parent_indexes: &[IndexSchema],
    value: &Value,
) -> Result<()> {
    let value_bytes = index_value_bytes(value)?;
    let parent_column_name = &parent.columns[parent_column_index].name;

    if let Some(idx) = parent_indexes
        .iter()
        .find(|i| i.table == parent.name && &i.column == parent_column_name)
    {
        let tree = BTree::new(pager, idx.index_root);
        let mut cursor = tree.open_cursor_from(&index_key(&value_bytes, 0))?;
        if let Some((key, _)) = cursor.next()? {
            let (found_value, _) = index_key_parts(&key)?;
            if found_value == value_bytes {
                return Ok(());
            }
        }
        return Err(missing_parent_error());
    }

    let table_tree = BTree::new(pager, parent.table_root);
    let mut cursor = table_tree.open_cursor()?;
    while let Some((_, record)) = cursor.next()? {
        let decoded = decode_record_with_overflow(pager, &record)?;
        if decoded.get(parent_column_index) == Some(value) {
            return Ok(());
        }
    }
    Err(missing_parent_error())
}

fn missing_parent_error() -> Error {
    Error::constraint(
        ConstraintKind::ForeignKey,
        "referenced parent key does not exist",
    )
}

/// RESTRICT / NO ACTION: fails if any live child row still references
/// `value` through one of `reverse_fk`'s `(child_table, child_column, _)`
/// entries.
pub fn check_no_referencing_children(
    pager: &Pager,
    reverse_fk: &[(String, String, String)],
    tables: &HashMap<String, TableSchema>,
    indexes: &HashMap<String, IndexSchema>,
    value: &Value,
) -> Result<()> {
    let value_bytes = index_value_bytes(value)?;
    for (child_table, child_column, _parent_column) in reverse_fk {
        let Some(child_schema) = tables.get(child_table) else {
            continue;
        };
        let Some(col_idx) = child_schema.column_index(child_column) else {
            continue;
        };

        if let Some(idx) = indexes
            .values()
            .find(|i| &i.table == child_table && &i.column == child_column)
        {
            let tree = BTree::new(pager, idx.index_root);
            let mut cursor = tree.open_cursor_from(&index_key(&value_bytes, 0))?;
            if let Some((key, _)) = cursor.next()? {
                let (found_value, _) = index_key_parts(&key)?;
                if found_value == value_bytes {
                    return Err(referenced_error(child_table));
                }
            }
            continue;
        }

        let table_tree = BTree::new(pager, child_schema.table_root);
        let mut cursor = table_tree.open_cursor()?;
        while let Some((_, record)) = cursor.next()? {
            let decoded = decode_record_with_overflow(pager, &record)?;
            if decoded.get(col_idx) == Some(value) {
                return Err(referenced_error(child_table));
            }
        }
    }
    Ok(())
}

fn referenced_error(child_table: &str) -> Error {
    Error::constraint(
        ConstraintKind::ForeignKey,
        format!("row is referenced by table '{child_table}'"),
    )
}
