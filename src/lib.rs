//! DecentDB: an embedded, single-file relational storage engine with
//! WAL-backed ACID writes and snapshot-isolated reads.
//!
//! This crate is the storage/transaction core only (spec.md §1): no SQL
//! parser, no query planner, no CLI, no FFI. Those are external
//! collaborators built on the API re-exported here.

pub mod btree;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod consts;
mod db;
pub mod error;
pub mod pager;
pub mod row;
pub mod txn;
pub mod vfs;
pub mod wal;

pub use catalog::{ColumnDef, ColumnKind, ForeignKey, IndexSchema, TableSchema};
pub use codec::Value;
pub use config::{Config, ConfigBuilder, SyncMode};
pub use db::Database;
pub use error::{ConstraintKind, Error, Result};
pub use row::{IndexCursor, RowCursor};
pub use txn::{ReadTxn, WriteTxn};
