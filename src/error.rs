//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the core returns a tagged [`Error`] rather
//! than panicking or throwing. The variants mirror the kinds surfaced at the
//! core-facing API boundary: `IO`, `CORRUPTION`, `CONSTRAINT`, `SCHEMA`,
//! `BUSY`, `READONLY`, `INTERNAL`.

use std::fmt;
use std::io;

/// The kind of constraint a [`Error::Constraint`] violates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    NotNull,
    Unique,
    PrimaryKey,
    ForeignKey,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstraintKind::NotNull => "NOT NULL",
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::PrimaryKey => "PRIMARY KEY",
            ConstraintKind::ForeignKey => "FOREIGN KEY",
        };
        f.write_str(s)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("constraint violation ({kind}): {message}")]
    Constraint {
        kind: ConstraintKind,
        message: String,
    },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("database busy: writer held")]
    Busy,

    #[error("database is read-only")]
    Readonly,

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    pub fn schema<S: Into<String>>(msg: S) -> Self {
        Error::Schema(msg.into())
    }

    pub fn constraint<S: Into<String>>(kind: ConstraintKind, msg: S) -> Self {
        Error::Constraint {
            kind,
            message: msg.into(),
        }
    }

    /// Attach a short "what were we doing" prefix to an I/O or corruption
    /// error.
    pub fn context<S: Into<String>>(self, what: S) -> Self {
        let what = what.into();
        match self {
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), format!("{what}: {e}"))),
            Error::Corruption(m) => Error::Corruption(format!("{what}: {m}")),
            Error::Schema(m) => Error::Schema(format!("{what}: {m}")),
            Error::Internal(m) => Error::Internal(format!("{what}: {m}")),
            other => other,
        }
    }
}

pub trait ResultExt<T> {
    fn with_context<S: Into<String>>(self, what: impl FnOnce() -> S) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<S: Into<String>>(self, what: impl FnOnce() -> S) -> Result<T> {
        self.map_err(|e| e.context(what().into()))
    }
}
