//! SQLite storage bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure the per-Space SQLite connection.
//! - Apply schema/data migration deltas in deterministic order.
//!
//! # Invariants
//! - Applied deltas are tracked in the `migrations` bookkeeping table, never
//!   inferred from a counter.
//! - Core code must not read/write application data before migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub mod migrations;
mod open;

pub use open::{inspect_store, open_store, open_store_in_memory, StoreOpenMode};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    /// The store file could not be opened because it does not exist.
    StoreNotFound(PathBuf),
    /// One delta failed; every earlier delta stays committed.
    Migration {
        id: u32,
        name: &'static str,
        source: Box<DbError>,
    },
    /// Bookkeeping lists a delta this binary does not ship.
    UnknownAppliedMigration { id: u32, name: String },
    /// Delta registry is malformed (ids not strictly increasing).
    InvalidRegistry(String),
    /// Delta-level failure raised by transform code.
    Transform(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::StoreNotFound(path) => write!(f, "store `{}` does not exist", path.display()),
            Self::Migration { id, name, source } => {
                write!(f, "migration {id} ({name}) failed: {source}")
            }
            Self::UnknownAppliedMigration { id, name } => write!(
                f,
                "store has migration {id} ({name}) applied that this version does not know"
            ),
            Self::InvalidRegistry(message) => write!(f, "invalid migration registry: {message}"),
            Self::Transform(message) => write!(f, "{message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Migration { source, .. } => Some(source.as_ref()),
            Self::StoreNotFound(_) | Self::UnknownAppliedMigration { .. } => None,
            Self::InvalidRegistry(_) => None,
            Self::Transform(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<std::io::Error> for DbError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl DbError {
    /// Returns whether this error came from a failing migration delta.
    pub fn is_migration(&self) -> bool {
        matches!(
            self,
            Self::Migration { .. } | Self::UnknownAppliedMigration { .. }
        )
    }
}
