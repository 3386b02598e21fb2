//! Space lifecycle and the public error taxonomy.
//!
//! # Responsibility
//! - Own open Space connections keyed by filesystem path.
//! - Expose typed CRUD over an open Space.
//! - Map layered storage errors onto stable caller-facing kinds.
//!
//! # Invariants
//! - At most one live connection per Space path.
//! - A Space is registered as open only after every migration succeeded.
//! - Operations never implicitly open a Space.

use crate::db::DbError;
use crate::model::{NoteId, ValidationError};
use crate::repo::note_repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

mod handle;
mod manager;

pub use handle::Space;
pub use manager::SpaceManager;

/// Store file kept inside every Space directory.
pub const STORE_FILE_NAME: &str = "space.sqlite3";

pub type SpaceResult<T> = Result<T, SpaceError>;

/// Stable error code surfaced across the request/response boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    AlreadyExists,
    NotOpen,
    Conflict,
    Migration,
    Storage,
    InvalidData,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::NotOpen => "not_open",
            Self::Conflict => "conflict",
            Self::Migration => "migration",
            Self::Storage => "storage",
            Self::InvalidData => "invalid_data",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by Space Manager and Space operations.
#[derive(Debug)]
pub enum SpaceError {
    Validation(ValidationError),
    NoteNotFound(NoteId),
    SpaceNotFound(PathBuf),
    AlreadyExists(PathBuf),
    NotOpen(PathBuf),
    Conflict(String),
    /// A delta failed; wraps the raw cause.
    Migration(DbError),
    Db(DbError),
    Io(std::io::Error),
    InvalidData(String),
}

impl SpaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NoteNotFound(_) | Self::SpaceNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotOpen(_) => ErrorKind::NotOpen,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Migration(_) => ErrorKind::Migration,
            Self::Db(_) | Self::Io(_) => ErrorKind::Storage,
            Self::InvalidData(_) => ErrorKind::InvalidData,
        }
    }
}

impl Display for SpaceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NoteNotFound(id) => write!(f, "note not found: {id}"),
            Self::SpaceNotFound(path) => write!(f, "space not found: {}", path.display()),
            Self::AlreadyExists(path) => write!(f, "space already exists: {}", path.display()),
            Self::NotOpen(path) => write!(f, "space is not open: {}", path.display()),
            Self::Conflict(message) => write!(f, "conflict: {message}"),
            Self::Migration(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid data: {message}"),
        }
    }
}

impl Error for SpaceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Migration(err) | Self::Db(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for SpaceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for SpaceError {
    fn from(value: DbError) -> Self {
        if value.is_migration() {
            Self::Migration(value)
        } else {
            Self::Db(value)
        }
    }
}

impl From<std::io::Error> for SpaceError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<RepoError> for SpaceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            RepoError::Db(err) => err.into(),
            RepoError::NotFound(id) => Self::NoteNotFound(id),
            RepoError::Conflict(message) => Self::Conflict(message),
            RepoError::InvalidData(message) => Self::InvalidData(message),
            other @ (RepoError::MissingRequiredTable(_)
            | RepoError::MissingRequiredColumn { .. }) => Self::InvalidData(other.to_string()),
        }
    }
}
