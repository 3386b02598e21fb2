//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas required by core behavior.
//! - Run pending migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Returned connections have migrations fully applied; on failure the
//!   connection is dropped before the error is returned.
//! - `StoreOpenMode::Existing` never creates a file; a missing store is
//!   reported as `DbError::StoreNotFound` by the open call itself.

use super::migrations::{
    MigrationContext, MigrationProgress, MigrationReport, MigrationStatus, Migrator,
};
use super::{DbError, DbResult};
use crate::logging::EventLine;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use std::path::Path;
use std::time::{Duration, Instant};

/// Whether the store file may be created by the open call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOpenMode {
    /// Create the file when missing.
    Create,
    /// Fail when the file is missing.
    Existing,
}

impl StoreOpenMode {
    fn label(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Existing => "existing",
        }
    }

    fn flags(self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            Self::Create => base | OpenFlags::SQLITE_OPEN_CREATE,
            Self::Existing => base,
        }
    }
}

/// Opens a store file and applies all pending migrations.
///
/// # Side effects
/// - Performs connection bootstrap and migration runs.
/// - Emits `db_open` logging events with duration and status.
pub fn open_store(
    path: impl AsRef<Path>,
    mode: StoreOpenMode,
    migrator: &Migrator,
    ctx: &MigrationContext<'_>,
    on_progress: &mut dyn FnMut(MigrationProgress),
) -> DbResult<(Connection, MigrationReport)> {
    let started_at = Instant::now();
    EventLine::start("db_open", "db")
        .field("mode", mode.label())
        .emit();

    let conn = connect(path.as_ref(), mode, started_at)?;
    match bootstrap_connection(conn, migrator, ctx, on_progress) {
        Ok((conn, report)) => {
            EventLine::ok("db_open", "db")
                .field("mode", mode.label())
                .field("applied", report.applied.len())
                .elapsed(started_at)
                .emit();
            Ok((conn, report))
        }
        Err(err) => {
            EventLine::error("db_open", "db")
                .field("mode", mode.label())
                .elapsed(started_at)
                .field("error_code", "db_bootstrap_failed")
                .field("error", &err)
                .emit();
            Err(err)
        }
    }
}

/// Opens an in-memory store and applies all pending migrations.
pub fn open_store_in_memory(
    migrator: &Migrator,
    ctx: &MigrationContext<'_>,
) -> DbResult<(Connection, MigrationReport)> {
    let conn = Connection::open_in_memory()?;
    bootstrap_connection(conn, migrator, ctx, &mut |_| {})
}

/// Reads the migration status of an existing store without applying
/// anything.
///
/// No delta runs and no bookkeeping is written; the connection is dropped
/// before returning.
pub fn inspect_store(
    path: impl AsRef<Path>,
    migrator: &Migrator,
) -> DbResult<Vec<MigrationStatus>> {
    let path = path.as_ref();
    let conn = Connection::open_with_flags(path, StoreOpenMode::Existing.flags())
        .map_err(|err| not_found_or(err, path))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    migrator.status(&conn)
}

fn connect(path: &Path, mode: StoreOpenMode, started_at: Instant) -> DbResult<Connection> {
    Connection::open_with_flags(path, mode.flags()).map_err(|err| {
        let err = not_found_or(err, path);
        EventLine::error("db_open", "db")
            .field("mode", mode.label())
            .elapsed(started_at)
            .field("error_code", "db_open_failed")
            .field("error", &err)
            .emit();
        err
    })
}

fn not_found_or(err: rusqlite::Error, path: &Path) -> DbError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::CannotOpen => {
            DbError::StoreNotFound(path.to_path_buf())
        }
        _ => err.into(),
    }
}

fn bootstrap_connection(
    mut conn: Connection,
    migrator: &Migrator,
    ctx: &MigrationContext<'_>,
    on_progress: &mut dyn FnMut(MigrationProgress),
) -> DbResult<(Connection, MigrationReport)> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    let report = migrator.apply(&mut conn, ctx, on_progress)?;
    Ok((conn, report))
}
