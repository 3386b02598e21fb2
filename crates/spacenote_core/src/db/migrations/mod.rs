//! Migration registry and executor.
//!
//! # Responsibility
//! - Register schema/data deltas in strictly increasing id order.
//! - Apply each pending delta inside its own transaction.
//! - Keep an append-only `migrations` bookkeeping record of applied deltas.
//!
//! # Invariants
//! - Pending deltas are every registered delta absent from bookkeeping.
//! - A failing delta leaves no bookkeeping row; earlier deltas stay committed.
//! - Foreign-key enforcement is off while deltas run and restored afterwards.

use crate::db::{DbError, DbResult};
use crate::model::now_epoch_ms;
use crate::text::TextExtractor;
use crate::logging::EventLine;
use rusqlite::{params, Connection, Transaction};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Instant;

mod deltas;

pub use deltas::builtin_migrations;

/// Delta body executed against an open transaction.
pub type MigrationFn =
    Arc<dyn Fn(&Transaction<'_>, &MigrationContext<'_>) -> DbResult<()> + Send + Sync>;

const BOOKKEEPING_SQL: &str = "CREATE TABLE IF NOT EXISTS migrations (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL
);";

/// Collaborators available to delta bodies.
pub struct MigrationContext<'a> {
    pub extractor: &'a dyn TextExtractor,
}

/// One ordered, bookkeeping-tracked unit of schema or data change.
#[derive(Clone)]
pub struct Migration {
    pub id: u32,
    pub name: &'static str,
    up: MigrationFn,
    down: MigrationFn,
    reversible: bool,
}

impl Migration {
    /// Creates a delta from arbitrary forward/backward transform logic.
    pub fn new<U, D>(id: u32, name: &'static str, up: U, down: D) -> Self
    where
        U: Fn(&Transaction<'_>, &MigrationContext<'_>) -> DbResult<()> + Send + Sync + 'static,
        D: Fn(&Transaction<'_>, &MigrationContext<'_>) -> DbResult<()> + Send + Sync + 'static,
    {
        Self {
            id,
            name,
            up: Arc::new(up),
            down: Arc::new(down),
            reversible: true,
        }
    }

    /// Creates a purely declarative delta from two SQL batches.
    pub fn sql(id: u32, name: &'static str, up_sql: &'static str, down_sql: &'static str) -> Self {
        Self::new(
            id,
            name,
            move |tx, _| Ok(tx.execute_batch(up_sql)?),
            move |tx, _| Ok(tx.execute_batch(down_sql)?),
        )
    }

    /// Creates a delta whose forward step destroys data.
    ///
    /// The down step is a no-op: rolling back only forgets the bookkeeping
    /// row and never recreates removed rows.
    pub fn irreversible<U>(id: u32, name: &'static str, up: U) -> Self
    where
        U: Fn(&Transaction<'_>, &MigrationContext<'_>) -> DbResult<()> + Send + Sync + 'static,
    {
        Self {
            id,
            name,
            up: Arc::new(up),
            down: Arc::new(no_op_down),
            reversible: false,
        }
    }

    pub fn is_reversible(&self) -> bool {
        self.reversible
    }
}

impl Debug for Migration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("reversible", &self.reversible)
            .finish()
    }
}

/// Progress signal emitted before each pending delta runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationProgress {
    /// 1-based index within the pending set.
    pub current: usize,
    /// Number of pending deltas in this run.
    pub total: usize,
    pub id: u32,
    pub name: &'static str,
}

/// Outcome of one `apply` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Ids applied by this run, ascending.
    pub applied: Vec<u32>,
    /// Pending count computed at the start of the run.
    pub total_pending: usize,
}

/// Applied/pending state for one registered delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub id: u32,
    pub name: &'static str,
    /// Epoch ms when applied; `None` while pending.
    pub applied_at: Option<i64>,
}

/// Ordered delta registry with an executor.
#[derive(Debug, Clone)]
pub struct Migrator {
    deltas: Vec<Migration>,
}

impl Migrator {
    /// Builds a registry, rejecting duplicate or out-of-order ids.
    pub fn new(deltas: Vec<Migration>) -> DbResult<Self> {
        for pair in deltas.windows(2) {
            if pair[1].id <= pair[0].id {
                return Err(DbError::InvalidRegistry(format!(
                    "migration id {} ({}) must be greater than {} ({})",
                    pair[1].id, pair[1].name, pair[0].id, pair[0].name
                )));
            }
        }
        Ok(Self { deltas })
    }

    /// Registry shipped with this binary.
    pub fn builtin() -> Self {
        Self {
            deltas: builtin_migrations(),
        }
    }

    pub fn deltas(&self) -> &[Migration] {
        &self.deltas
    }

    /// Returns the highest registered delta id.
    pub fn latest_id(&self) -> u32 {
        self.deltas.last().map_or(0, |migration| migration.id)
    }

    /// Lists registered deltas not yet recorded as applied.
    pub fn pending(&self, conn: &Connection) -> DbResult<Vec<&Migration>> {
        ensure_bookkeeping(conn)?;
        let applied = self.load_known_applied(conn)?;
        Ok(self.pending_against(&applied))
    }

    /// Reports every registered delta with its applied timestamp, if any.
    ///
    /// Only reads: a store without bookkeeping reports every delta pending.
    pub fn status(&self, conn: &Connection) -> DbResult<Vec<MigrationStatus>> {
        let applied = if bookkeeping_exists(conn)? {
            self.load_known_applied(conn)?
        } else {
            BTreeMap::new()
        };
        Ok(self
            .deltas
            .iter()
            .map(|migration| MigrationStatus {
                id: migration.id,
                name: migration.name,
                applied_at: applied.get(&migration.id).map(|(_, at)| *at),
            })
            .collect())
    }

    /// Applies all pending deltas in ascending id order.
    ///
    /// # Errors
    /// - `UnknownAppliedMigration` when bookkeeping lists a delta this
    ///   registry does not contain; nothing runs in that case.
    /// - `Migration` wrapping the first failing delta's cause. Deltas applied
    ///   before it remain committed.
    pub fn apply(
        &self,
        conn: &mut Connection,
        ctx: &MigrationContext<'_>,
        on_progress: &mut dyn FnMut(MigrationProgress),
    ) -> DbResult<MigrationReport> {
        let started_at = Instant::now();
        ensure_bookkeeping(conn)?;
        let applied = self.load_known_applied(conn)?;
        let pending = self.pending_against(&applied);
        let total_pending = pending.len();

        EventLine::start("migration_run", "db")
            .field("pending", total_pending)
            .field("latest", self.latest_id())
            .emit();

        if pending.is_empty() {
            EventLine::ok("migration_run", "db")
                .field("applied", 0)
                .elapsed(started_at)
                .emit();
            return Ok(MigrationReport {
                applied: Vec::new(),
                total_pending,
            });
        }

        let outcome = with_foreign_keys_off(conn, |conn| {
            let mut applied_ids = Vec::with_capacity(total_pending);
            for (index, migration) in pending.iter().enumerate() {
                on_progress(MigrationProgress {
                    current: index + 1,
                    total: total_pending,
                    id: migration.id,
                    name: migration.name,
                });
                run_forward(conn, migration, ctx)?;
                applied_ids.push(migration.id);
            }
            Ok(applied_ids)
        });

        match outcome {
            Ok(applied) => {
                EventLine::ok("migration_run", "db")
                    .field("applied", applied.len())
                    .elapsed(started_at)
                    .emit();
                Ok(MigrationReport {
                    applied,
                    total_pending,
                })
            }
            Err(err) => {
                EventLine::error("migration_run", "db")
                    .elapsed(started_at)
                    .field("error", &err)
                    .emit();
                Err(err)
            }
        }
    }

    /// Reverts the most recently applied delta.
    ///
    /// Returns the reverted id, or `None` when nothing is applied.
    pub fn rollback_last(
        &self,
        conn: &mut Connection,
        ctx: &MigrationContext<'_>,
    ) -> DbResult<Option<u32>> {
        ensure_bookkeeping(conn)?;
        let applied = self.load_known_applied(conn)?;
        let Some(last_id) = applied.keys().next_back().copied() else {
            return Ok(None);
        };
        let Some(migration) = self.deltas.iter().find(|m| m.id == last_id) else {
            return Ok(None);
        };

        with_foreign_keys_off(conn, |conn| {
            backward_in_tx(conn, migration, ctx).map_err(|source| wrap_failure(migration, source))
        })?;

        EventLine::ok("migration_rollback", "db")
            .field("id", migration.id)
            .field("name", migration.name)
            .field("reversible", migration.reversible)
            .emit();
        Ok(Some(migration.id))
    }

    fn pending_against(&self, applied: &BTreeMap<u32, (String, i64)>) -> Vec<&Migration> {
        self.deltas
            .iter()
            .filter(|migration| !applied.contains_key(&migration.id))
            .collect()
    }

    fn load_known_applied(&self, conn: &Connection) -> DbResult<BTreeMap<u32, (String, i64)>> {
        let applied = load_applied(conn)?;
        for (id, (name, _)) in &applied {
            if !self.deltas.iter().any(|migration| migration.id == *id) {
                return Err(DbError::UnknownAppliedMigration {
                    id: *id,
                    name: name.clone(),
                });
            }
        }
        Ok(applied)
    }
}

fn run_forward(
    conn: &mut Connection,
    migration: &Migration,
    ctx: &MigrationContext<'_>,
) -> DbResult<()> {
    let started_at = Instant::now();
    match forward_in_tx(conn, migration, ctx) {
        Ok(()) => {
            EventLine::ok("migration_apply", "db")
                .field("id", migration.id)
                .field("name", migration.name)
                .elapsed(started_at)
                .emit();
            Ok(())
        }
        Err(source) => {
            EventLine::error("migration_apply", "db")
                .field("id", migration.id)
                .field("name", migration.name)
                .elapsed(started_at)
                .field("error", &source)
                .emit();
            Err(wrap_failure(migration, source))
        }
    }
}

fn forward_in_tx(
    conn: &mut Connection,
    migration: &Migration,
    ctx: &MigrationContext<'_>,
) -> DbResult<()> {
    let tx = conn.transaction()?;
    (migration.up)(&tx, ctx)?;
    check_foreign_keys(&tx)?;
    tx.execute(
        "INSERT INTO migrations (id, name, applied_at) VALUES (?1, ?2, ?3);",
        params![migration.id, migration.name, now_epoch_ms()],
    )?;
    tx.commit()?;
    Ok(())
}

fn backward_in_tx(
    conn: &mut Connection,
    migration: &Migration,
    ctx: &MigrationContext<'_>,
) -> DbResult<()> {
    let tx = conn.transaction()?;
    (migration.down)(&tx, ctx)?;
    check_foreign_keys(&tx)?;
    tx.execute("DELETE FROM migrations WHERE id = ?1;", [migration.id])?;
    tx.commit()?;
    Ok(())
}

fn no_op_down(_: &Transaction<'_>, _: &MigrationContext<'_>) -> DbResult<()> {
    Ok(())
}

fn wrap_failure(migration: &Migration, source: DbError) -> DbError {
    DbError::Migration {
        id: migration.id,
        name: migration.name,
        source: Box::new(source),
    }
}

fn with_foreign_keys_off<T>(
    conn: &mut Connection,
    body: impl FnOnce(&mut Connection) -> DbResult<T>,
) -> DbResult<T> {
    let enabled: i64 = conn.query_row("PRAGMA foreign_keys;", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
    let outcome = body(conn);
    let restore = if enabled == 1 {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    } else {
        Ok(())
    };
    let value = outcome?;
    restore?;
    Ok(value)
}

fn check_foreign_keys(tx: &Transaction<'_>) -> DbResult<()> {
    let mut stmt = tx.prepare("PRAGMA foreign_key_check;")?;
    let mut rows = stmt.query([])?;
    if let Some(row) = rows.next()? {
        let table: String = row.get(0)?;
        let parent: String = row.get(2)?;
        return Err(DbError::Transform(format!(
            "foreign key violation: table `{table}` references missing `{parent}` row"
        )));
    }
    Ok(())
}

fn ensure_bookkeeping(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(BOOKKEEPING_SQL)?;
    Ok(())
}

fn bookkeeping_exists(conn: &Connection) -> DbResult<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'migrations');",
        [],
        |row| row.get::<_, bool>(0),
    )?;
    Ok(exists)
}

fn load_applied(conn: &Connection) -> DbResult<BTreeMap<u32, (String, i64)>> {
    let mut stmt = conn.prepare("SELECT id, name, applied_at FROM migrations ORDER BY id ASC;")?;
    let mut rows = stmt.query([])?;
    let mut applied = BTreeMap::new();
    while let Some(row) = rows.next()? {
        applied.insert(row.get::<_, u32>(0)?, (row.get(1)?, row.get(2)?));
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::{Migration, MigrationContext, Migrator};
    use crate::db::DbError;
    use crate::text::DocumentTextExtractor;
    use rusqlite::Connection;

    fn table_exists(conn: &Connection, table: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
            [table],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn registry_rejects_out_of_order_ids() {
        let err = Migrator::new(vec![
            Migration::sql(2, "second", "SELECT 1;", "SELECT 1;"),
            Migration::sql(1, "first", "SELECT 1;", "SELECT 1;"),
        ])
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidRegistry(_)));
    }

    #[test]
    fn registry_rejects_duplicate_ids() {
        let err = Migrator::new(vec![
            Migration::sql(1, "a", "SELECT 1;", "SELECT 1;"),
            Migration::sql(1, "b", "SELECT 1;", "SELECT 1;"),
        ])
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidRegistry(_)));
    }

    #[test]
    fn progress_reports_index_and_total_for_pending_only() {
        let migrator = Migrator::new(vec![
            Migration::sql(1, "a", "CREATE TABLE a (x INTEGER);", "DROP TABLE a;"),
            Migration::sql(2, "b", "CREATE TABLE b (x INTEGER);", "DROP TABLE b;"),
        ])
        .unwrap();
        let extractor = DocumentTextExtractor;
        let ctx = MigrationContext {
            extractor: &extractor,
        };
        let mut conn = Connection::open_in_memory().unwrap();

        let mut seen = Vec::new();
        let report = migrator
            .apply(&mut conn, &ctx, &mut |p| seen.push((p.current, p.total, p.id)))
            .unwrap();
        assert_eq!(report.applied, vec![1, 2]);
        assert_eq!(seen, vec![(1, 2, 1), (2, 2, 2)]);
        assert!(table_exists(&conn, "a"));
        assert!(table_exists(&conn, "b"));
    }

    #[test]
    fn rollback_last_runs_down_and_forgets_bookkeeping_row() {
        let migrator = Migrator::new(vec![
            Migration::sql(1, "a", "CREATE TABLE a (x INTEGER);", "DROP TABLE a;"),
            Migration::sql(2, "b", "CREATE TABLE b (x INTEGER);", "DROP TABLE b;"),
        ])
        .unwrap();
        let extractor = DocumentTextExtractor;
        let ctx = MigrationContext {
            extractor: &extractor,
        };
        let mut conn = Connection::open_in_memory().unwrap();
        migrator.apply(&mut conn, &ctx, &mut |_| {}).unwrap();

        assert_eq!(migrator.rollback_last(&mut conn, &ctx).unwrap(), Some(2));
        assert!(!table_exists(&conn, "b"));
        assert_eq!(migrator.pending(&conn).unwrap().len(), 1);

        let report = migrator.apply(&mut conn, &ctx, &mut |_| {}).unwrap();
        assert_eq!(report.applied, vec![2]);
    }

    #[test]
    fn irreversible_down_is_a_no_op() {
        let migrator = Migrator::new(vec![
            Migration::sql(
                1,
                "seed",
                "CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1), (2);",
                "DROP TABLE t;",
            ),
            Migration::irreversible(2, "purge", |tx, _| {
                tx.execute_batch("DELETE FROM t;")?;
                Ok(())
            }),
        ])
        .unwrap();
        let extractor = DocumentTextExtractor;
        let ctx = MigrationContext {
            extractor: &extractor,
        };
        let mut conn = Connection::open_in_memory().unwrap();
        migrator.apply(&mut conn, &ctx, &mut |_| {}).unwrap();
        assert!(!migrator.deltas()[1].is_reversible());

        migrator.rollback_last(&mut conn, &ctx).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn unknown_applied_delta_blocks_the_run() {
        let migrator = Migrator::new(vec![Migration::sql(
            1,
            "a",
            "CREATE TABLE a (x INTEGER);",
            "DROP TABLE a;",
        )])
        .unwrap();
        let extractor = DocumentTextExtractor;
        let ctx = MigrationContext {
            extractor: &extractor,
        };
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(super::BOOKKEEPING_SQL).unwrap();
        conn.execute(
            "INSERT INTO migrations (id, name, applied_at) VALUES (99, 'future', 0);",
            [],
        )
        .unwrap();

        let err = migrator.apply(&mut conn, &ctx, &mut |_| {}).unwrap_err();
        assert!(matches!(err, DbError::UnknownAppliedMigration { id: 99, .. }));
        assert!(!table_exists(&conn, "a"));
    }
}
