//! Deltas shipped with this binary, in application order.
//!
//! # Invariants
//! - Ids are never reused or renumbered once released.
//! - A table rebuild copies the exact column list produced by the previous
//!   delta; `ensure_note_shape` aborts the delta otherwise.

use crate::db::migrations::{Migration, MigrationContext};
use crate::db::{DbError, DbResult};
use crate::logging::EventLine;
use crate::model::now_epoch_ms;
use crate::text::extract_optional;
use rusqlite::{params, Transaction};
use serde_json::json;

/// `note` columns after delta 2, in physical order.
const NOTE_COLUMNS: &[&str] = &[
    "id",
    "title",
    "content_json",
    "created_at",
    "updated_at",
    "type",
    "started_at",
    "ended_at",
    "parent_id",
    "commented_at",
    "content_text",
];

/// Subtree of contact notes plus every comment hanging off them.
const CONTACT_SUBTREE_CTE: &str = "WITH RECURSIVE doomed(id) AS (
    SELECT id FROM note WHERE type = 'contact'
    UNION
    SELECT note.id FROM note JOIN doomed ON note.parent_id = doomed.id
)";

/// Returns the full ordered delta registry.
pub fn builtin_migrations() -> Vec<Migration> {
    vec![
        Migration::sql(
            1,
            "create_notes_and_settings",
            include_str!("0001_create_notes_and_settings.sql"),
            include_str!("0001_create_notes_and_settings.down.sql"),
        ),
        Migration::new(
            2,
            "add_note_content_text",
            add_note_content_text,
            |tx, _| {
                tx.execute_batch("ALTER TABLE note DROP COLUMN content_text;")?;
                Ok(())
            },
        ),
        Migration::sql(
            3,
            "create_note_references",
            include_str!("0003_create_note_references.sql"),
            include_str!("0003_create_note_references.down.sql"),
        ),
        Migration::new(
            4,
            "rebuild_note_parent_cascade",
            |tx, _| rebuild_note_table(tx, " ON DELETE CASCADE"),
            |tx, _| rebuild_note_table(tx, ""),
        ),
        Migration::irreversible(5, "archive_and_remove_contacts", archive_and_remove_contacts),
    ]
}

fn add_note_content_text(tx: &Transaction<'_>, ctx: &MigrationContext<'_>) -> DbResult<()> {
    tx.execute_batch("ALTER TABLE note ADD COLUMN content_text TEXT;")?;

    let rows = {
        let mut stmt = tx.prepare("SELECT id, content_json FROM note ORDER BY rowid;")?;
        let mapped = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        mapped.collect::<Result<Vec<_>, _>>()?
    };

    let mut update = tx.prepare("UPDATE note SET content_text = ?2 WHERE id = ?1;")?;
    for (id, content_json) in &rows {
        update.execute(params![id, extract_optional(ctx.extractor, content_json)])?;
    }

    EventLine::ok("migration_backfill", "db")
        .field("column", "content_text")
        .field("rows", rows.len())
        .emit();
    Ok(())
}

/// Recreates `note` with the given `parent_id` delete action.
///
/// SQLite cannot alter a foreign key in place: build the new shape, copy
/// every row, drop the old table, rename, recreate indexes.
fn rebuild_note_table(tx: &Transaction<'_>, parent_on_delete: &str) -> DbResult<()> {
    ensure_note_shape(tx)?;
    let columns = NOTE_COLUMNS.join(", ");
    let before: i64 = tx.query_row("SELECT COUNT(*) FROM note;", [], |row| row.get(0))?;

    tx.execute_batch(&format!(
        "CREATE TABLE note_rebuild (
            id TEXT PRIMARY KEY NOT NULL,
            title TEXT,
            content_json TEXT NOT NULL DEFAULT '{{}}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            type TEXT NOT NULL CHECK (type IN ('log', 'comment', 'page', 'contact')),
            started_at INTEGER,
            ended_at INTEGER,
            parent_id TEXT REFERENCES note(id){parent_on_delete},
            commented_at INTEGER,
            content_text TEXT
        );
        INSERT INTO note_rebuild ({columns}) SELECT {columns} FROM note ORDER BY rowid;"
    ))?;

    let after: i64 = tx.query_row("SELECT COUNT(*) FROM note_rebuild;", [], |row| row.get(0))?;
    if after != before {
        return Err(DbError::Transform(format!(
            "note rebuild copied {after} of {before} rows"
        )));
    }

    tx.execute_batch(
        "DROP TABLE note;
         ALTER TABLE note_rebuild RENAME TO note;
         CREATE INDEX idx_note_type_started_at ON note(type, started_at);
         CREATE INDEX idx_note_parent_id ON note(parent_id);",
    )?;
    Ok(())
}

fn ensure_note_shape(tx: &Transaction<'_>) -> DbResult<()> {
    let mut stmt = tx.prepare("PRAGMA table_info(note);")?;
    let found = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    if found != NOTE_COLUMNS {
        return Err(DbError::Transform(format!(
            "note table shape mismatch: expected [{}], found [{}]",
            NOTE_COLUMNS.join(", "),
            found.join(", ")
        )));
    }
    Ok(())
}

/// Copies contact notes (and their comments) into `archived_note`, then
/// deletes them together with their reference edges.
fn archive_and_remove_contacts(tx: &Transaction<'_>, _: &MigrationContext<'_>) -> DbResult<()> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS archived_note (
            id TEXT PRIMARY KEY NOT NULL,
            type TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            archived_at INTEGER NOT NULL
        );",
    )?;

    let archived_at = now_epoch_ms();
    let mut archived = 0usize;
    {
        let mut select = tx.prepare(&format!(
            "{CONTACT_SUBTREE_CTE}
             SELECT id, title, content_json, content_text, created_at, updated_at,
                    type, started_at, ended_at, parent_id, commented_at
             FROM note
             WHERE id IN (SELECT id FROM doomed)
             ORDER BY rowid;"
        ))?;
        let mut insert = tx.prepare(
            "INSERT OR REPLACE INTO archived_note (id, type, payload_json, archived_at)
             VALUES (?1, ?2, ?3, ?4);",
        )?;
        let mut rows = select.query([])?;
        while let Some(row) = rows.next()? {
            let id: String = row.get("id")?;
            let kind: String = row.get("type")?;
            let payload = json!({
                "id": id,
                "title": row.get::<_, Option<String>>("title")?,
                "content_json": row.get::<_, String>("content_json")?,
                "content_text": row.get::<_, Option<String>>("content_text")?,
                "created_at": row.get::<_, i64>("created_at")?,
                "updated_at": row.get::<_, i64>("updated_at")?,
                "type": kind,
                "started_at": row.get::<_, Option<i64>>("started_at")?,
                "ended_at": row.get::<_, Option<i64>>("ended_at")?,
                "parent_id": row.get::<_, Option<String>>("parent_id")?,
                "commented_at": row.get::<_, Option<i64>>("commented_at")?,
            });
            insert.execute(params![id, kind, payload.to_string(), archived_at])?;
            archived += 1;
        }
    }

    let references = tx.execute(
        &format!(
            "{CONTACT_SUBTREE_CTE}
             DELETE FROM note_reference
             WHERE source_id IN (SELECT id FROM doomed)
                OR target_id IN (SELECT id FROM doomed);"
        ),
        [],
    )?;
    let notes = tx.execute(
        &format!("{CONTACT_SUBTREE_CTE} DELETE FROM note WHERE id IN (SELECT id FROM doomed);"),
        [],
    )?;

    EventLine::ok("migration_archive", "db")
        .field("archived", archived)
        .field("notes_deleted", notes)
        .field("references_deleted", references)
        .emit();
    Ok(())
}
