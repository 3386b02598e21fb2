//! Note repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist every note variant in the single `note` table.
//! - Rebuild the right variant from the `type` discriminator on read.
//! - Own the explicit cascade used when a note is deleted.
//!
//! # Invariants
//! - Write paths call `Note::validate()` before SQL mutations.
//! - Read paths reject rows whose variant columns are inconsistent.
//! - `parent_id` and `type` are immutable after insert.

use crate::db::DbError;
use crate::model::note::{Note, NoteId, NoteKind, NoteVariant};
use crate::model::ValidationError;
use crate::repo::ensure_columns;
use rusqlite::{params, Connection, Row, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const NOTE_SELECT_SQL: &str = "SELECT
    id,
    title,
    content_json,
    content_text,
    created_at,
    updated_at,
    type,
    started_at,
    ended_at,
    parent_id,
    commented_at
FROM note";

/// Note plus its transitive comment subtree.
const SUBTREE_CTE: &str = "WITH RECURSIVE subtree(id) AS (
    SELECT ?1
    UNION
    SELECT note.id FROM note JOIN subtree ON note.parent_id = subtree.id
)";

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Db(DbError),
    NotFound(NoteId),
    /// Write collided with a uniqueness constraint.
    Conflict(String),
    InvalidData(String),
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "note not found: {id}"),
            Self::Conflict(message) => write!(f, "conflict: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted note data: {message}"),
            Self::MissingRequiredTable(table) => {
                write!(f, "repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "repository requires column `{column}` in table `{table}`")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) => None,
            Self::Conflict(_) => None,
            Self::InvalidData(_) => None,
            Self::MissingRequiredTable(_) => None,
            Self::MissingRequiredColumn { .. } => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Rows removed by one cascading delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// Comments under the deleted note, at any depth.
    pub comments_deleted: usize,
    /// Edges touching the deleted note or its comments.
    pub references_deleted: usize,
}

/// Repository interface for note persistence.
pub trait NoteRepository {
    fn create_note(&self, note: &Note) -> RepoResult<NoteId>;
    /// Rewrites mutable columns; `type` and `parent_id` are left untouched.
    fn update_note(&self, note: &Note) -> RepoResult<()>;
    fn get_note(&self, id: NoteId) -> RepoResult<Option<Note>>;
    fn note_exists(&self, id: NoteId) -> RepoResult<bool>;
    /// Logs without a parent, newest `started_at` first.
    fn list_top_level_logs(&self, offset: u32, limit: u32) -> RepoResult<Vec<Note>>;
    /// Direct children of `parent_id`, oldest first.
    fn list_children(&self, parent_id: NoteId, offset: u32, limit: u32) -> RepoResult<Vec<Note>>;
    /// Pages, most recently updated first.
    fn list_pages(&self, offset: u32, limit: u32) -> RepoResult<Vec<Note>>;
    /// Deletes a note, its comment subtree and every edge touching them.
    fn delete_note_cascade(&mut self, id: NoteId) -> RepoResult<CascadeReport>;
}

/// SQLite-backed note repository.
pub struct SqliteNoteRepository<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteNoteRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn mut Connection) -> RepoResult<Self> {
        ensure_columns(
            conn,
            "note",
            &[
                "id",
                "title",
                "content_json",
                "content_text",
                "type",
                "started_at",
                "ended_at",
                "parent_id",
                "commented_at",
            ],
        )?;
        Ok(Self { conn })
    }

    fn query_notes(&self, sql: &str, params: impl rusqlite::Params) -> RepoResult<Vec<Note>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next()? {
            notes.push(parse_note_row(row)?);
        }
        Ok(notes)
    }
}

impl NoteRepository for SqliteNoteRepository<'_> {
    fn create_note(&self, note: &Note) -> RepoResult<NoteId> {
        note.validate()?;
        let columns = VariantColumns::from(&note.variant);

        let inserted = self.conn.execute(
            "INSERT INTO note (
                id,
                title,
                content_json,
                content_text,
                created_at,
                updated_at,
                type,
                started_at,
                ended_at,
                parent_id,
                commented_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                note.id.to_string(),
                note.title.as_deref(),
                note.content_json.as_str(),
                note.content_text.as_deref(),
                note.created_at,
                note.updated_at,
                note.kind().as_db_str(),
                columns.started_at,
                columns.ended_at,
                columns.parent_id,
                columns.commented_at,
            ],
        );

        match inserted {
            Ok(_) => Ok(note.id),
            Err(err) if crate::repo::is_unique_violation(&err) => {
                Err(RepoError::Conflict(format!("note {} already exists", note.id)))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn update_note(&self, note: &Note) -> RepoResult<()> {
        note.validate()?;
        let columns = VariantColumns::from(&note.variant);

        let changed = self.conn.execute(
            "UPDATE note
             SET
                title = ?2,
                content_json = ?3,
                content_text = ?4,
                updated_at = ?5,
                started_at = ?6,
                ended_at = ?7,
                commented_at = ?8
             WHERE id = ?1
               AND type = ?9;",
            params![
                note.id.to_string(),
                note.title.as_deref(),
                note.content_json.as_str(),
                note.content_text.as_deref(),
                note.updated_at,
                columns.started_at,
                columns.ended_at,
                columns.commented_at,
                note.kind().as_db_str(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(note.id));
        }

        Ok(())
    }

    fn get_note(&self, id: NoteId) -> RepoResult<Option<Note>> {
        let mut notes =
            self.query_notes(&format!("{NOTE_SELECT_SQL} WHERE id = ?1;"), [id.to_string()])?;
        Ok(notes.pop())
    }

    fn note_exists(&self, id: NoteId) -> RepoResult<bool> {
        note_exists(self.conn, id)
    }

    fn list_top_level_logs(&self, offset: u32, limit: u32) -> RepoResult<Vec<Note>> {
        self.query_notes(
            &format!(
                "{NOTE_SELECT_SQL}
                 WHERE type = 'log'
                   AND parent_id IS NULL
                 ORDER BY started_at DESC, created_at DESC, id ASC
                 LIMIT ?1 OFFSET ?2;"
            ),
            params![i64::from(limit), i64::from(offset)],
        )
    }

    fn list_children(&self, parent_id: NoteId, offset: u32, limit: u32) -> RepoResult<Vec<Note>> {
        self.query_notes(
            &format!(
                "{NOTE_SELECT_SQL}
                 WHERE parent_id = ?1
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT ?2 OFFSET ?3;"
            ),
            params![parent_id.to_string(), i64::from(limit), i64::from(offset)],
        )
    }

    fn list_pages(&self, offset: u32, limit: u32) -> RepoResult<Vec<Note>> {
        self.query_notes(
            &format!(
                "{NOTE_SELECT_SQL}
                 WHERE type = 'page'
                 ORDER BY updated_at DESC, id ASC
                 LIMIT ?1 OFFSET ?2;"
            ),
            params![i64::from(limit), i64::from(offset)],
        )
    }

    fn delete_note_cascade(&mut self, id: NoteId) -> RepoResult<CascadeReport> {
        let id_text = id.to_string();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !note_exists(&tx, id)? {
            return Err(RepoError::NotFound(id));
        }

        // Counted up front: replies below a deleted comment also go through
        // the `parent_id` cascade, which `changes()` does not report.
        let comments_deleted: usize = tx.query_row(
            &format!("{SUBTREE_CTE} SELECT COUNT(*) - 1 FROM subtree;"),
            [id_text.as_str()],
            |row| row.get(0),
        )?;
        let references_deleted = tx.execute(
            &format!(
                "{SUBTREE_CTE}
                 DELETE FROM note_reference
                 WHERE source_id IN (SELECT id FROM subtree)
                    OR target_id IN (SELECT id FROM subtree);"
            ),
            [id_text.as_str()],
        )?;
        tx.execute(
            &format!(
                "{SUBTREE_CTE}
                 DELETE FROM note
                 WHERE id IN (SELECT id FROM subtree)
                   AND id <> ?1;"
            ),
            [id_text.as_str()],
        )?;
        tx.execute("DELETE FROM note WHERE id = ?1;", [id_text.as_str()])?;
        tx.commit()?;

        Ok(CascadeReport {
            comments_deleted,
            references_deleted,
        })
    }
}

/// Physical projection of variant fields onto nullable columns.
struct VariantColumns {
    started_at: Option<i64>,
    ended_at: Option<i64>,
    parent_id: Option<String>,
    commented_at: Option<i64>,
}

impl From<&NoteVariant> for VariantColumns {
    fn from(variant: &NoteVariant) -> Self {
        match variant {
            NoteVariant::Log {
                started_at,
                ended_at,
            } => Self {
                started_at: Some(*started_at),
                ended_at: *ended_at,
                parent_id: None,
                commented_at: None,
            },
            NoteVariant::Comment {
                parent_id,
                commented_at,
            } => Self {
                started_at: None,
                ended_at: None,
                parent_id: Some(parent_id.to_string()),
                commented_at: Some(*commented_at),
            },
            NoteVariant::Page => Self {
                started_at: None,
                ended_at: None,
                parent_id: None,
                commented_at: None,
            },
        }
    }
}

pub(crate) fn note_exists(conn: &Connection, id: NoteId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM note WHERE id = ?1);",
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn parse_note_row(row: &Row<'_>) -> RepoResult<Note> {
    let id_text: String = row.get("id")?;
    let id = parse_uuid(&id_text, "note.id")?;

    let type_text: String = row.get("type")?;
    let kind = NoteKind::from_db_str(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!("unknown note type `{type_text}` for {id}"))
    })?;

    let started_at: Option<i64> = row.get("started_at")?;
    let ended_at: Option<i64> = row.get("ended_at")?;
    let commented_at: Option<i64> = row.get("commented_at")?;
    let parent_id = match row.get::<_, Option<String>>("parent_id")? {
        Some(value) => Some(parse_uuid(&value, "note.parent_id")?),
        None => None,
    };

    let variant = match kind {
        NoteKind::Log => {
            if parent_id.is_some() {
                return Err(RepoError::InvalidData(format!("log {id} has a parent")));
            }
            let started_at = started_at
                .ok_or_else(|| RepoError::InvalidData(format!("log {id} has no started_at")))?;
            NoteVariant::Log {
                started_at,
                ended_at,
            }
        }
        NoteKind::Comment => {
            if ended_at.is_some() {
                return Err(RepoError::InvalidData(format!("comment {id} has an ended_at")));
            }
            let parent_id = parent_id
                .ok_or_else(|| RepoError::InvalidData(format!("comment {id} has no parent")))?;
            let commented_at = commented_at.ok_or_else(|| {
                RepoError::InvalidData(format!("comment {id} has no commented_at"))
            })?;
            NoteVariant::Comment {
                parent_id,
                commented_at,
            }
        }
        NoteKind::Page => NoteVariant::Page,
    };

    let note = Note {
        id,
        title: row.get("title")?,
        content_json: row.get("content_json")?,
        content_text: row.get("content_text")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        variant,
    };
    note.validate()
        .map_err(|err| RepoError::InvalidData(format!("note {id}: {err}")))?;
    Ok(note)
}
