//! Reference graph repository over `note_reference`.
//!
//! # Responsibility
//! - Store directed `source -> target` edges between notes.
//! - Join edges with summaries of the note on the other side.
//!
//! # Invariants
//! - At most one edge per `(source_id, target_id)` pair.
//! - Edges never point a note at itself.
//! - Both endpoints must exist before an edge is written.

use crate::model::note::{NoteId, NoteKind, NoteSummary};
use crate::model::reference::{NoteReference, NoteReferences, ReferenceLink};
use crate::repo::ensure_columns;
use crate::repo::note_repo::{note_exists, parse_uuid, RepoError, RepoResult};
use crate::text::derive_preview;
use rusqlite::{params, Connection, OptionalExtension, Row};

const LINK_SELECT_SQL: &str = "SELECT
    r.id AS reference_id,
    r.source_id,
    r.target_id,
    r.created_at AS reference_created_at,
    n.id AS note_id,
    n.title,
    n.content_text,
    n.type
FROM note_reference r";

/// Repository interface for reference edges.
pub trait ReferenceRepository {
    /// Inserts a new edge; a duplicate pair yields `Conflict`.
    fn add_reference(&self, reference: &NoteReference) -> RepoResult<()>;
    fn find_reference(&self, source_id: NoteId, target_id: NoteId)
        -> RepoResult<Option<NoteReference>>;
    fn list_references(&self, note_id: NoteId) -> RepoResult<NoteReferences>;
    /// Removes one edge; returns whether it existed.
    fn remove_reference(&self, source_id: NoteId, target_id: NoteId) -> RepoResult<bool>;
}

/// SQLite-backed reference repository.
pub struct SqliteReferenceRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteReferenceRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_columns(
            conn,
            "note_reference",
            &["id", "source_id", "target_id", "created_at"],
        )?;
        Ok(Self { conn })
    }

    fn ensure_endpoints(&self, source_id: NoteId, target_id: NoteId) -> RepoResult<()> {
        for id in [source_id, target_id] {
            if !note_exists(self.conn, id)? {
                return Err(RepoError::NotFound(id));
            }
        }
        Ok(())
    }

    fn query_links(&self, join_on: &str, filter_column: &str, note_id: NoteId) -> RepoResult<Vec<ReferenceLink>> {
        let mut stmt = self.conn.prepare(&format!(
            "{LINK_SELECT_SQL}
             JOIN note n ON n.id = r.{join_on}
             WHERE r.{filter_column} = ?1
             ORDER BY r.created_at ASC, r.id ASC;"
        ))?;
        let mut rows = stmt.query([note_id.to_string()])?;
        let mut links = Vec::new();
        while let Some(row) = rows.next()? {
            links.push(parse_link_row(row)?);
        }
        Ok(links)
    }
}

impl ReferenceRepository for SqliteReferenceRepository<'_> {
    fn add_reference(&self, reference: &NoteReference) -> RepoResult<()> {
        if reference.source_id == reference.target_id {
            return Err(crate::model::ValidationError::SelfReference(reference.source_id).into());
        }
        self.ensure_endpoints(reference.source_id, reference.target_id)?;

        let inserted = self.conn.execute(
            "INSERT INTO note_reference (id, source_id, target_id, created_at)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                reference.id.to_string(),
                reference.source_id.to_string(),
                reference.target_id.to_string(),
                reference.created_at,
            ],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(err) if crate::repo::is_unique_violation(&err) => Err(RepoError::Conflict(format!(
                "reference {} -> {} already exists",
                reference.source_id, reference.target_id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    fn find_reference(
        &self,
        source_id: NoteId,
        target_id: NoteId,
    ) -> RepoResult<Option<NoteReference>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, source_id, target_id, created_at
                 FROM note_reference
                 WHERE source_id = ?1 AND target_id = ?2;",
                params![source_id.to_string(), target_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, source, target, created_at)) => Ok(Some(NoteReference {
                id: parse_uuid(&id, "note_reference.id")?,
                source_id: parse_uuid(&source, "note_reference.source_id")?,
                target_id: parse_uuid(&target, "note_reference.target_id")?,
                created_at,
            })),
            None => Ok(None),
        }
    }

    fn list_references(&self, note_id: NoteId) -> RepoResult<NoteReferences> {
        if !note_exists(self.conn, note_id)? {
            return Err(RepoError::NotFound(note_id));
        }
        Ok(NoteReferences {
            outbound: self.query_links("target_id", "source_id", note_id)?,
            inbound: self.query_links("source_id", "target_id", note_id)?,
        })
    }

    fn remove_reference(&self, source_id: NoteId, target_id: NoteId) -> RepoResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM note_reference WHERE source_id = ?1 AND target_id = ?2;",
            params![source_id.to_string(), target_id.to_string()],
        )?;
        Ok(removed > 0)
    }
}

fn parse_link_row(row: &Row<'_>) -> RepoResult<ReferenceLink> {
    let reference_id: String = row.get("reference_id")?;
    let source_id: String = row.get("source_id")?;
    let target_id: String = row.get("target_id")?;
    let note_id: String = row.get("note_id")?;
    let type_text: String = row.get("type")?;
    let kind = NoteKind::from_db_str(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!("unknown note type `{type_text}` for {note_id}"))
    })?;
    let content_text: Option<String> = row.get("content_text")?;

    Ok(ReferenceLink {
        reference: NoteReference {
            id: parse_uuid(&reference_id, "note_reference.id")?,
            source_id: parse_uuid(&source_id, "note_reference.source_id")?,
            target_id: parse_uuid(&target_id, "note_reference.target_id")?,
            created_at: row.get("reference_created_at")?,
        },
        note: NoteSummary {
            id: parse_uuid(&note_id, "note.id")?,
            title: row.get("title")?,
            preview: content_text.as_deref().and_then(derive_preview),
            kind,
        },
    })
}
