//! Handle to one open Space.
//!
//! # Responsibility
//! - Serialize every operation on the Space's single connection.
//! - Wire repositories and services per call.
//!
//! # Invariants
//! - One operation runs to completion before the next one starts.
//! - After release every operation fails with `NotOpen`.

use crate::db::migrations::{MigrationContext, MigrationStatus, Migrator};
use crate::logging::EventLine;
use crate::model::note::{Note, NoteId};
use crate::model::reference::{NoteReference, NoteReferences};
use crate::model::setting::{normalize_setting_key, Setting};
use crate::repo::note_repo::{CascadeReport, NoteRepository, SqliteNoteRepository};
use crate::repo::reference_repo::SqliteReferenceRepository;
use crate::repo::setting_repo::{SettingRepository, SqliteSettingRepository};
use crate::service::entry_service::{EntryService, EntryUpdate, NewEntry};
use crate::service::page_service::PageService;
use crate::service::reference_service::ReferenceService;
use crate::space::{SpaceError, SpaceResult};
use crate::text::TextExtractor;
use log::Level;
use rusqlite::Connection;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Open Space shared between callers of the same path.
pub struct Space {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
    extractor: Arc<dyn TextExtractor>,
    migrator: Arc<Migrator>,
}

impl Debug for Space {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Space {
    pub(crate) fn new(
        path: PathBuf,
        conn: Connection,
        extractor: Arc<dyn TextExtractor>,
        migrator: Arc<Migrator>,
    ) -> Self {
        Self {
            path,
            conn: Mutex::new(Some(conn)),
            extractor,
            migrator,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drops the connection. Returns `false` when it was already released.
    pub(crate) fn release(&self) -> bool {
        let released = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        released.is_some()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> SpaceResult<T>) -> SpaceResult<T> {
        // A panic mid-operation rolls back its transaction on drop, so the
        // connection is still usable after poisoning.
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard
            .as_mut()
            .ok_or_else(|| SpaceError::NotOpen(self.path.clone()))?;
        f(conn)
    }

    fn entries<'c>(
        &'c self,
        conn: &'c mut Connection,
    ) -> SpaceResult<EntryService<'c, SqliteNoteRepository<'c>>> {
        Ok(EntryService::new(
            SqliteNoteRepository::try_new(conn)?,
            self.extractor.as_ref(),
        ))
    }

    fn pages<'c>(
        &'c self,
        conn: &'c mut Connection,
    ) -> SpaceResult<PageService<'c, SqliteNoteRepository<'c>>> {
        Ok(PageService::new(
            SqliteNoteRepository::try_new(conn)?,
            self.extractor.as_ref(),
        ))
    }

    fn references(conn: &Connection) -> SpaceResult<ReferenceService<SqliteReferenceRepository<'_>>> {
        Ok(ReferenceService::new(SqliteReferenceRepository::try_new(
            conn,
        )?))
    }

    /// Creates a log, or a comment when `entry.parent_id` is set.
    pub fn create_entry(&self, entry: &NewEntry) -> SpaceResult<Note> {
        self.with_conn(|conn| {
            let note = self.entries(conn)?.create_entry(entry)?;
            note_event("entry_create", &note).emit();
            Ok(note)
        })
    }

    /// Reads a log or comment.
    pub fn get_entry(&self, id: NoteId) -> SpaceResult<Note> {
        self.with_conn(|conn| {
            self.entries(conn)?
                .get_entry(id)?
                .ok_or(SpaceError::NoteNotFound(id))
        })
    }

    /// Reads any note variant.
    pub fn get_note(&self, id: NoteId) -> SpaceResult<Note> {
        self.with_conn(|conn| {
            SqliteNoteRepository::try_new(conn)?
                .get_note(id)?
                .ok_or(SpaceError::NoteNotFound(id))
        })
    }

    pub fn list_top_level_entries(&self, offset: u32, limit: u32) -> SpaceResult<Vec<Note>> {
        self.with_conn(|conn| Ok(self.entries(conn)?.list_top_level_entries(offset, limit)?))
    }

    pub fn list_child_entries(
        &self,
        parent_id: NoteId,
        offset: u32,
        limit: u32,
    ) -> SpaceResult<Vec<Note>> {
        self.with_conn(|conn| {
            Ok(self
                .entries(conn)?
                .list_child_entries(parent_id, offset, limit)?)
        })
    }

    pub fn update_entry(&self, id: NoteId, update: &EntryUpdate) -> SpaceResult<Note> {
        self.with_conn(|conn| {
            let note = self.entries(conn)?.update_entry(id, update)?;
            note_event("entry_update", &note).emit();
            Ok(note)
        })
    }

    pub fn delete_entry(&self, id: NoteId) -> SpaceResult<CascadeReport> {
        self.with_conn(|conn| {
            let report = self.entries(conn)?.delete_entry(id)?;
            cascade_event(id, "entry", &report).emit();
            Ok(report)
        })
    }

    pub fn create_page(&self, title: &str, content_json: &str) -> SpaceResult<Note> {
        self.with_conn(|conn| {
            let note = self.pages(conn)?.create_page(title, content_json)?;
            note_event("entry_create", &note).emit();
            Ok(note)
        })
    }

    pub fn update_page(&self, id: NoteId, title: &str, content_json: &str) -> SpaceResult<Note> {
        self.with_conn(|conn| {
            let note = self.pages(conn)?.update_page(id, title, content_json)?;
            note_event("entry_update", &note).emit();
            Ok(note)
        })
    }

    pub fn list_pages(&self, offset: u32, limit: u32) -> SpaceResult<Vec<Note>> {
        self.with_conn(|conn| Ok(self.pages(conn)?.list_pages(offset, limit)?))
    }

    pub fn delete_page(&self, id: NoteId) -> SpaceResult<CascadeReport> {
        self.with_conn(|conn| {
            let report = self.pages(conn)?.delete_page(id)?;
            cascade_event(id, "page", &report).emit();
            Ok(report)
        })
    }

    pub fn get_setting(&self, key: &str) -> SpaceResult<Option<Setting>> {
        let key = normalize_setting_key(key)?;
        self.with_conn(|conn| Ok(SqliteSettingRepository::try_new(conn)?.get_setting(&key)?))
    }

    /// Inserts or overwrites one setting.
    pub fn set_setting(&self, key: &str, value: Option<&str>) -> SpaceResult<()> {
        let key = normalize_setting_key(key)?;
        self.with_conn(|conn| {
            SqliteSettingRepository::try_new(conn)?.set_setting(&key, value)?;
            Ok(())
        })
    }

    pub fn list_settings(&self) -> SpaceResult<Vec<Setting>> {
        self.with_conn(|conn| Ok(SqliteSettingRepository::try_new(conn)?.list_settings()?))
    }

    pub fn add_reference(&self, source_id: NoteId, target_id: NoteId) -> SpaceResult<NoteReference> {
        self.with_conn(|conn| {
            let reference = Self::references(conn)?.add_reference(source_id, target_id)?;
            EventLine::ok("reference_add", "space")
                .field("id", reference.id)
                .field("idempotent", false)
                .emit();
            Ok(reference)
        })
    }

    /// Returns the existing edge or inserts it.
    pub fn add_reference_if_not_exists(
        &self,
        source_id: NoteId,
        target_id: NoteId,
    ) -> SpaceResult<NoteReference> {
        self.with_conn(|conn| {
            let reference =
                Self::references(conn)?.add_reference_if_not_exists(source_id, target_id)?;
            EventLine::ok("reference_add", "space")
                .field("id", reference.id)
                .field("idempotent", true)
                .emit();
            Ok(reference)
        })
    }

    pub fn get_references(&self, note_id: NoteId) -> SpaceResult<NoteReferences> {
        self.with_conn(|conn| Ok(Self::references(conn)?.get_references(note_id)?))
    }

    pub fn remove_reference(&self, source_id: NoteId, target_id: NoteId) -> SpaceResult<bool> {
        self.with_conn(|conn| Ok(Self::references(conn)?.remove_reference(source_id, target_id)?))
    }

    pub fn migration_status(&self) -> SpaceResult<Vec<MigrationStatus>> {
        self.with_conn(|conn| Ok(self.migrator.status(conn)?))
    }

    /// Reverts the most recently applied delta.
    pub fn rollback_last_migration(&self) -> SpaceResult<Option<u32>> {
        self.with_conn(|conn| {
            let ctx = MigrationContext {
                extractor: self.extractor.as_ref(),
            };
            let reverted = self.migrator.rollback_last(conn, &ctx)?;
            if reverted.is_none() {
                EventLine::ok("migration_rollback", "space")
                    .field("reverted", "none")
                    .at(Level::Warn)
                    .emit();
            }
            Ok(reverted)
        })
    }
}

fn note_event(event: &str, note: &Note) -> EventLine {
    EventLine::ok(event, "space")
        .field("id", note.id)
        .field("kind", note.kind().as_db_str())
}

fn cascade_event(id: NoteId, kind: &str, report: &CascadeReport) -> EventLine {
    EventLine::ok("entry_delete", "space")
        .field("id", id)
        .field("kind", kind)
        .field("comments_deleted", report.comments_deleted)
        .field("references_deleted", report.references_deleted)
}
