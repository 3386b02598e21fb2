//! Space Manager: path-keyed registry of open Spaces.
//!
//! # Responsibility
//! - Create Space directories and bring their store to the current schema.
//! - Open Spaces exactly once per path, coalescing concurrent openers.
//! - Route path-addressed CRUD to the open Space.
//!
//! # Invariants
//! - Each path maps to one slot; the slot is locked for the whole open so
//!   concurrent openers wait and then share the result.
//! - A failed open retires its slot; nothing half-initialized is visible.
//! - Lock order is slot, then registry map. The map lock is never held while
//!   waiting on a slot.

use crate::db::migrations::{
    MigrationContext, MigrationProgress, MigrationReport, MigrationStatus, Migrator,
};
use crate::db::{inspect_store, open_store, DbError, StoreOpenMode};
use crate::model::note::{Note, NoteId};
use crate::model::reference::{NoteReference, NoteReferences};
use crate::model::setting::Setting;
use crate::repo::note_repo::CascadeReport;
use crate::service::entry_service::{EntryUpdate, NewEntry};
use crate::logging::EventLine;
use crate::space::{Space, SpaceError, SpaceResult, STORE_FILE_NAME};
use crate::text::{DocumentTextExtractor, TextExtractor};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

enum SlotState {
    /// An opener holds the slot lock and is running migrations.
    Vacant,
    Open(Arc<Space>),
    /// Failed or closed; the slot has left the registry.
    Retired,
}

struct SpaceSlot {
    state: Mutex<SlotState>,
}

impl SpaceSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns every open Space of the process.
pub struct SpaceManager {
    migrator: Arc<Migrator>,
    extractor: Arc<dyn TextExtractor>,
    slots: Mutex<HashMap<PathBuf, Arc<SpaceSlot>>>,
}

impl Default for SpaceManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl SpaceManager {
    /// Creates a manager with an injected migration registry and extractor.
    pub fn new(migrator: Migrator, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            migrator: Arc::new(migrator),
            extractor,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a manager with the shipped registry and document extractor.
    pub fn with_defaults() -> Self {
        Self::new(Migrator::builtin(), Arc::new(DocumentTextExtractor))
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<SpaceSlot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops `slot` from the registry if it is still the registered one.
    fn unregister(&self, key: &Path, slot: &Arc<SpaceSlot>) {
        let mut slots = self.slots();
        if slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(key);
        }
    }

    fn context(&self) -> MigrationContext<'_> {
        MigrationContext {
            extractor: self.extractor.as_ref(),
        }
    }

    /// Creates a new Space directory with a fully migrated store.
    ///
    /// The connection is released afterwards; call `open` to use the Space.
    ///
    /// # Errors
    /// - `AlreadyExists` when anything exists at `path`.
    /// - `Migration` when a delta fails; the directory is removed again.
    pub fn create(&self, path: impl AsRef<Path>) -> SpaceResult<MigrationReport> {
        let path = path.as_ref();
        let started_at = Instant::now();
        EventLine::start("space_create", "space").emit();

        let result = self.create_inner(path);
        match &result {
            Ok(report) => EventLine::ok("space_create", "space")
                .field("applied", report.applied.len())
                .elapsed(started_at)
                .emit(),
            Err(err) => EventLine::error("space_create", "space")
                .field("error_kind", err.kind())
                .elapsed(started_at)
                .field("error", err)
                .emit(),
        }
        result
    }

    fn create_inner(&self, path: &Path) -> SpaceResult<MigrationReport> {
        if path.exists() {
            return Err(SpaceError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        match fs::create_dir(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(SpaceError::AlreadyExists(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        }

        let store_path = path.join(STORE_FILE_NAME);
        match open_store(
            &store_path,
            StoreOpenMode::Create,
            &self.migrator,
            &self.context(),
            &mut |_| {},
        ) {
            Ok((conn, report)) => {
                drop(conn);
                Ok(report)
            }
            Err(err) => {
                if let Err(cleanup) = fs::remove_dir_all(path) {
                    EventLine::error("space_create", "space")
                        .field("error_code", "cleanup_failed")
                        .field("error", cleanup)
                        .emit();
                }
                Err(err.into())
            }
        }
    }

    /// Opens a Space, or returns the handle when it is already open.
    pub fn open(&self, path: impl AsRef<Path>) -> SpaceResult<Arc<Space>> {
        self.open_with_progress(path, &mut |_| {})
    }

    /// Opens a Space, reporting each pending delta to `on_progress`.
    ///
    /// Concurrent calls for the same path share one connection and one
    /// migration run. Only the caller that performs the open sees progress.
    ///
    /// # Errors
    /// - `SpaceNotFound` when the directory or its store file is missing.
    /// - `Migration` when a delta fails; the path is left unregistered.
    pub fn open_with_progress(
        &self,
        path: impl AsRef<Path>,
        on_progress: &mut dyn FnMut(MigrationProgress),
    ) -> SpaceResult<Arc<Space>> {
        let key = path_key(path.as_ref());
        loop {
            let slot = self
                .slots()
                .entry(key.clone())
                .or_insert_with(|| {
                    Arc::new(SpaceSlot {
                        state: Mutex::new(SlotState::Vacant),
                    })
                })
                .clone();

            let mut state = slot.lock();
            match &*state {
                SlotState::Open(space) => return Ok(Arc::clone(space)),
                SlotState::Retired => continue,
                SlotState::Vacant => {}
            }

            match self.open_inner(&key, on_progress) {
                Ok(space) => {
                    *state = SlotState::Open(Arc::clone(&space));
                    return Ok(space);
                }
                Err(err) => {
                    *state = SlotState::Retired;
                    self.unregister(&key, &slot);
                    return Err(err);
                }
            }
        }
    }

    fn open_inner(
        &self,
        key: &Path,
        on_progress: &mut dyn FnMut(MigrationProgress),
    ) -> SpaceResult<Arc<Space>> {
        let started_at = Instant::now();
        EventLine::start("space_open", "space").emit();

        match open_store(
            key.join(STORE_FILE_NAME),
            StoreOpenMode::Existing,
            &self.migrator,
            &self.context(),
            on_progress,
        ) {
            Ok((conn, report)) => {
                EventLine::ok("space_open", "space")
                    .field("applied", report.applied.len())
                    .elapsed(started_at)
                    .emit();
                Ok(Arc::new(Space::new(
                    key.to_path_buf(),
                    conn,
                    Arc::clone(&self.extractor),
                    Arc::clone(&self.migrator),
                )))
            }
            Err(err) => {
                let err = space_error_at(key, err);
                EventLine::error("space_open", "space")
                    .field("error_kind", err.kind())
                    .elapsed(started_at)
                    .field("error", &err)
                    .emit();
                Err(err)
            }
        }
    }

    /// Releases the connection of an open Space and unregisters it.
    ///
    /// Handles still held by callers report `NotOpen` afterwards.
    pub fn close(&self, path: impl AsRef<Path>) -> SpaceResult<()> {
        let key = path_key(path.as_ref());
        let slot = self.slots().get(&key).cloned();
        let Some(slot) = slot else {
            return Err(SpaceError::NotOpen(key));
        };

        let mut state = slot.lock();
        let SlotState::Open(space) = &*state else {
            return Err(SpaceError::NotOpen(key));
        };
        space.release();
        *state = SlotState::Retired;
        self.unregister(&key, &slot);
        EventLine::ok("space_close", "space").emit();
        Ok(())
    }

    pub fn is_open(&self, path: impl AsRef<Path>) -> bool {
        let key = path_key(path.as_ref());
        let Some(slot) = self.slots().get(&key).cloned() else {
            return false;
        };
        let open = matches!(&*slot.lock(), SlotState::Open(_));
        open
    }

    /// Paths of every open Space, sorted.
    pub fn open_paths(&self) -> Vec<PathBuf> {
        let slots: Vec<(PathBuf, Arc<SpaceSlot>)> = self
            .slots()
            .iter()
            .map(|(path, slot)| (path.clone(), Arc::clone(slot)))
            .collect();
        let mut paths: Vec<PathBuf> = slots
            .into_iter()
            .filter(|(_, slot)| matches!(&*slot.lock(), SlotState::Open(_)))
            .map(|(path, _)| path)
            .collect();
        paths.sort();
        paths
    }

    /// Returns the handle of an open Space without opening it.
    pub fn space(&self, path: impl AsRef<Path>) -> SpaceResult<Arc<Space>> {
        let key = path_key(path.as_ref());
        let Some(slot) = self.slots().get(&key).cloned() else {
            return Err(SpaceError::NotOpen(key));
        };
        let state = slot.lock();
        match &*state {
            SlotState::Open(space) => Ok(Arc::clone(space)),
            _ => Err(SpaceError::NotOpen(key)),
        }
    }

    pub fn create_entry(&self, path: impl AsRef<Path>, entry: &NewEntry) -> SpaceResult<Note> {
        self.space(path)?.create_entry(entry)
    }

    pub fn get_entry(&self, path: impl AsRef<Path>, id: NoteId) -> SpaceResult<Note> {
        self.space(path)?.get_entry(id)
    }

    pub fn get_note(&self, path: impl AsRef<Path>, id: NoteId) -> SpaceResult<Note> {
        self.space(path)?.get_note(id)
    }

    pub fn get_top_level_entries(
        &self,
        path: impl AsRef<Path>,
        offset: u32,
        limit: u32,
    ) -> SpaceResult<Vec<Note>> {
        self.space(path)?.list_top_level_entries(offset, limit)
    }

    pub fn get_child_entries(
        &self,
        path: impl AsRef<Path>,
        parent_id: NoteId,
        offset: u32,
        limit: u32,
    ) -> SpaceResult<Vec<Note>> {
        self.space(path)?
            .list_child_entries(parent_id, offset, limit)
    }

    pub fn update_entry(
        &self,
        path: impl AsRef<Path>,
        id: NoteId,
        update: &EntryUpdate,
    ) -> SpaceResult<Note> {
        self.space(path)?.update_entry(id, update)
    }

    pub fn delete_entry(&self, path: impl AsRef<Path>, id: NoteId) -> SpaceResult<CascadeReport> {
        self.space(path)?.delete_entry(id)
    }

    pub fn create_page(
        &self,
        path: impl AsRef<Path>,
        title: &str,
        content_json: &str,
    ) -> SpaceResult<Note> {
        self.space(path)?.create_page(title, content_json)
    }

    pub fn update_page(
        &self,
        path: impl AsRef<Path>,
        id: NoteId,
        title: &str,
        content_json: &str,
    ) -> SpaceResult<Note> {
        self.space(path)?.update_page(id, title, content_json)
    }

    pub fn list_pages(&self, path: impl AsRef<Path>, offset: u32, limit: u32) -> SpaceResult<Vec<Note>> {
        self.space(path)?.list_pages(offset, limit)
    }

    pub fn delete_page(&self, path: impl AsRef<Path>, id: NoteId) -> SpaceResult<CascadeReport> {
        self.space(path)?.delete_page(id)
    }

    pub fn get_setting(&self, path: impl AsRef<Path>, key: &str) -> SpaceResult<Option<Setting>> {
        self.space(path)?.get_setting(key)
    }

    pub fn set_setting(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        value: Option<&str>,
    ) -> SpaceResult<()> {
        self.space(path)?.set_setting(key, value)
    }

    pub fn add_reference(
        &self,
        path: impl AsRef<Path>,
        source_id: NoteId,
        target_id: NoteId,
    ) -> SpaceResult<NoteReference> {
        self.space(path)?.add_reference(source_id, target_id)
    }

    pub fn add_reference_if_not_exists(
        &self,
        path: impl AsRef<Path>,
        source_id: NoteId,
        target_id: NoteId,
    ) -> SpaceResult<NoteReference> {
        self.space(path)?
            .add_reference_if_not_exists(source_id, target_id)
    }

    pub fn get_references(
        &self,
        path: impl AsRef<Path>,
        note_id: NoteId,
    ) -> SpaceResult<NoteReferences> {
        self.space(path)?.get_references(note_id)
    }

    pub fn remove_reference(
        &self,
        path: impl AsRef<Path>,
        source_id: NoteId,
        target_id: NoteId,
    ) -> SpaceResult<bool> {
        self.space(path)?.remove_reference(source_id, target_id)
    }

    pub fn migration_status(&self, path: impl AsRef<Path>) -> SpaceResult<Vec<MigrationStatus>> {
        self.space(path)?.migration_status()
    }

    /// Reads the migration status of a Space on disk without opening it.
    ///
    /// Nothing is migrated and the Space is not registered. An open Space
    /// answers from its own connection.
    ///
    /// # Errors
    /// - `SpaceNotFound` when the directory or its store file is missing.
    pub fn inspect_migrations(&self, path: impl AsRef<Path>) -> SpaceResult<Vec<MigrationStatus>> {
        let key = path_key(path.as_ref());
        if let Ok(space) = self.space(&key) {
            return space.migration_status();
        }
        inspect_store(key.join(STORE_FILE_NAME), &self.migrator)
            .map_err(|err| space_error_at(&key, err))
    }
}

/// Maps a store error for the Space at `key`; a missing store is a missing
/// Space.
fn space_error_at(key: &Path, err: DbError) -> SpaceError {
    match err {
        DbError::StoreNotFound(_) => SpaceError::SpaceNotFound(key.to_path_buf()),
        other => other.into(),
    }
}

/// Registry key for a Space path.
fn path_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
