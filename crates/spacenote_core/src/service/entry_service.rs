//! Entry use-case service for logs and their comments.
//!
//! # Responsibility
//! - Resolve effective start times and parent links for new entries.
//! - Re-validate time and parent rules on update against persisted state.
//! - Derive `content_text` for every written body.
//!
//! # Invariants
//! - An entry with a parent never carries an end time.
//! - `ended_at`, when set, is strictly greater than the effective start.
//! - Pages are not entries; entry APIs report them as not found.

use crate::model::note::{validate_content_json, validate_time_range, Note, NoteId, NoteVariant};
use crate::model::{now_epoch_ms, ValidationError};
use crate::repo::note_repo::{CascadeReport, NoteRepository, RepoError, RepoResult};
use crate::repo::normalize_limit;
use crate::text::{extract_optional, TextExtractor};

/// Input for `EntryService::create_entry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub content_json: String,
    /// Attaches the entry as a comment under this note.
    pub parent_id: Option<NoteId>,
    /// Defaults to the current time.
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
}

impl NewEntry {
    pub fn log(content_json: impl Into<String>) -> Self {
        Self {
            content_json: content_json.into(),
            parent_id: None,
            started_at: None,
            ended_at: None,
        }
    }
}

/// Input for `EntryService::update_entry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryUpdate {
    pub content_json: String,
    /// `None` keeps the persisted start.
    pub started_at: Option<i64>,
    /// `None` keeps the persisted end, `Some(None)` clears it.
    pub ended_at: Option<Option<i64>>,
}

/// Use-case service wrapper for log/comment entries.
pub struct EntryService<'a, R: NoteRepository> {
    repo: R,
    extractor: &'a dyn TextExtractor,
}

impl<'a, R: NoteRepository> EntryService<'a, R> {
    pub fn new(repo: R, extractor: &'a dyn TextExtractor) -> Self {
        Self { repo, extractor }
    }

    /// Creates a top-level log, or a comment when `parent_id` is set.
    ///
    /// # Errors
    /// - `Validation` for blank/invalid content, a comment with `ended_at`,
    ///   or an end time not after the effective start.
    /// - `NotFound` when `parent_id` names no stored note.
    pub fn create_entry(&self, entry: &NewEntry) -> RepoResult<Note> {
        validate_content_json(&entry.content_json)?;
        let started_at = entry.started_at.unwrap_or_else(now_epoch_ms);

        let mut note = match entry.parent_id {
            Some(parent_id) => {
                if entry.ended_at.is_some() {
                    return Err(ValidationError::CommentWithEndTime.into());
                }
                if !self.repo.note_exists(parent_id)? {
                    return Err(RepoError::NotFound(parent_id));
                }
                Note::new_comment(entry.content_json.as_str(), parent_id, started_at)
            }
            None => {
                validate_time_range(started_at, entry.ended_at)?;
                Note::new_log(entry.content_json.as_str(), started_at, entry.ended_at)
            }
        };
        note.content_text = extract_optional(self.extractor, &note.content_json);

        let id = self.repo.create_note(&note)?;
        self.read_back(id)
    }

    /// Rewrites body and times of an existing entry.
    ///
    /// The parent link is immutable and is taken from the stored row.
    pub fn update_entry(&self, id: NoteId, update: &EntryUpdate) -> RepoResult<Note> {
        let mut note = self.get_entry(id)?.ok_or(RepoError::NotFound(id))?;
        validate_content_json(&update.content_json)?;

        note.variant = match note.variant {
            NoteVariant::Log {
                started_at,
                ended_at,
            } => {
                let started_at = update.started_at.unwrap_or(started_at);
                let ended_at = update.ended_at.unwrap_or(ended_at);
                validate_time_range(started_at, ended_at)?;
                NoteVariant::Log {
                    started_at,
                    ended_at,
                }
            }
            NoteVariant::Comment {
                parent_id,
                commented_at,
            } => {
                if matches!(update.ended_at, Some(Some(_))) {
                    return Err(ValidationError::CommentWithEndTime.into());
                }
                NoteVariant::Comment {
                    parent_id,
                    commented_at: update.started_at.unwrap_or(commented_at),
                }
            }
            NoteVariant::Page => return Err(RepoError::NotFound(id)),
        };
        note.content_json = update.content_json.clone();
        note.content_text = extract_optional(self.extractor, &note.content_json);
        note.updated_at = now_epoch_ms().max(note.updated_at);

        self.repo.update_note(&note)?;
        self.read_back(id)
    }

    /// Returns a log or comment; pages read as `None`.
    pub fn get_entry(&self, id: NoteId) -> RepoResult<Option<Note>> {
        Ok(self
            .repo
            .get_note(id)?
            .filter(|note| !matches!(note.variant, NoteVariant::Page)))
    }

    /// Top-level logs, newest start first.
    pub fn list_top_level_entries(&self, offset: u32, limit: u32) -> RepoResult<Vec<Note>> {
        self.repo
            .list_top_level_logs(offset, normalize_limit(limit))
    }

    /// Direct children of `parent_id`, oldest first.
    pub fn list_child_entries(
        &self,
        parent_id: NoteId,
        offset: u32,
        limit: u32,
    ) -> RepoResult<Vec<Note>> {
        if !self.repo.note_exists(parent_id)? {
            return Err(RepoError::NotFound(parent_id));
        }
        self.repo
            .list_children(parent_id, offset, normalize_limit(limit))
    }

    /// Deletes an entry with its comment subtree and touching references.
    pub fn delete_entry(&mut self, id: NoteId) -> RepoResult<CascadeReport> {
        if self.get_entry(id)?.is_none() {
            return Err(RepoError::NotFound(id));
        }
        self.repo.delete_note_cascade(id)
    }

    fn read_back(&self, id: NoteId) -> RepoResult<Note> {
        self.repo.get_note(id)?.ok_or(RepoError::NotFound(id))
    }
}
