//! Page use-case service.

use crate::model::note::{validate_content_json, Note, NoteId, NoteVariant};
use crate::model::{now_epoch_ms, ValidationError};
use crate::repo::note_repo::{CascadeReport, NoteRepository, RepoError, RepoResult};
use crate::repo::normalize_limit;
use crate::text::{extract_optional, TextExtractor};

/// Use-case service wrapper for titled pages.
pub struct PageService<'a, R: NoteRepository> {
    repo: R,
    extractor: &'a dyn TextExtractor,
}

impl<'a, R: NoteRepository> PageService<'a, R> {
    pub fn new(repo: R, extractor: &'a dyn TextExtractor) -> Self {
        Self { repo, extractor }
    }

    pub fn create_page(&self, title: &str, content_json: &str) -> RepoResult<Note> {
        let title = normalize_title(title)?;
        validate_content_json(content_json)?;
        let mut note = Note::new_page(title, content_json);
        note.content_text = extract_optional(self.extractor, content_json);
        let id = self.repo.create_note(&note)?;
        self.repo.get_note(id)?.ok_or(RepoError::NotFound(id))
    }

    /// Replaces title and body of an existing page.
    pub fn update_page(&self, id: NoteId, title: &str, content_json: &str) -> RepoResult<Note> {
        let mut note = self.get_page(id)?.ok_or(RepoError::NotFound(id))?;
        note.title = Some(normalize_title(title)?);
        validate_content_json(content_json)?;
        note.content_json = content_json.to_string();
        note.content_text = extract_optional(self.extractor, content_json);
        note.updated_at = now_epoch_ms().max(note.updated_at);
        self.repo.update_note(&note)?;
        self.repo.get_note(id)?.ok_or(RepoError::NotFound(id))
    }

    pub fn get_page(&self, id: NoteId) -> RepoResult<Option<Note>> {
        Ok(self
            .repo
            .get_note(id)?
            .filter(|note| matches!(note.variant, NoteVariant::Page)))
    }

    pub fn list_pages(&self, offset: u32, limit: u32) -> RepoResult<Vec<Note>> {
        self.repo.list_pages(offset, normalize_limit(limit))
    }

    /// Deletes a page plus any comments and references attached to it.
    pub fn delete_page(&mut self, id: NoteId) -> RepoResult<CascadeReport> {
        if self.get_page(id)?.is_none() {
            return Err(RepoError::NotFound(id));
        }
        self.repo.delete_note_cascade(id)
    }
}

fn normalize_title(title: &str) -> Result<String, ValidationError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    Ok(trimmed.to_string())
}
