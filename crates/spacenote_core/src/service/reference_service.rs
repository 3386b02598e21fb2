//! Reference graph use-case service.
//!
//! # Responsibility
//! - Reject self-edges before touching storage.
//! - Provide the idempotent add used when edges are re-derived from content.
//!
//! # Invariants
//! - Repeated `add_reference_if_not_exists(a, b)` leaves exactly one edge.

use crate::model::note::NoteId;
use crate::model::reference::{NoteReference, NoteReferences};
use crate::repo::note_repo::{RepoError, RepoResult};
use crate::repo::reference_repo::ReferenceRepository;

pub struct ReferenceService<R: ReferenceRepository> {
    repo: R,
}

impl<R: ReferenceRepository> ReferenceService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Inserts a new edge.
    ///
    /// # Errors
    /// - `Validation` when `source_id == target_id`.
    /// - `NotFound` when either endpoint is missing.
    /// - `Conflict` when the edge already exists.
    pub fn add_reference(&self, source_id: NoteId, target_id: NoteId) -> RepoResult<NoteReference> {
        let reference = NoteReference::new(source_id, target_id)?;
        self.repo.add_reference(&reference)?;
        Ok(reference)
    }

    /// Returns the stored edge, inserting it first when missing.
    pub fn add_reference_if_not_exists(
        &self,
        source_id: NoteId,
        target_id: NoteId,
    ) -> RepoResult<NoteReference> {
        let reference = NoteReference::new(source_id, target_id)?;
        if let Some(existing) = self.repo.find_reference(source_id, target_id)? {
            return Ok(existing);
        }
        match self.repo.add_reference(&reference) {
            Ok(()) => Ok(reference),
            Err(RepoError::Conflict(_)) => self
                .repo
                .find_reference(source_id, target_id)?
                .ok_or_else(|| {
                    RepoError::InvalidData(format!(
                        "reference {source_id} -> {target_id} conflicted but is missing"
                    ))
                }),
            Err(err) => Err(err),
        }
    }

    pub fn get_references(&self, note_id: NoteId) -> RepoResult<NoteReferences> {
        self.repo.list_references(note_id)
    }

    /// Removes one edge; `false` when it did not exist.
    pub fn remove_reference(&self, source_id: NoteId, target_id: NoteId) -> RepoResult<bool> {
        self.repo.remove_reference(source_id, target_id)
    }
}
