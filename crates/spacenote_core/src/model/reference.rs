//! Directed reference edges between notes.

use crate::model::note::{NoteId, NoteSummary};
use crate::model::{now_epoch_ms, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One stored `source -> target` mention edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteReference {
    pub id: Uuid,
    pub source_id: NoteId,
    pub target_id: NoteId,
    pub created_at: i64,
}

impl NoteReference {
    /// Creates an edge, rejecting self-references.
    pub fn new(source_id: NoteId, target_id: NoteId) -> Result<Self, ValidationError> {
        if source_id == target_id {
            return Err(ValidationError::SelfReference(source_id));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            source_id,
            target_id,
            created_at: now_epoch_ms(),
        })
    }
}

/// Edge joined with the note on its far side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceLink {
    pub reference: NoteReference,
    /// The endpoint that is not the queried note.
    pub note: NoteSummary,
}

/// Inbound and outbound edges of one note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteReferences {
    /// Edges where the note is the source.
    pub outbound: Vec<ReferenceLink>,
    /// Edges where the note is the target.
    pub inbound: Vec<ReferenceLink>,
}
