//! Polymorphic note model.
//!
//! # Responsibility
//! - Define the single record shape shared by logs, comments and pages.
//! - Map variants to/from the `type` discriminator stored in `note`.
//!
//! # Invariants
//! - A log's `ended_at` is `None` or strictly greater than `started_at`.
//! - A comment always has a parent and never an end time.
//! - `content_json` is a non-blank JSON document.

use crate::model::{now_epoch_ms, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier shared by every note variant.
pub type NoteId = Uuid;

/// Variant tag persisted in the `note.type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// Time-ranged journal entry.
    Log,
    /// Point-in-time note attached to a parent.
    Comment,
    /// Static page without temporal fields.
    Page,
}

impl NoteKind {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Comment => "comment",
            Self::Page => "page",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "log" => Some(Self::Log),
            "comment" => Some(Self::Comment),
            "page" => Some(Self::Page),
            _ => None,
        }
    }
}

/// Variant-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoteVariant {
    Log {
        started_at: i64,
        ended_at: Option<i64>,
    },
    Comment {
        parent_id: NoteId,
        commented_at: i64,
    },
    Page,
}

/// Canonical note record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub title: Option<String>,
    /// Serialized rich-text document.
    pub content_json: String,
    /// Plain text derived from `content_json`.
    pub content_text: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(flatten)]
    pub variant: NoteVariant,
}

impl Note {
    fn with_variant(content_json: impl Into<String>, variant: NoteVariant) -> Self {
        let now = now_epoch_ms();
        Self {
            id: Uuid::new_v4(),
            title: None,
            content_json: content_json.into(),
            content_text: None,
            created_at: now,
            updated_at: now,
            variant,
        }
    }

    /// Creates a log entry starting at `started_at`.
    pub fn new_log(content_json: impl Into<String>, started_at: i64, ended_at: Option<i64>) -> Self {
        Self::with_variant(
            content_json,
            NoteVariant::Log {
                started_at,
                ended_at,
            },
        )
    }

    /// Creates a comment attached to `parent_id`.
    pub fn new_comment(content_json: impl Into<String>, parent_id: NoteId, commented_at: i64) -> Self {
        Self::with_variant(
            content_json,
            NoteVariant::Comment {
                parent_id,
                commented_at,
            },
        )
    }

    /// Creates a titled page.
    pub fn new_page(title: impl Into<String>, content_json: impl Into<String>) -> Self {
        let mut note = Self::with_variant(content_json, NoteVariant::Page);
        note.title = Some(title.into());
        note
    }

    pub fn kind(&self) -> NoteKind {
        match self.variant {
            NoteVariant::Log { .. } => NoteKind::Log,
            NoteVariant::Comment { .. } => NoteKind::Comment,
            NoteVariant::Page => NoteKind::Page,
        }
    }

    /// Parent note for comments; `None` for every other variant.
    pub fn parent_id(&self) -> Option<NoteId> {
        match self.variant {
            NoteVariant::Comment { parent_id, .. } => Some(parent_id),
            _ => None,
        }
    }

    /// Start of the entry: `started_at` for logs, `commented_at` for comments.
    pub fn started_at(&self) -> Option<i64> {
        match self.variant {
            NoteVariant::Log { started_at, .. } => Some(started_at),
            NoteVariant::Comment { commented_at, .. } => Some(commented_at),
            NoteVariant::Page => None,
        }
    }

    pub fn ended_at(&self) -> Option<i64> {
        match self.variant {
            NoteVariant::Log { ended_at, .. } => ended_at,
            _ => None,
        }
    }

    /// Checks content and variant invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_content_json(&self.content_json)?;
        match &self.variant {
            NoteVariant::Log {
                started_at,
                ended_at,
            } => validate_time_range(*started_at, *ended_at),
            NoteVariant::Comment { .. } => Ok(()),
            NoteVariant::Page => match self.title.as_deref() {
                Some(title) if !title.trim().is_empty() => Ok(()),
                _ => Err(ValidationError::EmptyTitle),
            },
        }
    }
}

/// Rejects blank or non-JSON content.
pub fn validate_content_json(content_json: &str) -> Result<(), ValidationError> {
    if content_json.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    serde_json::from_str::<serde_json::Value>(content_json)
        .map(|_| ())
        .map_err(|err| ValidationError::InvalidContentJson(err.to_string()))
}

/// Rejects an end time that does not come strictly after the start.
pub fn validate_time_range(started_at: i64, ended_at: Option<i64>) -> Result<(), ValidationError> {
    match ended_at {
        Some(ended_at) if ended_at <= started_at => Err(ValidationError::EndNotAfterStart {
            started_at,
            ended_at,
        }),
        _ => Ok(()),
    }
}

/// Projection of a note used by reference listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteSummary {
    pub id: NoteId,
    pub title: Option<String>,
    pub preview: Option<String>,
    pub kind: NoteKind,
}

#[cfg(test)]
mod tests {
    use super::{Note, NoteKind, NoteVariant};
    use crate::model::ValidationError;
    use uuid::Uuid;

    const DOC: &str = r#"{"type":"doc","content":[]}"#;

    #[test]
    fn log_end_must_be_strictly_after_start() {
        assert_eq!(
            Note::new_log(DOC, 1_000, Some(1_000)).validate(),
            Err(ValidationError::EndNotAfterStart {
                started_at: 1_000,
                ended_at: 1_000
            })
        );
        assert!(Note::new_log(DOC, 1_000, Some(999)).validate().is_err());
        assert!(Note::new_log(DOC, 1_000, Some(1_001)).validate().is_ok());
        assert!(Note::new_log(DOC, 1_000, None).validate().is_ok());
    }

    #[test]
    fn content_must_be_non_blank_json() {
        assert_eq!(
            Note::new_log("  ", 1, None).validate(),
            Err(ValidationError::EmptyContent)
        );
        assert!(matches!(
            Note::new_log("{not json", 1, None).validate(),
            Err(ValidationError::InvalidContentJson(_))
        ));
    }

    #[test]
    fn page_requires_title() {
        assert_eq!(
            Note::new_page(" ", DOC).validate(),
            Err(ValidationError::EmptyTitle)
        );
        assert!(Note::new_page("Inbox", DOC).validate().is_ok());
    }

    #[test]
    fn accessors_follow_variant() {
        let parent = Uuid::new_v4();
        let comment = Note::new_comment(DOC, parent, 42);
        assert_eq!(comment.kind(), NoteKind::Comment);
        assert_eq!(comment.parent_id(), Some(parent));
        assert_eq!(comment.started_at(), Some(42));
        assert_eq!(comment.ended_at(), None);

        let page = Note::new_page("p", DOC);
        assert_eq!(page.variant, NoteVariant::Page);
        assert_eq!(page.started_at(), None);
    }

    #[test]
    fn kind_db_strings_round_trip() {
        for kind in [NoteKind::Log, NoteKind::Comment, NoteKind::Page] {
            assert_eq!(NoteKind::from_db_str(kind.as_db_str()), Some(kind));
        }
        assert_eq!(NoteKind::from_db_str("contact"), None);
    }
}
