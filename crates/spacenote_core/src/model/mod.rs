//! Domain model for Space content.
//!
//! # Responsibility
//! - Define the polymorphic note record and its variants.
//! - Define reference edges and settings.
//! - Own invariant validation that runs before any write.
//!
//! # Invariants
//! - Every note is identified by a stable `NoteId`.
//! - Timestamps are Unix epoch milliseconds.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod note;
pub mod reference;
pub mod setting;

pub use note::NoteId;

/// Invariant violation detected before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `content_json` is blank.
    EmptyContent,
    /// `content_json` is not a JSON document.
    InvalidContentJson(String),
    /// A page must carry a non-blank title.
    EmptyTitle,
    /// `ended_at` must be strictly greater than `started_at`.
    EndNotAfterStart { started_at: i64, ended_at: i64 },
    /// Comments are point-in-time and never carry an end time.
    CommentWithEndTime,
    /// A reference edge cannot point a note at itself.
    SelfReference(NoteId),
    /// Setting keys must be non-blank.
    EmptySettingKey,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyContent => write!(f, "content cannot be empty"),
            Self::InvalidContentJson(message) => {
                write!(f, "content is not a valid JSON document: {message}")
            }
            Self::EmptyTitle => write!(f, "title cannot be empty"),
            Self::EndNotAfterStart {
                started_at,
                ended_at,
            } => write!(
                f,
                "ended_at ({ended_at}) must be greater than started_at ({started_at})"
            ),
            Self::CommentWithEndTime => write!(f, "a comment cannot have an end time"),
            Self::SelfReference(id) => write!(f, "note {id} cannot reference itself"),
            Self::EmptySettingKey => write!(f, "setting key cannot be empty"),
        }
    }
}

impl Error for ValidationError {}

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}
