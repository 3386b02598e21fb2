//! Plain-text derivation from rich-text documents.
//!
//! # Responsibility
//! - Define the extractor seam consumed by migrations and previews.
//! - Provide the default extractor for editor JSON documents.
//!
//! # Invariants
//! - Extraction is a pure function of its input and never fails; malformed
//!   documents yield an empty string.

mod extract;

pub use extract::{derive_preview, DocumentTextExtractor, PREVIEW_MAX_CHARS};

/// Converts a serialized rich-text document into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, content_json: &str) -> String;
}

/// Extracts text and maps blank output to `None`.
pub fn extract_optional(extractor: &dyn TextExtractor, content_json: &str) -> Option<String> {
    let text = extractor.extract(content_json);
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
