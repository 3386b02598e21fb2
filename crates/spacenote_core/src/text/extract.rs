use crate::text::TextExtractor;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Maximum preview length in characters.
pub const PREVIEW_MAX_CHARS: usize = 100;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

const BLOCK_NODE_TYPES: &[&str] = &[
    "paragraph",
    "heading",
    "blockquote",
    "codeBlock",
    "listItem",
    "taskItem",
];

/// Extractor for editor documents shaped as `{type, text?, content?: [...]}`
/// node trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentTextExtractor;

impl TextExtractor for DocumentTextExtractor {
    fn extract(&self, content_json: &str) -> String {
        let Ok(document) = serde_json::from_str::<Value>(content_json) else {
            return String::new();
        };
        let mut out = String::new();
        collect_text(&document, &mut out);
        out.trim().to_string()
    }
}

fn collect_text(node: &Value, out: &mut String) {
    match node {
        Value::String(text) => out.push_str(text),
        Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        Value::Object(map) => {
            let node_type = map.get("type").and_then(Value::as_str);
            if node_type == Some("hardBreak") {
                out.push('\n');
            }
            if let Some(Value::String(text)) = map.get("text") {
                out.push_str(text);
            }
            if let Some(children @ Value::Array(_)) = map.get("content") {
                collect_text(children, out);
            }
            let is_block = node_type.is_some_and(|kind| BLOCK_NODE_TYPES.contains(&kind));
            if is_block && !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
        }
        _ => {}
    }
}

/// Derives a short single-line preview from extracted text.
///
/// Whitespace runs collapse to one space; output keeps the first
/// `PREVIEW_MAX_CHARS` characters.
pub fn derive_preview(text: &str) -> Option<String> {
    let normalized = WHITESPACE_RE.replace_all(text, " ");
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.chars().take(PREVIEW_MAX_CHARS).collect())
    }
}
