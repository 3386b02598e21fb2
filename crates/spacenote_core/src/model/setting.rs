//! Key/value settings stored per Space.

use crate::model::ValidationError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: Option<String>,
}

/// Trims a setting key and rejects blank keys.
pub fn normalize_setting_key(key: &str) -> Result<String, ValidationError> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptySettingKey);
    }
    Ok(trimmed.to_string())
}
