//! Decision oracle abstraction.
//!
//! The search delegates ranking, pruning, validation, text generation and
//! transition description to an external model. Every request is two calls:
//! `rank` produces free text (optionally grounded on images) and `extract`
//! turns that text into JSON matching a TypeScript-style schema. Replies are
//! read leniently: ids may arrive as numbers or numeric strings, booleans as
//! `true`/`"yes"`.

pub mod client;

pub use client::ChatClient;

use image::RgbImage;
use serde_json::Value;
use std::time::Duration;

/// Result type for oracle operations
pub type OracleResult<T> = Result<T, OracleError>;

/// Errors that can occur during oracle operations
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("No response for {0:?}")]
    ActivityTimeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Reply does not match schema: {0}")]
    Schema(String),

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// External decision service
pub trait Oracle {
    /// Free-text answer to `prompt`, grounded on `images` when given
    fn rank(&self, prompt: &str, images: &[RgbImage]) -> OracleResult<String>;

    /// Structured extraction of `text` into an object matching `schema`
    fn extract(&self, text: &str, schema: &str) -> OracleResult<Value>;
}

/// Parse the JSON object in a model reply
///
/// Accepts bare JSON, fenced code blocks and JSON surrounded by prose.
pub fn parse_json_reply(text: &str) -> OracleResult<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&trimmed[start..=end])
            .map_err(|e| OracleError::InvalidResponse(format!("{}: {}", e, trimmed))),
        _ => Err(OracleError::InvalidResponse(format!(
            "no JSON object in reply: {}",
            trimmed
        ))),
    }
}

/// Positive integers under `key`; non-numeric entries are skipped
pub fn id_list(value: &Value, key: &str) -> OracleResult<Vec<usize>> {
    let items = value
        .get(key)
        .ok_or_else(|| OracleError::Schema(format!("missing field `{}`", key)))?;
    let Some(items) = items.as_array() else {
        return Err(OracleError::Schema(format!("`{}` is not an array", key)));
    };
    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            Value::String(s) => s.trim().trim_matches('"').parse().ok(),
            _ => None,
        })
        .collect())
}

/// Strings under `key`, quotes stripped and lower-cased
pub fn string_list(value: &Value, key: &str) -> OracleResult<Vec<String>> {
    let items = value
        .get(key)
        .ok_or_else(|| OracleError::Schema(format!("missing field `{}`", key)))?;
    let Some(items) = items.as_array() else {
        return Err(OracleError::Schema(format!("`{}` is not an array", key)));
    };
    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .map(|s| s.trim().trim_matches('"').to_lowercase())
        .collect())
}

pub fn string_field(value: &Value, key: &str) -> OracleResult<String> {
    match value.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(OracleError::Schema(format!("missing field `{}`", key))),
        Some(other) => Ok(other.to_string()),
    }
}

/// Boolean under `key`; `true`, `"true"` and `"yes"` count as true
pub fn flag_field(value: &Value, key: &str) -> OracleResult<bool> {
    match value.get(key) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => {
            let s = s.trim().to_lowercase();
            Ok(s == "true" || s == "yes")
        }
        Some(_) => Ok(false),
        None => Err(OracleError::Schema(format!("missing field `{}`", key))),
    }
}
