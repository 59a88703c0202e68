//! Per-source metadata normalizers
//!
//! A normalizer is a pure mapping from a source's raw JSON payload to a
//! [`NormalizedArtwork`]. Absent or null optional fields fall back to
//! documented defaults; only a missing id or a non-object payload is an error.

pub mod aic;
pub mod cma;
pub mod met;

use serde_json::Value;

use crate::error::{HarvestError, Result};
use crate::model::NormalizedArtwork;

pub use aic::AicFactory;
pub use cma::CmaFactory;
pub use met::MetFactory;

pub const UNTITLED: &str = "Untitled";

/// Maps one source's payload shape to the canonical record
pub trait MetadataFactory: Send + Sync {
    fn create_metadata(&self, raw: &Value) -> Result<NormalizedArtwork>;
}

/// Ensure the payload is a JSON object
pub(crate) fn as_object(raw: &Value) -> Result<&serde_json::Map<String, Value>> {
    raw.as_object()
        .ok_or_else(|| HarvestError::validation(format!("expected JSON object, got {}", kind(raw))))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Mandatory id; accepts JSON numbers or non-empty strings
pub(crate) fn required_id(raw: &Value, key: &str) -> Result<String> {
    id_value(raw.get(key))
        .ok_or_else(|| HarvestError::validation(format!("missing required field '{}'", key)))
}

pub(crate) fn id_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Non-empty trimmed string
pub(crate) fn text(raw: &Value, key: &str) -> Option<String> {
    text_value(raw.get(key))
}

pub(crate) fn text_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        },
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn text_or(raw: &Value, key: &str, default: &str) -> String {
    text(raw, key).unwrap_or_else(|| default.to_string())
}

pub(crate) fn flag(raw: &Value, key: &str) -> Option<bool> {
    match raw.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn number(raw: &Value, key: &str) -> Option<f64> {
    number_value(raw.get(key))
}

pub(crate) fn number_value(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn year(raw: &Value, key: &str) -> Option<i32> {
    year_value(raw.get(key))
}

/// Year from a number or from the leading digits of a string like "1853"
/// or "-450"
pub(crate) fn year_value(value: Option<&Value>) -> Option<i32> {
    match value? {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => {
            let s = s.trim();
            let (sign, digits) = match s.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, s),
            };
            let end = digits
                .char_indices()
                .find(|(_, c)| !c.is_ascii_digit())
                .map(|(i, _)| i)
                .unwrap_or(digits.len());
            digits[..end].parse::<i32>().ok().map(|y| sign * y)
        },
        _ => None,
    }
}

/// Array of strings, or array of objects from which `field` is taken
pub(crate) fn string_list(value: Option<&Value>, field: Option<&str>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match (item, field) {
            (Value::Object(_), Some(field)) => text_value(item.get(field)),
            (Value::Object(_), None) => None,
            (other, _) => text_value(Some(other)),
        })
        .collect()
}
