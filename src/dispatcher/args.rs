//! Tolerant decoding of model-supplied tool arguments.

use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum ArgumentParseError {
    #[error("arguments are not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("arguments must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Decode arguments into a key/value map.
///
/// Accepts an object, a string holding a JSON object, or nothing at all
/// (empty string or null), which all decode to a map.
///
/// # Errors
/// Returns [`ArgumentParseError`] for malformed JSON or non-object values.
pub fn parse_arguments(raw: &Value) -> Result<Map<String, Value>, ArgumentParseError> {
    match raw {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        Value::String(text) if text.trim().is_empty() => Ok(Map::new()),
        Value::String(text) => match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(ArgumentParseError::NotAnObject(kind(&other))),
        },
        other => Err(ArgumentParseError::NotAnObject(kind(other))),
    }
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
