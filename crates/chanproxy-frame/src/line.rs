//! Message encoding for line-oriented channels.
//!
//! Each line holds one JSON string, and that string's content is the
//! message JSON. Lines that carry any other JSON value are not messages and
//! are skipped.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Encode a message as a single line body (no terminator).
pub fn encode_line_message<T: Serialize + ?Sized>(message: &T) -> Result<String> {
    let inner = serde_json::to_string(message)?;
    Ok(serde_json::to_string(&inner)?)
}

/// Decode one line body.
///
/// Returns `Ok(None)` for blank lines and for lines whose JSON value is not a
/// string. A malformed line, or a string whose content is not JSON, is an
/// error.
pub fn decode_line_message(line: &str) -> Result<Option<Value>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(line)? {
        Value::String(inner) => Ok(Some(serde_json::from_str(&inner)?)),
        other => {
            debug!(kind = value_kind(&other), "ignoring non-string line");
            Ok(None)
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
