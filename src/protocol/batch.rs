//! POST body decoding.
//!
//! A body is one JSON message or a JSON array of messages. Each element may
//! be a native JSON object or a string holding JSON-encoded message text;
//! older remote clients stringify every message before batching them.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::{Error, Result};

use super::Message;

// ============================================================================
// Public Functions
// ============================================================================

/// Decodes a POST body into its messages.
///
/// A bare object is treated as a one-element batch.
///
/// # Errors
///
/// - [`Error::Json`] if the body or any element is not valid message JSON
/// - [`Error::Protocol`] if the body is neither an object, string nor array
pub fn parse_batch(body: &[u8]) -> Result<Vec<Message>> {
    let value: Value = serde_json::from_slice(body)?;

    match value {
        Value::Array(elements) => elements.into_iter().map(decode_element).collect(),
        single @ (Value::Object(_) | Value::String(_)) => Ok(vec![decode_element(single)?]),
        other => Err(Error::protocol(format!(
            "Expected message or array of messages, got {}",
            kind_of(&other)
        ))),
    }
}

// ============================================================================
// Internal Functions
// ============================================================================

/// Decodes one batch element.
fn decode_element(element: Value) -> Result<Message> {
    match element {
        Value::String(text) => Ok(serde_json::from_str(&text)?),
        other => Ok(serde_json::from_value(other)?),
    }
}

/// Names a JSON value's type for error messages.
fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tests
// ============================================================================
