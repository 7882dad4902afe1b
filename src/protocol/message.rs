//! Message and Ack types.
//!
//! # Format
//!
//! ```json
//! {
//!   "id": "17",
//!   "sessionId": "a4c1",
//!   "name": "testEnd",
//!   "data": { "error": { "message": "expected 1 to equal 2" } }
//! }
//! ```
//!
//! The event name set (`suiteStart`, `suiteEnd`, `testStart`, `testEnd`,
//! `error`, `runEnd`, ...) is open and never validated here.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::{MessageId, SessionId};

// ============================================================================
// Constants
// ============================================================================

/// Name of the final message of a run. Never acknowledged over WebSocket.
pub const RUN_END: &str = "runEnd";

// ============================================================================
// Message
// ============================================================================

/// A lifecycle event sent by a remote environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlates the acknowledgement with this message.
    pub id: MessageId,

    /// Session whose listeners receive this message.
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,

    /// Event name.
    pub name: String,

    /// Event payload, shape depends on `name`.
    #[serde(default)]
    pub data: Value,
}

impl Message {
    /// Creates a new message.
    #[must_use]
    pub fn new(
        id: impl Into<MessageId>,
        session_id: impl Into<SessionId>,
        name: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            name: name.into(),
            data,
        }
    }

    /// Returns `true` if `data.error` is present and truthy.
    #[must_use]
    pub fn has_error(&self) -> bool {
        match self.data.get("error") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0 && !v.is_nan()),
            Some(_) => true,
        }
    }

    /// Returns `true` for the final message of a run.
    #[inline]
    #[must_use]
    pub fn is_run_end(&self) -> bool {
        self.name == RUN_END
    }
}

// ============================================================================
// Ack
// ============================================================================

/// Acknowledgement frame sent back over WebSocket.
///
/// ```json
/// { "id": "17" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// ID of the acknowledged message.
    pub id: MessageId,
}

impl Ack {
    /// Creates an ack for the given message.
    #[inline]
    #[must_use]
    pub fn for_message(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
