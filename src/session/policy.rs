//! Acknowledgement wait-mode.
//!
//! Decides whether a transport must wait for every listener to finish before
//! acknowledging a message. Waiting lets a slow reporter apply backpressure
//! on failures without stalling high-frequency passing-test telemetry.
//!
//! # Modes
//!
//! | Config value | [`WaitMode`] | Waits on |
//! |--------------|--------------|----------|
//! | `false` | [`WaitMode::Never`] | nothing |
//! | `true` | [`WaitMode::Always`] | every message |
//! | `"fail"` | [`WaitMode::OnFailure`] | `testEnd`/`suiteEnd` with `data.error`, and `error` |
//! | `["a", "b"]` | [`WaitMode::Events`] | listed event names |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::protocol::Message;

// ============================================================================
// Constants
// ============================================================================

/// Config keyword selecting [`WaitMode::OnFailure`].
const FAIL_KEYWORD: &str = "fail";

// ============================================================================
// WaitMode
// ============================================================================

/// Whether message acknowledgement blocks on listener completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWaitMode", into = "RawWaitMode")]
pub enum WaitMode {
    /// Acknowledge immediately; listener failures go to the error channel.
    #[default]
    Never,

    /// Acknowledge after all listeners complete.
    Always,

    /// Wait only for messages that signal a failure.
    OnFailure,

    /// Wait only for messages whose name is listed.
    Events(Vec<String>),
}

impl WaitMode {
    /// Creates an event-list mode.
    #[must_use]
    pub fn events(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Events(names.into_iter().map(Into::into).collect())
    }

    /// Returns `true` if the caller must wait for listeners of `message`.
    #[must_use]
    pub fn should_wait(&self, message: &Message) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::OnFailure => signals_failure(message),
            Self::Events(names) => names.iter().any(|name| *name == message.name),
        }
    }
}

/// Returns `true` if the caller must wait for listeners of `message`.
#[inline]
#[must_use]
pub fn should_wait_for_listeners(wait_mode: &WaitMode, message: &Message) -> bool {
    wait_mode.should_wait(message)
}

/// Failure set is fixed: failed test/suite ends and bare `error` events.
fn signals_failure(message: &Message) -> bool {
    match message.name.as_str() {
        "testEnd" | "suiteEnd" => message.has_error(),
        "error" => true,
        _ => false,
    }
}

// ============================================================================
// Serde Representation
// ============================================================================

/// Config-file shape: `bool | "fail" | [names]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawWaitMode {
    Flag(bool),
    Keyword(String),
    Events(Vec<String>),
}

impl TryFrom<RawWaitMode> for WaitMode {
    type Error = String;

    fn try_from(raw: RawWaitMode) -> Result<Self, Self::Error> {
        match raw {
            RawWaitMode::Flag(false) => Ok(Self::Never),
            RawWaitMode::Flag(true) => Ok(Self::Always),
            RawWaitMode::Keyword(keyword) if keyword == FAIL_KEYWORD => Ok(Self::OnFailure),
            RawWaitMode::Keyword(keyword) => Err(format!(
                "invalid wait mode \"{keyword}\", expected true, false, \"{FAIL_KEYWORD}\" or a list of event names"
            )),
            RawWaitMode::Events(names) => Ok(Self::Events(names)),
        }
    }
}

impl From<WaitMode> for RawWaitMode {
    fn from(mode: WaitMode) -> Self {
        match mode {
            WaitMode::Never => Self::Flag(false),
            WaitMode::Always => Self::Flag(true),
            WaitMode::OnFailure => Self::Keyword(FAIL_KEYWORD.to_string()),
            WaitMode::Events(names) => Self::Events(names),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
