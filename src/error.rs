//! Error types for the test relay.
//!
//! This module defines all error types used throughout the crate, plus the
//! [`ErrorSink`] channel that background failures are reported on.
//!
//! # Usage
//!
//! Fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use test_relay::{Result, Server};
//!
//! async fn example(server: &Server) -> Result<()> {
//!     server.start().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Lifecycle | [`Error::Bind`], [`Error::AlreadyRunning`], [`Error::Stopped`] |
//! | Protocol | [`Error::Protocol`] |
//! | Routing | [`Error::Listener`], [`Error::AckFailed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::net::SocketAddr;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::error;

use crate::identifiers::MessageId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned by [`ServerBuilder::build`](crate::ServerBuilder::build) when
    /// the configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Failed to bind a listener.
    ///
    /// The only fatal condition of [`Server::start`](crate::Server::start).
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: IoError,
    },

    /// `start` was called on a server that is already running.
    #[error("Server is already running")]
    AlreadyRunning,

    /// The server stopped while a request was in flight.
    #[error("Server stopped")]
    Stopped,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed message from a remote environment.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Routing Errors
    // ========================================================================
    /// A session listener failed while handling a message.
    #[error("Listener failed: {message}")]
    Listener {
        /// Description of the listener failure.
        message: String,
    },

    /// Sending a WebSocket acknowledgement failed.
    #[error("Error sending ack for [ {id} ]: {message}")]
    AckFailed {
        /// The message whose ack could not be sent.
        id: MessageId,
        /// Description of the send failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP connection error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a bind error.
    #[inline]
    pub fn bind(addr: SocketAddr, source: IoError) -> Self {
        Self::Bind { addr, source }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a listener error.
    #[inline]
    pub fn listener(message: impl Into<String>) -> Self {
        Self::Listener {
            message: message.into(),
        }
    }

    /// Creates an ack failure error.
    #[inline]
    pub fn ack_failed(id: MessageId, message: impl Into<String>) -> Self {
        Self::AckFailed {
            id,
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if a session listener produced this error.
    #[inline]
    #[must_use]
    pub fn is_listener_error(&self) -> bool {
        matches!(self, Self::Listener { .. })
    }

    /// Returns `true` if this error came from a socket or transport.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(_) | Self::Http(_) | Self::AckFailed { .. } | Self::Io(_)
        )
    }

    /// Returns `true` if the remote end sent something unparseable.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Json(_))
    }
}

// ============================================================================
// ErrorSink
// ============================================================================

/// Process-wide error channel.
///
/// Failures that have no caller to return to (background fan-out, unparseable
/// WebSocket frames, ack send failures, socket errors) are reported here.
pub trait ErrorSink: Send + Sync {
    /// Reports an error. Must not block.
    fn report(&self, error: Error);
}

/// Sink that logs every reported error via `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, error: Error) {
        error!(error = %error, "Relay error");
    }
}

impl ErrorSink for UnboundedSender<Error> {
    fn report(&self, error: Error) {
        if let Err(unsent) = self.send(error) {
            error!(error = %unsent.0, "Relay error (receiver dropped)");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
