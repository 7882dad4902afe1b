//! Wire message types.
//!
//! This module defines the messages exchanged between a remote execution
//! environment and the relay.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Transport | Purpose |
//! |--------------|-----------|-----------|---------|
//! | [`Message`] | Remote → Local | WebSocket frame, HTTP POST body | Lifecycle event |
//! | [`Ack`] | Local → Remote | WebSocket frame | Message accepted |
//!
//! An HTTP POST body carries a [`Message`] or an array of them; see
//! [`parse_batch`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | `Message` and `Ack` types |
//! | `batch` | POST body decoding |

// ============================================================================
// Submodules
// ============================================================================

/// Message and Ack types.
pub mod message;

/// POST body decoding.
pub mod batch;

// ============================================================================
// Re-exports
// ============================================================================

pub use batch::parse_batch;
pub use message::{Ack, Message, RUN_END};
