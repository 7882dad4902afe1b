//! Test Relay - message relay and instrumenting file server for remote test
//! environments.
//!
//! A test coordinator runs test code inside environments it does not control
//! (browsers, child processes). This crate serves those environments their
//! code and assets, optionally rewriting JavaScript for code coverage, and
//! relays the lifecycle events they send back to local listeners.
//!
//! # Architecture
//!
//! ```text
//! remote environment ──HTTP GET──► file handlers ──► InstrumentationCache
//!                    ──HTTP POST─┐
//!                    ──WebSocket─┴► MessageRouter ──► SessionRegistry listeners
//!                    ◄── ack ──────────┘ (per WaitMode)
//! ```
//!
//! Key design principles:
//!
//! - Sessions are keyed by the `sessionId` each message carries
//! - Listeners for one message run concurrently
//! - [`WaitMode`] decides whether acks wait on listeners
//! - Shutdown destroys live sockets instead of draining them
//!
//! # Quick Start
//!
//! ```no_run
//! use test_relay::{Result, Server, WaitMode, listener};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = Server::builder()
//!         .base_path("./tests")
//!         .port(9000)
//!         .wait_mode(WaitMode::OnFailure)
//!         .build()?;
//!
//!     let _reporter = server.subscribe("a4c1", listener(|name, data| async move {
//!         println!("{name}: {data}");
//!         Ok(())
//!     }));
//!
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types, [`Result`] alias and [`ErrorSink`] |
//! | [`http`] | HTTP handler chain |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`instrument`] | [`Instrumenter`] and its cache |
//! | [`protocol`] | Message and ack wire types |
//! | [`server`] | [`Server`] lifecycle and configuration |
//! | [`session`] | Session registry, ack policy and router |
//! | [`transport`] | TCP listeners (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// HTTP handler chain: file serving, instrumentation, message intake.
pub mod http;

/// Type-safe identifiers for sessions, messages and subscriptions.
pub mod identifiers;

/// Code-coverage instrumentation seam and cache.
pub mod instrument;

/// Message and ack wire types.
pub mod protocol;

/// Relay server lifecycle and configuration.
///
/// Use [`Server::builder()`] to create a configured server.
pub mod server;

/// Session registry, acknowledgement policy and message router.
pub mod session;

/// TCP listeners for the HTTP and WebSocket ports.
///
/// Internal module handling accept loops and connection tracking.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, ErrorSink, Result, TracingSink};

// Identifier types
pub use identifiers::{MessageId, SessionId, SubscriptionId};

// Instrumentation
pub use instrument::{InstrumentationCache, Instrumenter, NoInstrumentation};

// Protocol types
pub use protocol::{Ack, Message};

// Server types
pub use server::{Server, ServerBuilder, ServerConfig};

// Session types
pub use session::{
    Completion, Listener, MessageRouter, SessionRegistry, Subscription, WaitMode, listener,
};
