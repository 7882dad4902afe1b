//! TCP listeners for the two relay ports.
//!
//! The HTTP port serves files and accepts `POST`ed message batches; the
//! WebSocket port accepts one message per frame and replies with acks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐        HTTP :p          ┌──────────────────────┐
//! │  Remote          │◄───────────────────────►│  serve_http          │
//! │  environment     │                         │  → HandlerChain      │
//! │  (browser, node) │      WebSocket :p+1     │                      │
//! │                  │◄───────────────────────►│  serve_websocket     │
//! └──────────────────┘                         │  → MessageRouter     │
//!                                              └──────────────────────┘
//! ```
//!
//! Every accepted connection runs on a task tracked by a
//! [`ConnectionTracker`], so shutdown can destroy it.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `http` | HTTP accept loop and hyper service |
//! | `tracker` | Live connection set |
//! | `websocket` | WebSocket accept loop and ack writer |

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// Submodules
// ============================================================================

/// HTTP accept loop and hyper service.
pub mod http;

/// Live connection set.
pub mod tracker;

/// WebSocket accept loop and ack writer.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use http::serve_http;
pub use tracker::ConnectionTracker;
pub use websocket::serve_websocket;

// ============================================================================
// Constants
// ============================================================================

/// Pause after a failed `accept` (e.g. file descriptor exhaustion).
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// Binding
// ============================================================================

/// Binds a TCP listener.
///
/// Use port 0 to let the OS assign a free port.
///
/// # Errors
///
/// Returns [`Error::Bind`] if the address cannot be bound.
pub async fn bind(ip: IpAddr, port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::new(ip, port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::bind(addr, e))?;

    let local = listener.local_addr().map_err(|e| Error::bind(addr, e))?;
    debug!(%local, "Listener bound");

    Ok(listener)
}

// ============================================================================
// Tests
// ============================================================================
