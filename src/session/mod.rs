//! Session-scoped publish/subscribe.
//!
//! Messages arriving from any transport are routed to the listeners that
//! local code registered for the message's session.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   route()   ┌───────────────┐   fan-out   ┌────────────┐
//! │  Transport   │────────────►│ MessageRouter │────────────►│ Listener 1 │
//! │ (WS / POST)  │◄────────────│  + WaitMode   │────────────►│ Listener 2 │
//! └──────────────┘  Completion └───────┬───────┘             └────────────┘
//!                                      │ lookup
//!                              ┌───────▼─────────┐
//!                              │ SessionRegistry │
//!                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `registry` | Session map and subscription handles |
//! | `policy` | Acknowledgement wait-mode |
//! | `router` | Concurrent fan-out and ack decision |

// ============================================================================
// Submodules
// ============================================================================

/// Acknowledgement wait-mode.
pub mod policy;

/// Session map and subscription handles.
pub mod registry;

/// Concurrent fan-out and ack decision.
pub mod router;

// ============================================================================
// Re-exports
// ============================================================================

pub use policy::{WaitMode, should_wait_for_listeners};
pub use registry::{Listener, ListenerFuture, Session, SessionRegistry, Subscription, listener};
pub use router::{Completion, MessageRouter};
