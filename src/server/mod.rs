//! Relay server lifecycle and configuration.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent [`ServerBuilder`] with validation |
//! | `config` | [`ServerConfig`] and its defaults |
//! | `core` | [`Server`] start/stop and session access |
//! | `state` | [`StopFlag`] shared with handlers |

// ============================================================================
// Submodules
// ============================================================================

/// Builder pattern for server configuration.
pub mod builder;

/// Server configuration.
pub mod config;

/// Relay server lifecycle.
pub mod core;

/// Shared shutdown flag.
pub mod state;

#[cfg(test)]
mod tests;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ServerBuilder;
pub use config::{DEFAULT_ASSETS_PREFIX, DEFAULT_PORT, ServerConfig};
pub use core::Server;
pub use state::StopFlag;
