//! Server configuration.
//!
//! # Example
//!
//! ```ignore
//! use test_relay::{ServerConfig, WaitMode};
//!
//! let config = ServerConfig::new()
//!     .with_base_path("./tests")
//!     .with_port(9000)
//!     .with_wait_mode(WaitMode::OnFailure);
//!
//! assert_eq!(config.socket_port(), Some(9001));
//! ```
//!
//! Deserializes from the coordinator's config shape:
//!
//! ```json
//! { "basePath": "./tests", "port": 9000, "runInSync": "fail" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::session::WaitMode;

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 9000;

/// Default URL prefix of the internal assets mount.
pub const DEFAULT_ASSETS_PREFIX: &str = "/__intern";

// ============================================================================
// ServerConfig
// ============================================================================

/// Relay server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Root directory for file serving.
    pub base_path: PathBuf,

    /// Address both listeners bind to.
    pub host: IpAddr,

    /// HTTP port. `0` picks a free port.
    pub port: u16,

    /// WebSocket port. `None` means `port + 1` (or a free port if `port` is `0`).
    pub socket_port: Option<u16>,

    /// Acknowledgement wait-mode.
    #[serde(alias = "runInSync")]
    pub wait_mode: WaitMode,

    /// Directory served uninstrumented under `assets_prefix`.
    pub assets_path: Option<PathBuf>,

    /// URL prefix of the assets mount.
    pub assets_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            socket_port: None,
            wait_mode: WaitMode::Never,
            assets_path: None,
            assets_prefix: DEFAULT_ASSETS_PREFIX.to_string(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ServerConfig {
    /// Creates a config with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the file-serving root.
    #[inline]
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = path.into();
        self
    }

    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Sets the HTTP port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets an explicit WebSocket port.
    #[inline]
    #[must_use]
    pub fn with_socket_port(mut self, port: u16) -> Self {
        self.socket_port = Some(port);
        self
    }

    /// Sets the acknowledgement wait-mode.
    #[inline]
    #[must_use]
    pub fn with_wait_mode(mut self, wait_mode: WaitMode) -> Self {
        self.wait_mode = wait_mode;
        self
    }

    /// Mounts `path` under `prefix`, served without instrumentation.
    #[inline]
    #[must_use]
    pub fn with_assets(mut self, path: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        self.assets_path = Some(path.into());
        self.assets_prefix = prefix.into();
        self
    }
}

// ============================================================================
// Derived Values
// ============================================================================

impl ServerConfig {
    /// Returns the WebSocket port to bind.
    ///
    /// `None` if it would be `port + 1` and that overflows.
    #[must_use]
    pub fn socket_port(&self) -> Option<u16> {
        match self.socket_port {
            Some(port) => Some(port),
            None if self.port == 0 => Some(0),
            None => self.port.checked_add(1),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
