//! Builder pattern for server configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use test_relay::{Server, TracingSink, WaitMode};
//!
//! # fn example() -> test_relay::Result<()> {
//! let server = Server::builder()
//!     .base_path("./tests")
//!     .port(9000)
//!     .wait_mode(WaitMode::OnFailure)
//!     .error_sink(Arc::new(TracingSink))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, ErrorSink, Result, TracingSink};
use crate::instrument::{Instrumenter, NoInstrumentation};
use crate::session::WaitMode;

use super::config::ServerConfig;
use super::core::Server;

// ============================================================================
// ServerBuilder
// ============================================================================

/// Builder for configuring a [`Server`] instance.
///
/// Use [`Server::builder()`] to create a new builder.
#[derive(Clone, Default)]
pub struct ServerBuilder {
    /// Listener and file-serving settings.
    config: ServerConfig,
    /// Coverage instrumenter; defaults to [`NoInstrumentation`].
    instrumenter: Option<Arc<dyn Instrumenter>>,
    /// Error channel; defaults to [`TracingSink`].
    errors: Option<Arc<dyn ErrorSink>>,
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("instrumenter", &self.instrumenter.is_some())
            .field("errors", &self.errors.is_some())
            .finish()
    }
}

// ============================================================================
// ServerBuilder Implementation
// ============================================================================

impl ServerBuilder {
    /// Creates a builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the file-serving root.
    #[inline]
    #[must_use]
    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.base_path = path.into();
        self
    }

    /// Sets the HTTP port. The WebSocket port follows it unless set.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets an explicit WebSocket port.
    #[inline]
    #[must_use]
    pub fn socket_port(mut self, port: u16) -> Self {
        self.config.socket_port = Some(port);
        self
    }

    /// Sets the acknowledgement wait-mode.
    #[inline]
    #[must_use]
    pub fn wait_mode(mut self, wait_mode: WaitMode) -> Self {
        self.config.wait_mode = wait_mode;
        self
    }

    /// Sets the coverage instrumenter.
    #[inline]
    #[must_use]
    pub fn instrumenter(mut self, instrumenter: Arc<dyn Instrumenter>) -> Self {
        self.instrumenter = Some(instrumenter);
        self
    }

    /// Sets the process-wide error channel.
    #[inline]
    #[must_use]
    pub fn error_sink(mut self, errors: Arc<dyn ErrorSink>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Builds the server with validation. The server starts stopped.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the base path cannot be made absolute
    /// - [`Error::Config`] if `port + 1` overflows
    /// - [`Error::Config`] if both listeners would share a fixed port
    /// - [`Error::Config`] if the assets prefix is the root path
    pub fn build(self) -> Result<Server> {
        let config = self.validate()?;
        let instrumenter = self
            .instrumenter
            .unwrap_or_else(|| Arc::new(NoInstrumentation));
        let errors = self.errors.unwrap_or_else(|| Arc::new(TracingSink));

        Ok(Server::new(config, instrumenter, errors))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ServerBuilder {
    /// Validates and normalizes the configuration.
    fn validate(&self) -> Result<ServerConfig> {
        let mut config = self.config.clone();

        config.base_path = absolute(&config.base_path, "base path")?;
        if let Some(assets) = config.assets_path.take() {
            config.assets_path = Some(absolute(&assets, "assets path")?);
        }

        let Some(socket_port) = config.socket_port() else {
            return Err(Error::config(format!(
                "WebSocket port would be {} + 1, which is out of range.\n\
                 Use .socket_port() to set it explicitly.",
                config.port
            )));
        };

        if config.port != 0 && config.port == socket_port {
            return Err(Error::config(format!(
                "HTTP and WebSocket listeners cannot share port {socket_port}"
            )));
        }

        if !config.assets_prefix.starts_with('/') {
            config.assets_prefix.insert(0, '/');
        }

        if config.assets_prefix.trim_end_matches('/').is_empty() {
            return Err(Error::config(
                "Assets prefix cannot be the root path; it would shadow every file",
            ));
        }

        Ok(config)
    }
}

/// Makes `path` absolute against the current directory.
fn absolute(path: &std::path::Path, what: &str) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| {
        Error::config(format!("Cannot resolve {what} {}: {e}", path.display()))
    })
}

// ============================================================================
// Tests
// ============================================================================
