//! Relay server lifecycle.
//!
//! The [`Server`] owns the HTTP listener and the WebSocket listener as a
//! unit. Both are bound on [`start`](Server::start) and torn down on
//! [`stop`](Server::stop), which also destroys every live connection.
//!
//! # Example
//!
//! ```no_run
//! use test_relay::{Server, listener};
//!
//! # async fn example() -> test_relay::Result<()> {
//! let server = Server::builder().base_path("./tests").port(9000).build()?;
//!
//! let subscription = server.subscribe("a4c1", listener(|name, data| async move {
//!     println!("{name}: {data}");
//!     Ok(())
//! }));
//!
//! server.start().await?;
//! // ... remote environment runs ...
//! subscription.release();
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, ErrorSink, Result};
use crate::http::{HandlerChain, InstrumentedFiles, PostMessages, StaticFiles, Unhandled};
use crate::identifiers::SessionId;
use crate::instrument::{InstrumentationCache, Instrumenter};
use crate::protocol::Message;
use crate::session::{Completion, Listener, MessageRouter, SessionRegistry, Subscription};
use crate::transport::{self, ConnectionTracker, serve_http, serve_websocket};

use super::builder::ServerBuilder;
use super::config::ServerConfig;
use super::state::StopFlag;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the server.
pub(crate) struct ServerInner {
    /// Validated configuration.
    pub config: ServerConfig,

    /// Coverage instrumenter.
    pub instrumenter: Arc<dyn Instrumenter>,

    /// Process-wide error channel.
    pub errors: Arc<dyn ErrorSink>,

    /// Session listeners.
    pub registry: Arc<SessionRegistry>,

    /// Instrumented source cache.
    pub cache: Arc<InstrumentationCache>,

    /// Routes messages from both transports.
    pub router: MessageRouter,

    /// Shared with handlers; set while stopped.
    pub stopped: StopFlag,

    /// Serializes `start` and `stop`.
    pub lifecycle: tokio::sync::Mutex<()>,

    /// Listener state while running.
    pub running: Mutex<Option<Running>>,
}

/// Listeners and connections of a running server.
pub(crate) struct Running {
    /// Bound HTTP port.
    pub http_port: u16,
    /// Bound WebSocket port.
    pub ws_port: u16,
    /// HTTP accept loop.
    pub http_task: JoinHandle<()>,
    /// WebSocket accept loop.
    pub ws_task: JoinHandle<()>,
    /// Live HTTP connections.
    pub http_connections: Arc<ConnectionTracker>,
    /// Live WebSocket connections.
    pub ws_connections: Arc<ConnectionTracker>,
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.http_task.abort();
            running.ws_task.abort();
            running.http_connections.abort_all();
            running.ws_connections.abort_all();
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Relay and file server for remote test environments.
///
/// Cheap to clone; clones share the same listeners and sessions.
#[derive(Clone)]
pub struct Server {
    /// Shared inner state.
    pub(crate) inner: Arc<ServerInner>,
}

// ============================================================================
// Server - Display
// ============================================================================

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("base_path", &self.inner.config.base_path)
            .field("http_port", &self.http_port())
            .field("ws_port", &self.ws_port())
            .field("stopped", &self.stopped())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Server - Public API
// ============================================================================

impl Server {
    /// Creates a configuration builder for the server.
    #[inline]
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the validated configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Returns `true` unless the server is running.
    #[inline]
    #[must_use]
    pub fn stopped(&self) -> bool {
        self.inner.stopped.is_stopped()
    }

    /// Returns the bound HTTP port while running.
    #[inline]
    #[must_use]
    pub fn http_port(&self) -> Option<u16> {
        self.inner.running.lock().as_ref().map(|r| r.http_port)
    }

    /// Returns the bound WebSocket port while running.
    #[inline]
    #[must_use]
    pub fn ws_port(&self) -> Option<u16> {
        self.inner.running.lock().as_ref().map(|r| r.ws_port)
    }

    /// Returns the number of open HTTP and WebSocket connections.
    #[must_use]
    pub fn live_connections(&self) -> usize {
        self.inner
            .running
            .lock()
            .as_ref()
            .map_or(0, |r| r.http_connections.count() + r.ws_connections.count())
    }

    /// Returns the number of cached instrumented files.
    #[inline]
    #[must_use]
    pub fn cached_files(&self) -> usize {
        self.inner.cache.len()
    }

    /// Adds `listener` to a session. Works whether or not the server runs.
    pub fn subscribe(&self, session_id: impl Into<SessionId>, listener: Listener) -> Subscription {
        self.inner.registry.subscribe(&session_id.into(), listener)
    }

    /// Routes a locally produced message as if it had arrived on a transport.
    pub fn route(&self, message: &Message) -> Completion {
        self.inner.router.route(message)
    }

    /// Binds both listeners and starts accepting connections.
    ///
    /// Resolves once both listeners are accepting.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if the server is running
    /// - [`Error::Bind`] if either port cannot be bound (nothing stays bound)
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.inner.running.lock().is_some() {
            return Err(Error::AlreadyRunning);
        }

        let config = &self.inner.config;
        let socket_port = config.socket_port().ok_or_else(|| {
            Error::config(format!("WebSocket port {} + 1 is out of range", config.port))
        })?;

        let http_listener = transport::bind(config.host, config.port).await?;
        let ws_listener = transport::bind(config.host, socket_port).await?;
        let http_port = http_listener.local_addr()?.port();
        let ws_port = ws_listener.local_addr()?.port();

        let http_connections = ConnectionTracker::new("http");
        let ws_connections = ConnectionTracker::new("websocket");
        let chain = Arc::new(self.handler_chain());

        self.inner.stopped.set_stopped(false);

        let http_task = tokio::spawn(serve_http(
            http_listener,
            chain,
            Arc::clone(&http_connections),
        ));
        let ws_task = tokio::spawn(serve_websocket(
            ws_listener,
            self.inner.router.clone(),
            Arc::clone(&self.inner.errors),
            Arc::clone(&ws_connections),
        ));

        *self.inner.running.lock() = Some(Running {
            http_port,
            ws_port,
            http_task,
            ws_task,
            http_connections,
            ws_connections,
        });

        info!(
            http_port,
            ws_port,
            base_path = %config.base_path.display(),
            "Relay server listening"
        );

        Ok(())
    }

    /// Closes both listeners and destroys every live connection.
    ///
    /// Clears the instrumentation cache and all sessions. A no-op when
    /// already stopped. In-flight requests are abandoned, not drained.
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let Some(running) = self.inner.running.lock().take() else {
            debug!("Stop requested while stopped");
            return;
        };

        self.inner.stopped.set_stopped(true);

        running.http_task.abort();
        running.ws_task.abort();
        let _ = running.http_task.await;
        let _ = running.ws_task.await;

        running.http_connections.close_all().await;
        running.ws_connections.close_all().await;

        self.inner.cache.clear();
        self.inner.registry.clear();

        info!(
            http_port = running.http_port,
            ws_port = running.ws_port,
            "Relay server stopped"
        );
    }
}

// ============================================================================
// Server - Internal API
// ============================================================================

impl Server {
    /// Creates a stopped server.
    pub(crate) fn new(
        config: ServerConfig,
        instrumenter: Arc<dyn Instrumenter>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let router = MessageRouter::new(
            Arc::clone(&registry),
            config.wait_mode.clone(),
            Arc::clone(&errors),
        );

        let stopped = StopFlag::new();
        stopped.set_stopped(true);

        let inner = Arc::new(ServerInner {
            config,
            instrumenter,
            errors,
            registry,
            cache: Arc::new(InstrumentationCache::new()),
            router,
            stopped,
            lifecycle: tokio::sync::Mutex::new(()),
            running: Mutex::new(None),
        });

        Self { inner }
    }

    /// Assembles the HTTP handler chain.
    fn handler_chain(&self) -> HandlerChain {
        let inner = &self.inner;
        let config = &inner.config;
        let prefix = config.assets_prefix.as_str();

        // The assets prefix never reaches instrumentation, mounted or not.
        let assets = match &config.assets_path {
            Some(assets) => StaticFiles::mounted(assets, prefix, inner.stopped.clone()),
            None => StaticFiles::reserved(prefix, inner.stopped.clone()),
        };

        HandlerChain::new()
            .with(assets)
            .with(InstrumentedFiles::new(
                &config.base_path,
                Arc::clone(&inner.instrumenter),
                Arc::clone(&inner.cache),
                inner.stopped.clone(),
            ))
            .with(StaticFiles::new(&config.base_path, inner.stopped.clone()))
            .with(PostMessages::new(inner.router.clone()))
            .with(Unhandled)
    }
}

// ============================================================================
// Tests
// ============================================================================
