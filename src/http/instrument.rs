//! Instrumenting JavaScript responder.
//!
//! `GET`/`HEAD` of a `.js` file the [`Instrumenter`] accepts is answered with
//! instrumented source, cached per path and modification time. Everything
//! else passes to the next handler.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::StatusCode;
use tracing::{debug, error, trace};

use crate::instrument::{InstrumentationCache, Instrumenter, mtime_millis};
use crate::server::StopFlag;

use super::{Handler, Outcome, RelayRequest, content_response, content_type_for, resolve_path};

// ============================================================================
// InstrumentedFiles
// ============================================================================

/// Serves instrumented JavaScript from a root directory.
#[derive(Clone)]
pub struct InstrumentedFiles {
    /// Directory files are served from.
    root: PathBuf,
    /// Decides eligibility and rewrites source.
    instrumenter: Arc<dyn Instrumenter>,
    /// Instrumented source by path and mtime.
    cache: Arc<InstrumentationCache>,
    /// Server shutdown flag.
    stopped: StopFlag,
}

impl InstrumentedFiles {
    /// Creates the responder.
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        instrumenter: Arc<dyn Instrumenter>,
        cache: Arc<InstrumentationCache>,
        stopped: StopFlag,
    ) -> Self {
        Self {
            root: root.into(),
            instrumenter,
            cache,
            stopped,
        }
    }

    /// Returns instrumented text for `path`, from cache when fresh.
    async fn instrumented_source(&self, path: &Path) -> Result<Arc<str>, Outcome> {
        let metadata = tokio::fs::metadata(path).await;
        if self.stopped.is_stopped() {
            return Err(Outcome::Abandon);
        }

        let mtime = match metadata {
            Ok(meta) if meta.is_file() => mtime_millis(&meta).map_err(|e| {
                debug!(path = %path.display(), error = %e, "Unable to serve (no mtime)");
                Outcome::Fail(StatusCode::NOT_FOUND)
            })?,
            _ => {
                debug!(path = %path.display(), "Unable to serve (unreadable)");
                return Err(Outcome::Fail(StatusCode::NOT_FOUND));
            }
        };

        if let Some(text) = self.cache.get(path, mtime) {
            trace!(path = %path.display(), "Instrumentation cache hit");
            return Ok(text);
        }

        let bytes = tokio::fs::read(path).await;
        if self.stopped.is_stopped() {
            return Err(Outcome::Abandon);
        }

        let bytes = bytes.map_err(|e| {
            debug!(path = %path.display(), error = %e, "Unable to serve (unreadable)");
            Outcome::Fail(StatusCode::NOT_FOUND)
        })?;

        // Invalid UTF-8 becomes U+FFFD rather than failing the request.
        let source = String::from_utf8_lossy(&bytes).into_owned();

        let instrumenter = Arc::clone(&self.instrumenter);
        let owned_path = path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || {
            instrumenter.instrument(&source, &owned_path)
        });
        let text = task.await.map_err(|e| {
            error!(path = %path.display(), error = %e, "Instrumentation failed");
            Outcome::Fail(StatusCode::INTERNAL_SERVER_ERROR)
        })?;

        // mtime may already be stale here; the next request re-checks it.
        let text: Arc<str> = Arc::from(text);
        self.cache.insert(path, mtime, Arc::clone(&text));
        Ok(text)
    }
}

#[async_trait]
impl Handler for InstrumentedFiles {
    async fn handle(&self, request: &RelayRequest) -> Outcome {
        if !request.is_read() || !request.path_only().ends_with(".js") {
            return Outcome::Next;
        }

        let Ok(path) = resolve_path(&self.root, request.path_only()) else {
            return Outcome::Next;
        };

        if !self.instrumenter.should_instrument(&path) {
            return Outcome::Next;
        }

        match self.instrumented_source(&path).await {
            Ok(text) => {
                debug!(path = %path.display(), "Serving instrumented");
                let data = Bytes::copy_from_slice(text.as_bytes());
                Outcome::Respond(content_response(request, content_type_for(&path), data))
            }
            Err(outcome) => outcome,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
