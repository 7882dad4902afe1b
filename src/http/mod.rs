//! HTTP handler chain.
//!
//! Requests on the HTTP port pass through an ordered chain of [`Handler`]s,
//! each of which responds, fails with a status, passes to the next handler,
//! or abandons the request because the server stopped.
//!
//! # Chain
//!
//! | Order | Handler | Handles |
//! |-------|---------|---------|
//! | 1 | [`StaticFiles`] (assets mount) | `GET`/`HEAD` under the assets prefix |
//! | 2 | [`InstrumentedFiles`] | `GET`/`HEAD` of instrumentable `.js` files |
//! | 3 | [`StaticFiles`] (base path) | other `GET`/`HEAD` |
//! | 4 | [`PostMessages`] | `POST` message batches |
//! | 5 | [`Unhandled`] | everything else (501) |
//!
//! A failure ends the chain with an empty-bodied response carrying its status.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::{Method, Response, StatusCode};
use tracing::trace;

// ============================================================================
// Submodules
// ============================================================================

/// Path resolution, content types and the static file responder.
pub mod files;

/// Instrumenting JavaScript responder.
pub mod instrument;

/// POST message intake.
pub mod post;

/// Terminal 501 handler.
pub mod unhandled;

// ============================================================================
// Re-exports
// ============================================================================

pub use files::{StaticFiles, content_type_for, resolve_path};
pub use instrument::InstrumentedFiles;
pub use post::PostMessages;
pub use unhandled::Unhandled;

// ============================================================================
// Types
// ============================================================================

/// Response body type used by every handler.
pub type Body = Full<Bytes>;

/// Response type used by every handler.
pub type HttpResponse = Response<Body>;

// ============================================================================
// RelayRequest
// ============================================================================

/// A fully-read HTTP request.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    /// Request method.
    pub method: Method,
    /// Raw request target path, possibly with a query string.
    pub path: String,
    /// Request body.
    pub body: Bytes,
}

impl RelayRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            path: path.into(),
            body: body.into(),
        }
    }

    /// Returns `true` for `GET` and `HEAD`.
    #[inline]
    #[must_use]
    pub fn is_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// Returns `true` for `HEAD`.
    #[inline]
    #[must_use]
    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// Returns the path without its query string.
    #[must_use]
    pub fn path_only(&self) -> &str {
        self.path.split(['?', '#']).next().unwrap_or_default()
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// What a handler did with a request.
pub enum Outcome {
    /// Send this response.
    Respond(HttpResponse),
    /// Pass to the next handler.
    Next,
    /// End the chain with an empty response of this status.
    Fail(StatusCode),
    /// The server stopped mid-request; write nothing.
    Abandon,
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Respond(response) => f.debug_tuple("Respond").field(&response.status()).finish(),
            Self::Next => f.write_str("Next"),
            Self::Fail(status) => f.debug_tuple("Fail").field(status).finish(),
            Self::Abandon => f.write_str("Abandon"),
        }
    }
}

// ============================================================================
// Handler
// ============================================================================

/// One stage of the HTTP handler chain.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles `request` or passes it on.
    async fn handle(&self, request: &RelayRequest) -> Outcome;
}

// ============================================================================
// HandlerChain
// ============================================================================

/// Ordered handler stages.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Box<dyn Handler>>,
}

impl HandlerChain {
    /// Creates an empty chain.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler.
    #[must_use]
    pub fn with(mut self, handler: impl Handler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Returns the number of stages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if the chain has no stages.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs `request` through the chain.
    ///
    /// Returns `None` if a handler abandoned the request. A request no stage
    /// handles gets 501.
    pub async fn dispatch(&self, request: &RelayRequest) -> Option<HttpResponse> {
        for handler in &self.handlers {
            match handler.handle(request).await {
                Outcome::Next => continue,
                Outcome::Respond(response) => return Some(response),
                Outcome::Fail(status) => {
                    trace!(
                        method = %request.method,
                        path = %request.path,
                        %status,
                        "Request failed"
                    );
                    return Some(empty_response(status));
                }
                Outcome::Abandon => {
                    trace!(method = %request.method, path = %request.path, "Request abandoned");
                    return None;
                }
            }
        }

        Some(empty_response(StatusCode::NOT_IMPLEMENTED))
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("len", &self.len())
            .finish()
    }
}

// ============================================================================
// Response Helpers
// ============================================================================

/// Builds an empty-bodied response.
#[must_use]
pub fn empty_response(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Body::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Builds a 200 response for file content.
///
/// `HEAD` requests get identical headers and no body.
#[must_use]
pub fn content_response(
    request: &RelayRequest,
    content_type: &'static str,
    data: Bytes,
) -> HttpResponse {
    let length = data.len();
    let body = if request.is_head() { Bytes::new() } else { data };

    let mut response = Response::new(Body::new(body));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    response
}

// ============================================================================
// Tests
// ============================================================================
