//! Path resolution, content types and the static file responder.
//!
//! Every file lookup goes through [`resolve_path`], which never yields a path
//! outside the configured root.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use hyper::StatusCode;
use tracing::debug;

use crate::server::StopFlag;

use super::{Handler, Outcome, RelayRequest, content_response};

// ============================================================================
// Constants
// ============================================================================

/// File served for directory requests.
const INDEX_FILE: &str = "index.html";

/// Content type for unknown extensions.
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// ============================================================================
// Path Resolution
// ============================================================================

/// Resolves a request path against `root`.
///
/// The query string is ignored, the path is percent-decoded and `.`/`..`
/// segments are normalized lexically. Both `/` and `\` separate segments.
///
/// # Errors
///
/// - `400 Bad Request` for undecodable paths or embedded NUL bytes
/// - `403 Forbidden` if `..` segments would climb above `root`
pub fn resolve_path(root: &Path, request_path: &str) -> Result<PathBuf, StatusCode> {
    let raw = request_path.split(['?', '#']).next().unwrap_or_default();
    let decoded = urlencoding::decode(raw).map_err(|_| StatusCode::BAD_REQUEST)?;

    if decoded.contains('\0') {
        return Err(StatusCode::BAD_REQUEST);
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(StatusCode::FORBIDDEN);
                }
            }
            other if is_plain_segment(other) => segments.push(other),
            // Drive prefixes and the like on Windows.
            _ => return Err(StatusCode::FORBIDDEN),
        }
    }

    let mut resolved = root.to_path_buf();
    resolved.extend(segments);
    Ok(resolved)
}

/// Returns `true` if `segment` parses as a single normal path component.
fn is_plain_segment(segment: &str) -> bool {
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

// ============================================================================
// Content Types
// ============================================================================

/// Returns the content type for a file path by extension.
#[must_use]
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "js" | "mjs" | "cjs" => "application/javascript; charset=utf-8",
        "json" | "map" => "application/json; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "wasm" => "application/wasm",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

// ============================================================================
// StaticFiles
// ============================================================================

/// Serves files from a root directory as-is.
///
/// With a prefix, only requests under that prefix are handled (the prefix is
/// stripped before resolution). Missing files are 404; nothing falls through.
/// A reserved prefix without a root answers 404 for everything under it.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    /// Directory files are served from.
    root: Option<PathBuf>,
    /// URL prefix this mount answers to.
    prefix: Option<String>,
    /// Server shutdown flag.
    stopped: StopFlag,
}

impl StaticFiles {
    /// Serves every `GET`/`HEAD` from `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, stopped: StopFlag) -> Self {
        Self {
            root: Some(root.into()),
            prefix: None,
            stopped,
        }
    }

    /// Serves `GET`/`HEAD` under `prefix` from `root`.
    #[must_use]
    pub fn mounted(root: impl Into<PathBuf>, prefix: impl Into<String>, stopped: StopFlag) -> Self {
        Self {
            root: Some(root.into()),
            prefix: Some(normalize_prefix(prefix.into())),
            stopped,
        }
    }

    /// Claims `prefix` without serving anything from it.
    #[must_use]
    pub fn reserved(prefix: impl Into<String>, stopped: StopFlag) -> Self {
        Self {
            root: None,
            prefix: Some(normalize_prefix(prefix.into())),
            stopped,
        }
    }

    /// Returns the part of `path` this mount should resolve, if it matches.
    fn strip_mount<'a>(&self, path: &'a str) -> Option<&'a str> {
        let Some(prefix) = &self.prefix else {
            return Some(path);
        };

        let rest = path.strip_prefix(prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    /// Reads `path`, or its index file if it is a directory.
    async fn read_file(&self, path: PathBuf) -> Result<(PathBuf, Bytes), Outcome> {
        let metadata = tokio::fs::metadata(&path).await;
        if self.stopped.is_stopped() {
            return Err(Outcome::Abandon);
        }

        let path = match metadata {
            Ok(meta) if meta.is_file() => path,
            Ok(meta) if meta.is_dir() => path.join(INDEX_FILE),
            _ => {
                debug!(path = %path.display(), "Unable to serve (unreadable)");
                return Err(Outcome::Fail(StatusCode::NOT_FOUND));
            }
        };

        let data = tokio::fs::read(&path).await;
        if self.stopped.is_stopped() {
            return Err(Outcome::Abandon);
        }

        match data {
            Ok(data) => Ok((path, Bytes::from(data))),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Unable to serve (unreadable)");
                Err(Outcome::Fail(StatusCode::NOT_FOUND))
            }
        }
    }
}

#[async_trait]
impl Handler for StaticFiles {
    async fn handle(&self, request: &RelayRequest) -> Outcome {
        if !request.is_read() {
            return Outcome::Next;
        }

        let Some(relative) = self.strip_mount(request.path_only()) else {
            return Outcome::Next;
        };

        let Some(root) = &self.root else {
            return Outcome::Fail(StatusCode::NOT_FOUND);
        };

        let path = match resolve_path(root, relative) {
            Ok(path) => path,
            Err(status) => return Outcome::Fail(status),
        };

        match self.read_file(path).await {
            Ok((path, data)) => {
                debug!(path = %path.display(), "Serving");
                Outcome::Respond(content_response(request, content_type_for(&path), data))
            }
            Err(outcome) => outcome,
        }
    }
}

/// Strips trailing slashes from a mount prefix.
fn normalize_prefix(prefix: String) -> String {
    prefix.trim_end_matches('/').to_string()
}

// ============================================================================
// Tests
// ============================================================================
