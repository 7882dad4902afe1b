//! Code-coverage instrumentation.
//!
//! The instrumentation algorithm itself is an external collaborator behind
//! [`Instrumenter`]; this module owns the mtime-keyed cache in front of it.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `cache` | Path → (mtime, instrumented text) cache |

// ============================================================================
// Imports
// ============================================================================

use std::path::Path;

// ============================================================================
// Submodules
// ============================================================================

/// Instrumented source cache.
pub mod cache;

// ============================================================================
// Re-exports
// ============================================================================

pub use cache::{CacheEntry, InstrumentationCache, mtime_millis};

// ============================================================================
// Instrumenter
// ============================================================================

/// Source-to-source coverage rewriter.
///
/// `instrument` must be a pure function of `(source, path)`: concurrent
/// requests for the same stale file may instrument it more than once.
pub trait Instrumenter: Send + Sync {
    /// Returns `true` if the file at `path` should be instrumented.
    fn should_instrument(&self, path: &Path) -> bool;

    /// Rewrites `source`, read from the absolute `path`.
    ///
    /// The absolute path lets coverage reports resolve source locations.
    fn instrument(&self, source: &str, path: &Path) -> String;
}

/// Instrumenter that never instruments anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInstrumentation;

impl Instrumenter for NoInstrumentation {
    fn should_instrument(&self, _path: &Path) -> bool {
        false
    }

    fn instrument(&self, source: &str, _path: &Path) -> String {
        source.to_string()
    }
}
