//! Instrumented source cache.
//!
//! An entry is served only while the file's modification time still equals
//! the one recorded with it. Concurrent writers for the same path are
//! last-writer-wins.

// ============================================================================
// Imports
// ============================================================================

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

// ============================================================================
// CacheEntry
// ============================================================================

/// Instrumented text for one file version.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// File modification time, milliseconds since the Unix epoch.
    pub mtime_millis: i64,
    /// Instrumented source.
    pub text: Arc<str>,
}

// ============================================================================
// InstrumentationCache
// ============================================================================

/// Maps absolute file paths to their instrumented text.
#[derive(Debug, Default)]
pub struct InstrumentationCache {
    entries: Mutex<FxHashMap<PathBuf, CacheEntry>>,
}

impl InstrumentationCache {
    /// Creates an empty cache.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached text if it was produced from this `mtime_millis`.
    #[must_use]
    pub fn get(&self, path: &Path, mtime_millis: i64) -> Option<Arc<str>> {
        self.entries
            .lock()
            .get(path)
            .filter(|entry| entry.mtime_millis == mtime_millis)
            .map(|entry| Arc::clone(&entry.text))
    }

    /// Stores `text` for `path`, replacing any previous entry.
    pub fn insert(&self, path: impl Into<PathBuf>, mtime_millis: i64, text: Arc<str>) {
        self.entries
            .lock()
            .insert(path.into(), CacheEntry { mtime_millis, text });
    }

    /// Returns the number of cached files.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is cached.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

// ============================================================================
// Public Functions
// ============================================================================

/// Returns a file's modification time in milliseconds since the Unix epoch.
///
/// Times before the epoch are negative.
///
/// # Errors
///
/// Returns an IO error if the platform does not report modification times.
pub fn mtime_millis(metadata: &Metadata) -> io::Result<i64> {
    let modified = metadata.modified()?;
    let millis = match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_millis()).unwrap_or(i64::MAX),
    };
    Ok(millis)
}

// ============================================================================
// Tests
// ============================================================================
