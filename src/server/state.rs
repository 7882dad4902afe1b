//! Shared shutdown flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether the server is stopped.
///
/// Handlers check it after every filesystem await and abandon the request
/// once it is set, so nothing is written to a socket being torn down.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Creates a flag in the running state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the server has stopped.
    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sets the flag for every clone.
    #[inline]
    pub fn set_stopped(&self, stopped: bool) {
        self.0.store(stopped, Ordering::Release);
    }
}
