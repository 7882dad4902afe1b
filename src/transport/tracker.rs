//! Live connection tracking.
//!
//! Every accepted TCP connection runs on its own task registered here, so
//! shutdown can force-close idle keep-alive sockets instead of waiting for
//! them to expire.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tracing::debug;

// ============================================================================
// ConnectionTracker
// ============================================================================

/// Tasks serving live connections on one listener.
#[derive(Debug)]
pub struct ConnectionTracker {
    /// Listener name for log lines.
    label: &'static str,
    /// Next connection key.
    next_id: AtomicU64,
    /// Live connection tasks by key.
    live: Mutex<FxHashMap<u64, JoinHandle<()>>>,
}

impl ConnectionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            next_id: AtomicU64::new(1),
            live: Mutex::new(FxHashMap::default()),
        })
    }

    /// Returns the number of open connections.
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.live.lock().len()
    }

    /// Spawns `connection` and tracks it until it finishes or is closed.
    pub fn spawn<F>(self: &Arc<Self>, connection: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = Untrack {
            tracker: Arc::clone(self),
            id,
        };

        // Hold the lock across spawn so the task cannot untrack before insert.
        let mut live = self.live.lock();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            connection.await;
        });
        live.insert(id, handle);

        debug!(listener = self.label, open = live.len(), "Connection opened");
    }

    /// Force-closes every live connection and waits for their tasks to end.
    pub async fn close_all(&self) {
        let handles = self.abort_all();
        if handles.is_empty() {
            return;
        }

        let count = handles.len();
        join_all(handles).await;

        debug!(listener = self.label, count, "Connections destroyed");
    }

    /// Aborts every live connection without waiting.
    ///
    /// Returns the aborted tasks.
    pub fn abort_all(&self) -> Vec<JoinHandle<()>> {
        let handles: Vec<JoinHandle<()>> = self.live.lock().drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.abort();
        }
        handles
    }
}

// ============================================================================
// Untrack
// ============================================================================

/// Removes a connection from its tracker when the task ends or is aborted.
struct Untrack {
    tracker: Arc<ConnectionTracker>,
    id: u64,
}

impl Drop for Untrack {
    fn drop(&mut self) {
        let mut live = self.tracker.live.lock();
        if live.remove(&self.id).is_some() {
            debug!(listener = self.tracker.label, open = live.len(), "Connection closed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
