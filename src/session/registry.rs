//! Session map and subscription handles.
//!
//! Sessions are created lazily, by a listener subscribing or by a message
//! naming an unseen session, and live until the registry is cleared when the
//! server stops.
//!
//! # Concurrency
//!
//! Publishing takes a snapshot of a session's listeners, so a subscribe that
//! lands during an in-flight fan-out never invalidates it and is never lost.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::identifiers::{SessionId, SubscriptionId};

// ============================================================================
// Types
// ============================================================================

/// Future returned by a listener; resolves once the listener is done.
pub type ListenerFuture = BoxFuture<'static, Result<()>>;

/// Local subscriber invoked with `(name, data)` of every message in a session.
pub type Listener = Arc<dyn Fn(String, Value) -> ListenerFuture + Send + Sync>;

/// Wraps an async closure into a [`Listener`].
///
/// # Example
///
/// ```ignore
/// let on_event = listener(|name, data| async move {
///     println!("{name}: {data}");
///     Ok(())
/// });
/// ```
pub fn listener<F, Fut>(f: F) -> Listener
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |name, data| Box::pin(f(name, data)))
}

// ============================================================================
// Session
// ============================================================================

/// Listeners registered for one remote environment.
pub struct Session {
    /// Session identifier.
    id: SessionId,
    /// Registrations in subscription order.
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Returns the session ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the number of registered listeners.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns a snapshot of the current listeners.
    #[must_use]
    pub fn listeners(&self) -> Vec<Listener> {
        self.listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn push(&self, id: SubscriptionId, listener: Listener) {
        self.listeners.write().push((id, listener));
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        match listeners.iter().position(|(existing, _)| *existing == id) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle returned by [`SessionRegistry::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::release`].
pub struct Subscription {
    /// Session the listener was added to.
    session: Arc<Session>,
    /// Registration to remove.
    id: SubscriptionId,
    /// Set on first release.
    released: AtomicBool,
}

impl Subscription {
    /// Removes exactly this registration from its session.
    ///
    /// Idempotent: later calls are no-ops.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.session.remove(self.id) {
            debug!(session_id = %self.session.id, subscription = %self.id, "Listener released");
        }
    }

    /// Returns `true` once [`release`](Self::release) has been called.
    #[inline]
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Returns the subscription ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("session_id", &self.session.id)
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

// ============================================================================
// SessionRegistry
// ============================================================================

/// Maps session IDs to their listeners.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<FxHashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing session or creates an empty one.
    pub fn get_or_create_session(&self, session_id: &SessionId) -> Arc<Session> {
        if let Some(session) = self.sessions.read().get(session_id) {
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write();
        let session = sessions.entry(session_id.clone()).or_insert_with(|| {
            debug!(session_id = %session_id, "Session created");
            Arc::new(Session::new(session_id.clone()))
        });
        Arc::clone(session)
    }

    /// Appends `listener` to the session's listeners.
    pub fn subscribe(&self, session_id: &SessionId, listener: Listener) -> Subscription {
        let session = self.get_or_create_session(session_id);
        let id = SubscriptionId::next();
        session.push(id, listener);

        debug!(session_id = %session_id, subscription = %id, "Listener subscribed");

        Subscription {
            session,
            id,
            released: AtomicBool::new(false),
        }
    }

    /// Returns the number of known sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Forgets every session.
    pub fn clear(&self) {
        self.sessions.write().clear();
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session_count", &self.session_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
