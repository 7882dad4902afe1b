//! Concurrent fan-out and ack decision.
//!
//! [`MessageRouter::route`] starts the fan-out for a message immediately (in
//! the order messages are routed) and returns a [`Completion`] the transport
//! awaits before acknowledging.
//!
//! | Wait-mode says | Completion | Listener failure goes to |
//! |----------------|------------|--------------------------|
//! | don't wait | already succeeded | [`ErrorSink`] |
//! | wait | resolves with the fan-out | the transport (caller) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::error::{Error, ErrorSink, Result};
use crate::protocol::Message;

use super::policy::WaitMode;
use super::registry::{Listener, SessionRegistry};

// ============================================================================
// Completion
// ============================================================================

/// Outcome of routing one message, as seen by the transport.
#[must_use = "a Completion must be awaited to learn when to acknowledge"]
pub struct Completion {
    /// Fan-out task to wait on; `None` when already accepted.
    pending: Option<JoinHandle<Result<()>>>,
}

impl Completion {
    /// A completion that has already succeeded.
    #[inline]
    pub fn accepted() -> Self {
        Self { pending: None }
    }

    fn waiting_on(handle: JoinHandle<Result<()>>) -> Self {
        Self {
            pending: Some(handle),
        }
    }

    /// Returns `true` if the transport must wait for listeners.
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Waits for the fan-out if required.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Listener`] with the first listener failure, or if a
    /// listener panicked.
    pub async fn wait(self) -> Result<()> {
        match self.pending {
            None => Ok(()),
            Some(handle) => join_fan_out(handle).await,
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.is_pending())
            .finish()
    }
}

// ============================================================================
// MessageRouter
// ============================================================================

/// Routes messages to their session's listeners.
#[derive(Clone)]
pub struct MessageRouter {
    /// Session listeners.
    registry: Arc<SessionRegistry>,
    /// Acknowledgement policy.
    wait_mode: WaitMode,
    /// Receives failures of background fan-outs.
    errors: Arc<dyn ErrorSink>,
}

impl MessageRouter {
    /// Creates a router over `registry`.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        wait_mode: WaitMode,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            registry,
            wait_mode,
            errors,
        }
    }

    /// Returns the configured wait-mode.
    #[inline]
    #[must_use]
    pub fn wait_mode(&self) -> &WaitMode {
        &self.wait_mode
    }

    /// Fans `message` out to its session's listeners.
    ///
    /// Listeners run concurrently on a spawned task; a session without
    /// listeners completes immediately. Must be called within a tokio runtime.
    pub fn route(&self, message: &Message) -> Completion {
        trace!(
            id = %message.id,
            session_id = %message.session_id,
            name = %message.name,
            "Processing message"
        );

        let listeners = self
            .registry
            .get_or_create_session(&message.session_id)
            .listeners();

        if listeners.is_empty() {
            return Completion::accepted();
        }

        let handle = tokio::spawn(fan_out(
            listeners,
            message.name.clone(),
            message.data.clone(),
        ));

        if self.wait_mode.should_wait(message) {
            return Completion::waiting_on(handle);
        }

        let errors = Arc::clone(&self.errors);
        tokio::spawn(async move {
            if let Err(e) = join_fan_out(handle).await {
                errors.report(e);
            }
        });

        Completion::accepted()
    }
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRouter")
            .field("wait_mode", &self.wait_mode)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Internal Functions
// ============================================================================

/// Invokes every listener concurrently and waits for all of them.
///
/// Reports the first failure in subscription order.
async fn fan_out(listeners: Vec<Listener>, name: String, data: Value) -> Result<()> {
    let calls = listeners
        .iter()
        .map(|listener| listener(name.clone(), data.clone()));

    join_all(calls)
        .await
        .into_iter()
        .find_map(Result::err)
        .map_or(Ok(()), Err)
}

/// Awaits a fan-out task, turning a panic into a listener error.
async fn join_fan_out(handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(Error::listener(format!("listener task failed: {e}"))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::{Notify, mpsc};

    use crate::identifiers::SessionId;
    use crate::session::registry::listener;

    fn router(
        wait_mode: WaitMode,
    ) -> (
        MessageRouter,
        Arc<SessionRegistry>,
        mpsc::UnboundedReceiver<Error>,
    ) {
        let registry = Arc::new(SessionRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let router = MessageRouter::new(Arc::clone(&registry), wait_mode, Arc::new(tx));
        (router, registry, rx)
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_listener() {
        let (router, registry, _rx) = router(WaitMode::Always);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let session = SessionId::new("s1");

        let _subs: Vec<_> = (0..3)
            .map(|_| {
                let calls = Arc::clone(&calls);
                registry.subscribe(
                    &session,
                    listener(move |name, data| {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.lock().push((name, data));
                            Ok(())
                        }
                    }),
                )
            })
            .collect();

        let message = Message::new("1", "s1", "suiteStart", json!({"id": "main"}));
        router.route(&message).wait().await.expect("route");

        let calls = calls.lock();
        assert_eq!(calls.len(), 3);
        assert!(
            calls
                .iter()
                .all(|(name, data)| name == "suiteStart" && *data == json!({"id": "main"}))
        );
    }

    #[tokio::test]
    async fn test_unknown_session_is_created_and_accepted() {
        let (router, registry, _rx) = router(WaitMode::Always);
        let completion = router.route(&Message::new("1", "fresh", "testStart", json!({})));

        assert!(!completion.is_pending());
        completion.wait().await.expect("accepted");
        assert_eq!(registry.session_count(), 1);
    }

    #[tokio::test]
    async fn test_blocking_mode_propagates_failure() {
        let (router, registry, mut rx) = router(WaitMode::Always);
        let _ok = registry.subscribe(&"s1".into(), listener(|_, _| async { Ok(()) }));
        let _bad = registry.subscribe(
            &"s1".into(),
            listener(|_, _| async { Err(Error::listener("reporter failed")) }),
        );

        let result = router
            .route(&Message::new("1", "s1", "testEnd", json!({})))
            .wait()
            .await;

        assert!(result.expect_err("should fail").is_listener_error());
        assert!(rx.try_recv().is_err(), "blocking failures are not reported");
    }

    #[tokio::test]
    async fn test_background_failure_goes_to_error_sink() {
        let (router, registry, mut rx) = router(WaitMode::Never);
        let _bad = registry.subscribe(
            &"s1".into(),
            listener(|_, _| async { Err(Error::listener("reporter failed")) }),
        );

        let completion = router.route(&Message::new("1", "s1", "testEnd", json!({})));
        assert!(!completion.is_pending());
        completion.wait().await.expect("accepted immediately");

        let reported = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("error reported in time")
            .expect("channel open");
        assert!(reported.is_listener_error());
    }

    #[tokio::test]
    async fn test_fail_mode_waits_only_on_failure() {
        let (router, registry, _rx) = router(WaitMode::OnFailure);
        let gate = Arc::new(Notify::new());
        let finished = Arc::new(AtomicUsize::new(0));

        let _slow = {
            let gate = Arc::clone(&gate);
            let finished = Arc::clone(&finished);
            registry.subscribe(
                &"s1".into(),
                listener(move |_, _| {
                    let gate = Arc::clone(&gate);
                    let finished = Arc::clone(&finished);
                    async move {
                        gate.notified().await;
                        finished.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
        };

        // Passing test: acknowledged while the listener is still blocked.
        let passing = router.route(&Message::new("1", "s1", "testEnd", json!({})));
        assert!(!passing.is_pending());
        passing.wait().await.expect("accepted");
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        // Failing test: completion waits for the listener.
        let failing = router.route(&Message::new("2", "s1", "testEnd", json!({"error": "x"})));
        assert!(failing.is_pending());

        let waiter = tokio::spawn(failing.wait());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        gate.notify_waiters();
        waiter.await.expect("join").expect("route");
        assert!(finished.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_listeners_run_concurrently() {
        let (router, registry, _rx) = router(WaitMode::Always);
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let _subs: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                registry.subscribe(
                    &"s1".into(),
                    listener(move |_, _| {
                        let barrier = Arc::clone(&barrier);
                        async move {
                            barrier.wait().await;
                            Ok(())
                        }
                    }),
                )
            })
            .collect();

        // Sequential invocation would deadlock on the barrier.
        tokio::time::timeout(
            Duration::from_secs(2),
            router.route(&Message::new("1", "s1", "testStart", json!({}))).wait(),
        )
        .await
        .expect("listeners should not run sequentially")
        .expect("route");
    }

    #[tokio::test]
    async fn test_released_listener_not_invoked() {
        let (router, registry, _rx) = router(WaitMode::Always);
        let count = Arc::new(AtomicUsize::new(0));

        let sub = {
            let count = Arc::clone(&count);
            registry.subscribe(
                &"s1".into(),
                listener(move |_, _| {
                    let count = Arc::clone(&count);
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
        };

        router
            .route(&Message::new("1", "s1", "testStart", json!({})))
            .wait()
            .await
            .expect("route");
        sub.release();
        sub.release();
        router
            .route(&Message::new("2", "s1", "testStart", json!({})))
            .wait()
            .await
            .expect("route");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
