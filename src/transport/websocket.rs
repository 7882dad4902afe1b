//! WebSocket accept loop and ack writer.
//!
//! Each text or binary frame carries one JSON [`Message`]. Frames are routed
//! in the order received; the ack `{ "id": ... }` is written once the route
//! settles, except for `runEnd`.
//!
//! | Route result | Ack | Error sink |
//! |--------------|-----|------------|
//! | accepted | written inline | - |
//! | waited, ok | written from the ack queue | - |
//! | waited, failed | written from the ack queue | listener error |
//! | unparseable frame | none | JSON error |

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{from_slice, to_string};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, trace, warn};

use crate::error::{Error, ErrorSink};
use crate::protocol::{Ack, Message};
use crate::session::MessageRouter;

use super::{ACCEPT_BACKOFF, ConnectionTracker};

// ============================================================================
// Types
// ============================================================================

type FrameSink = SplitSink<WebSocketStream<TcpStream>, Frame>;

// ============================================================================
// Accept Loop
// ============================================================================

/// Accepts WebSocket connections until the task is aborted.
pub async fn serve_websocket(
    listener: TcpListener,
    router: MessageRouter,
    errors: Arc<dyn ErrorSink>,
    tracker: Arc<ConnectionTracker>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "WebSocket accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        tracker.spawn(serve_connection(
            stream,
            addr,
            router.clone(),
            Arc::clone(&errors),
        ));
    }
}

// ============================================================================
// Connection Loop
// ============================================================================

/// Reads frames and writes acks until the client goes away.
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    router: MessageRouter,
    errors: Arc<dyn ErrorSink>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            errors.report(Error::WebSocket(e));
            return;
        }
    };

    debug!(%addr, "WebSocket connection opened");

    let (mut ws_write, mut ws_read) = ws_stream.split();
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<Ack>();

    loop {
        tokio::select! {
            frame = ws_read.next() => {
                let payload = match frame {
                    Some(Ok(Frame::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(Frame::Binary(data))) => data.to_vec(),

                    Some(Ok(Frame::Close(_))) | None => break,

                    Some(Err(e)) => {
                        errors.report(Error::WebSocket(e));
                        break;
                    }

                    // Ping/Pong are answered by tungstenite
                    Some(Ok(_)) => continue,
                };

                if let Some(ack) = on_frame(&payload, &router, &errors, &ack_tx) {
                    send_ack(&mut ws_write, ack, errors.as_ref()).await;
                }
            }

            Some(ack) = ack_rx.recv() => {
                send_ack(&mut ws_write, ack, errors.as_ref()).await;
            }
        }
    }

    debug!(%addr, "WebSocket connection closed");
}

/// Routes one frame.
///
/// Returns the ack to write now, if the route was accepted without waiting.
/// Waited routes queue their ack on `ack_tx` once they settle.
fn on_frame(
    payload: &[u8],
    router: &MessageRouter,
    errors: &Arc<dyn ErrorSink>,
    ack_tx: &mpsc::UnboundedSender<Ack>,
) -> Option<Ack> {
    let message: Message = match from_slice(payload) {
        Ok(message) => message,
        Err(e) => {
            errors.report(Error::Json(e));
            return None;
        }
    };

    let ack = (!message.is_run_end()).then(|| Ack::for_message(&message));
    let completion = router.route(&message);

    if !completion.is_pending() {
        return ack;
    }

    let errors = Arc::clone(errors);
    let ack_tx = ack_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = completion.wait().await {
            errors.report(e);
        }
        if let Some(ack) = ack {
            // Receiver is gone once the connection closed.
            let _ = ack_tx.send(ack);
        }
    });

    None
}

/// Writes an ack frame, reporting failures.
async fn send_ack(ws_write: &mut FrameSink, ack: Ack, errors: &dyn ErrorSink) {
    let json = match to_string(&ack) {
        Ok(json) => json,
        Err(e) => {
            errors.report(Error::ack_failed(ack.id, e.to_string()));
            return;
        }
    };

    trace!(id = %ack.id, "Sending ack");
    if let Err(e) = ws_write.send(Frame::Text(json.into())).await {
        errors.report(Error::ack_failed(ack.id, e.to_string()));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use serde_json::{Value, json};
    use tokio::sync::Notify;
    use tokio_tungstenite::{MaybeTlsStream, connect_async};

    use crate::identifiers::MessageId;
    use crate::session::{SessionRegistry, WaitMode, listener};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    struct Fixture {
        addr: SocketAddr,
        registry: Arc<SessionRegistry>,
        errors: mpsc::UnboundedReceiver<Error>,
        task: tokio::task::JoinHandle<()>,
    }

    async fn start(wait_mode: WaitMode) -> Fixture {
        let listener = super::super::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let registry = Arc::new(SessionRegistry::new());
        let (tx, errors) = mpsc::unbounded_channel();
        let sink: Arc<dyn ErrorSink> = Arc::new(tx);
        let router = MessageRouter::new(Arc::clone(&registry), wait_mode, Arc::clone(&sink));
        let task = tokio::spawn(serve_websocket(
            listener,
            router,
            sink,
            ConnectionTracker::new("ws"),
        ));

        Fixture {
            addr,
            registry,
            errors,
            task,
        }
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (client, _) = connect_async(format!("ws://{addr}"))
            .await
            .expect("connect");
        client
    }

    async fn send(client: &mut Client, message: Value) {
        client
            .send(Frame::Text(message.to_string().into()))
            .await
            .expect("send");
    }

    async fn next_ack(client: &mut Client) -> Option<Ack> {
        match tokio::time::timeout(Duration::from_millis(300), client.next()).await {
            Ok(Some(Ok(Frame::Text(text)))) => Some(from_slice(text.as_bytes()).expect("ack json")),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_message_is_acked() {
        let f = start(WaitMode::Never).await;
        let mut client = connect(f.addr).await;

        send(
            &mut client,
            json!({"id": "7", "sessionId": "s1", "name": "testStart", "data": {}}),
        )
        .await;

        let ack = next_ack(&mut client).await.expect("ack");
        assert_eq!(ack.id, MessageId::new("7"));
        f.task.abort();
    }

    #[tokio::test]
    async fn test_run_end_is_never_acked() {
        let f = start(WaitMode::Always).await;
        let _sub = f
            .registry
            .subscribe(&"s1".into(), listener(|_, _| async { Ok(()) }));
        let mut client = connect(f.addr).await;

        send(
            &mut client,
            json!({"id": "9", "sessionId": "s1", "name": "runEnd", "data": {}}),
        )
        .await;
        send(
            &mut client,
            json!({"id": "10", "sessionId": "s1", "name": "testStart", "data": {}}),
        )
        .await;

        let ack = next_ack(&mut client).await.expect("ack");
        assert_eq!(ack.id, MessageId::new("10"));
        assert!(next_ack(&mut client).await.is_none());
        f.task.abort();
    }

    #[tokio::test]
    async fn test_malformed_frame_reports_and_keeps_connection() {
        let mut f = start(WaitMode::Never).await;
        let mut client = connect(f.addr).await;

        client
            .send(Frame::Text("{not json".into()))
            .await
            .expect("send");
        send(
            &mut client,
            json!({"id": "2", "sessionId": "s1", "name": "testStart", "data": {}}),
        )
        .await;

        let ack = next_ack(&mut client).await.expect("connection still open");
        assert_eq!(ack.id, MessageId::new("2"));
        let reported = f.errors.recv().await.expect("error reported");
        assert!(reported.is_protocol_error());
        f.task.abort();
    }

    #[tokio::test]
    async fn test_blocking_ack_waits_for_listener() {
        let mut f = start(WaitMode::Always).await;
        let gate = Arc::new(Notify::new());
        let _sub = {
            let gate = Arc::clone(&gate);
            f.registry.subscribe(
                &"s1".into(),
                listener(move |_, _| {
                    let gate = Arc::clone(&gate);
                    async move {
                        gate.notified().await;
                        Err(Error::listener("reporter failed"))
                    }
                }),
            )
        };
        let mut client = connect(f.addr).await;

        send(
            &mut client,
            json!({"id": "3", "sessionId": "s1", "name": "testEnd", "data": {}}),
        )
        .await;
        assert!(next_ack(&mut client).await.is_none(), "ack before listener finished");

        gate.notify_one();
        let ack = next_ack(&mut client).await.expect("ack after failure");
        assert_eq!(ack.id, MessageId::new("3"));

        let reported = f.errors.recv().await.expect("error reported");
        assert!(reported.is_listener_error());
        f.task.abort();
    }
}
