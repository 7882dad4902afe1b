//! End-to-end tests over real sockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, ErrorSink};
use crate::instrument::Instrumenter;
use crate::protocol::Ack;
use crate::session::{WaitMode, listener};

use super::{Server, ServerConfig};

// ============================================================================
// Fixtures
// ============================================================================

/// Instruments everything under `lib/`, counting calls.
#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
}

impl Instrumenter for Counting {
    fn should_instrument(&self, path: &Path) -> bool {
        path.components().any(|c| c.as_os_str() == "lib")
    }

    fn instrument(&self, source: &str, _path: &Path) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        format!("/*cov*/{source}")
    }
}

struct Harness {
    dir: tempfile::TempDir,
    server: Server,
    counting: Arc<Counting>,
    errors: mpsc::UnboundedReceiver<Error>,
}

impl Harness {
    fn http_addr(&self) -> SocketAddr {
        let port = self.server.http_port().expect("running");
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.server.ws_port().expect("running"))
    }
}

/// Logs to the test writer; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn harness(wait_mode: WaitMode) -> Harness {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("lib")).expect("mkdir");
    std::fs::write(dir.path().join("lib/app.js"), "var a = 1;").expect("write");
    std::fs::write(dir.path().join("index.html"), "<html></html>").expect("write");

    let counting = Arc::new(Counting::default());
    let (tx, errors) = mpsc::unbounded_channel();
    let config = ServerConfig::new()
        .with_base_path(dir.path())
        .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_port(0)
        .with_wait_mode(wait_mode);

    let server = Server::builder()
        .config(config)
        .instrumenter(Arc::clone(&counting) as Arc<dyn Instrumenter>)
        .error_sink(Arc::new(tx) as Arc<dyn ErrorSink>)
        .build()
        .expect("build");
    server.start().await.expect("start");

    Harness {
        dir,
        server,
        counting,
        errors,
    }
}

/// Sends one request with `Connection: close` and returns the raw response.
async fn http(addr: SocketAddr, method: &str, path: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.expect("write");

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.expect("read");
    String::from_utf8_lossy(&out).into_owned()
}

fn status_of(response: &str) -> u16 {
    response
        .split(' ')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status line")
}

fn body_of(response: &str) -> &str {
    response.split_once("\r\n\r\n").map_or("", |(_, body)| body)
}

// ============================================================================
// File Serving
// ============================================================================

#[tokio::test]
async fn test_instrumented_file_is_cached_across_requests() {
    let h = harness(WaitMode::Never).await;

    let first = http(h.http_addr(), "GET", "/lib/app.js", "").await;
    let second = http(h.http_addr(), "GET", "/lib/app.js?bust=1", "").await;

    assert_eq!(status_of(&first), 200);
    assert_eq!(body_of(&first), "/*cov*/var a = 1;");
    assert_eq!(body_of(&second), body_of(&first));
    assert_eq!(h.counting.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.server.cached_files(), 1);

    h.server.stop().await;
}

#[tokio::test]
async fn test_directory_request_serves_index() {
    let h = harness(WaitMode::Never).await;

    let response = http(h.http_addr(), "GET", "/", "").await;

    assert_eq!(status_of(&response), 200);
    assert_eq!(body_of(&response), "<html></html>");
    h.server.stop().await;
}

#[tokio::test]
async fn test_missing_file_and_traversal() {
    let h = harness(WaitMode::Never).await;

    let missing = http(h.http_addr(), "GET", "/nope.js", "").await;
    let escape = http(h.http_addr(), "GET", "/%2e%2e/secret", "").await;

    assert_eq!(status_of(&missing), 404);
    assert_eq!(body_of(&missing), "");
    assert_eq!(status_of(&escape), 403);
    h.server.stop().await;
}

#[tokio::test]
async fn test_assets_prefix_bypasses_instrumentation_without_mount() {
    let h = harness(WaitMode::Never).await;
    let reserved = h.dir.path().join("__intern/lib");
    std::fs::create_dir_all(&reserved).expect("mkdir");
    std::fs::write(reserved.join("client.js"), "var c;").expect("write");

    let response = http(h.http_addr(), "GET", "/__intern/lib/client.js", "").await;

    assert_eq!(status_of(&response), 404);
    assert_eq!(h.counting.calls.load(Ordering::SeqCst), 0);
    h.server.stop().await;
}

#[tokio::test]
async fn test_assets_mount_serves_uninstrumented() {
    let dir = tempfile::tempdir().expect("tempdir");
    let assets = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(assets.path().join("lib")).expect("mkdir");
    std::fs::write(assets.path().join("lib/client.js"), "var c;").expect("write");

    let counting = Arc::new(Counting::default());
    let config = ServerConfig::new()
        .with_base_path(dir.path())
        .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_port(0)
        .with_assets(assets.path(), "/__intern");
    let server = Server::builder()
        .config(config)
        .instrumenter(Arc::clone(&counting) as Arc<dyn Instrumenter>)
        .build()
        .expect("build");
    server.start().await.expect("start");
    let addr = SocketAddr::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        server.http_port().expect("running"),
    );

    let response = http(addr, "GET", "/__intern/lib/client.js", "").await;

    assert_eq!(status_of(&response), 200);
    assert_eq!(body_of(&response), "var c;");
    assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_unhandled_method_is_501() {
    let h = harness(WaitMode::Never).await;

    let response = http(h.http_addr(), "PUT", "/lib/app.js", "x").await;

    assert_eq!(status_of(&response), 501);
    h.server.stop().await;
}

// ============================================================================
// HTTP Messages
// ============================================================================

#[tokio::test]
async fn test_post_batch_reaches_subscriber() {
    let h = harness(WaitMode::Always).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let seen = Arc::clone(&seen);
        h.server.subscribe(
            "s1",
            listener(move |name, _| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(name);
                    Ok(())
                }
            }),
        )
    };

    // Elements may be objects or double-encoded strings.
    let encoded =
        json!({"id": "2", "sessionId": "s1", "name": "testStart", "data": {}}).to_string();
    let batch = json!([
        {"id": "1", "sessionId": "s1", "name": "suiteStart", "data": {}},
        encoded,
    ])
    .to_string();
    let response = http(h.http_addr(), "POST", "/", &batch).await;

    assert_eq!(status_of(&response), 204);
    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, ["suiteStart", "testStart"]);
    h.server.stop().await;
}

#[tokio::test]
async fn test_post_failure_modes_are_500() {
    let h = harness(WaitMode::Always).await;
    let _sub = h.server.subscribe(
        "s1",
        listener(|_, _| async { Err(Error::listener("reporter failed")) }),
    );

    let malformed = http(h.http_addr(), "POST", "/", "{oops").await;
    let failing = http(
        h.http_addr(),
        "POST",
        "/",
        &json!({"id": "1", "sessionId": "s1", "name": "testEnd", "data": {}}).to_string(),
    )
    .await;

    assert_eq!(status_of(&malformed), 500);
    assert_eq!(status_of(&failing), 500);
    h.server.stop().await;
}

// ============================================================================
// WebSocket Messages
// ============================================================================

#[tokio::test]
async fn test_websocket_ack_and_run_end() {
    let h = harness(WaitMode::Never).await;
    let (mut client, _) = connect_async(h.ws_url()).await.expect("connect");

    for (id, name) in [("1", "runEnd"), ("2", "testStart")] {
        let message = json!({"id": id, "sessionId": "s1", "name": name, "data": {}});
        client
            .send(Frame::Text(message.to_string().into()))
            .await
            .expect("send");
    }

    let Some(Ok(Frame::Text(text))) = client.next().await else {
        panic!("expected ack frame");
    };
    let ack: Ack = serde_json::from_str(text.as_str()).expect("ack json");
    assert_eq!(ack.id.as_str(), "2");

    h.server.stop().await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_stop_destroys_live_connections() {
    let h = harness(WaitMode::Never).await;
    let (mut client, _) = connect_async(h.ws_url()).await.expect("connect");

    let mut idle = TcpStream::connect(h.http_addr()).await.expect("connect");
    idle.write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .expect("write");
    let mut buf = [0u8; 512];
    assert!(idle.read(&mut buf).await.expect("read") > 0);
    assert_eq!(h.server.live_connections(), 2);

    tokio::time::timeout(Duration::from_secs(2), h.server.stop())
        .await
        .expect("stop should not wait on idle sockets");

    assert!(h.server.stopped());
    assert_eq!(h.server.live_connections(), 0);

    let closed = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("client should observe close");
    assert!(!matches!(closed, Some(Ok(Frame::Text(_)))));
}

#[tokio::test]
async fn test_dropping_running_server_closes_connections() {
    let h = harness(WaitMode::Never).await;

    let mut idle = TcpStream::connect(h.http_addr()).await.expect("connect");
    idle.write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .expect("write");
    let mut buf = [0u8; 512];
    assert!(idle.read(&mut buf).await.expect("read") > 0);

    let Harness { dir, server, .. } = h;
    drop(server);

    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), idle.read_to_end(&mut rest))
        .await
        .expect("keep-alive socket should be closed")
        .ok();
    drop(dir);
}

#[tokio::test]
async fn test_stop_twice_and_restart() {
    let h = harness(WaitMode::Never).await;

    h.server.stop().await;
    h.server.stop().await;
    assert!(h.server.stopped());
    assert_eq!(h.server.http_port(), None);

    h.server.start().await.expect("restart");
    assert!(!h.server.stopped());
    assert!(matches!(h.server.start().await, Err(Error::AlreadyRunning)));

    let response = http(h.http_addr(), "GET", "/lib/app.js", "").await;
    assert_eq!(status_of(&response), 200);
    h.server.stop().await;
}

#[tokio::test]
async fn test_stop_clears_sessions_and_cache() {
    let h = harness(WaitMode::Always).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let _sub = {
        let calls = Arc::clone(&calls);
        h.server.subscribe(
            "s1",
            listener(move |_, _| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
    };
    let _ = http(h.http_addr(), "GET", "/lib/app.js", "").await;
    assert_eq!(h.server.cached_files(), 1);

    h.server.stop().await;
    assert_eq!(h.server.cached_files(), 0);

    let message = crate::protocol::Message::new("1", "s1", "testStart", Value::Null);
    h.server.route(&message).wait().await.expect("route");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = taken.local_addr().expect("addr").port();

    let server = Server::builder()
        .config(
            ServerConfig::new()
                .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .with_port(port)
                .with_socket_port(0),
        )
        .build()
        .expect("build");

    let err = server.start().await.expect_err("port is taken");
    assert!(matches!(err, Error::Bind { .. }));
    assert!(server.stopped());
    assert_eq!(server.http_port(), None);
}

#[tokio::test]
async fn test_background_listener_failure_reaches_error_sink() {
    let mut h = harness(WaitMode::Never).await;
    let _sub = h.server.subscribe(
        "s1",
        listener(|_, _| async { Err(Error::listener("reporter failed")) }),
    );

    let response = http(
        h.http_addr(),
        "POST",
        "/",
        &json!({"id": "1", "sessionId": "s1", "name": "testEnd", "data": {}}).to_string(),
    )
    .await;
    assert_eq!(status_of(&response), 204);

    let reported = tokio::time::timeout(Duration::from_secs(2), h.errors.recv())
        .await
        .expect("reported in time")
        .expect("channel open");
    assert!(reported.is_listener_error());
    h.server.stop().await;
}
