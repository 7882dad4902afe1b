//! HTTP accept loop.
//!
//! Each connection is served by hyper's HTTP/1 connection driver. Requests
//! are read in full and passed through the [`HandlerChain`]; an abandoned
//! request fails the service call, so hyper closes the socket without
//! writing a response.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::http::{HandlerChain, HttpResponse, RelayRequest};

use super::{ACCEPT_BACKOFF, ConnectionTracker};

// ============================================================================
// Accept Loop
// ============================================================================

/// Accepts HTTP connections until the task is aborted.
pub async fn serve_http(
    listener: TcpListener,
    chain: Arc<HandlerChain>,
    tracker: Arc<ConnectionTracker>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "HTTP accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        trace!(%addr, "HTTP connection accepted");
        tracker.spawn(serve_connection(stream, addr, Arc::clone(&chain)));
    }
}

/// Serves requests on one connection until it closes.
async fn serve_connection(stream: TcpStream, addr: SocketAddr, chain: Arc<HandlerChain>) {
    let service = service_fn(move |request| {
        let chain = Arc::clone(&chain);
        async move { handle_request(&chain, request).await }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(%addr, error = %e, "HTTP connection ended with error");
    }
}

/// Reads the request body and runs the chain.
async fn handle_request(chain: &HandlerChain, request: Request<Incoming>) -> Result<HttpResponse> {
    let (parts, body) = request.into_parts();
    let body = body.collect().await?.to_bytes();

    let path = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path(), |pq| pq.as_str());

    let request = RelayRequest::new(parts.method, path, body);
    chain.dispatch(&request).await.ok_or(Error::Stopped)
}

// ============================================================================
// Tests
// ============================================================================
