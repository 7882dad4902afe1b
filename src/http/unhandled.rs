//! Terminal 501 handler.

use async_trait::async_trait;
use hyper::StatusCode;

use super::{Handler, Outcome, RelayRequest};

/// Answers every request with 501 Not Implemented.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unhandled;

#[async_trait]
impl Handler for Unhandled {
    async fn handle(&self, _request: &RelayRequest) -> Outcome {
        Outcome::Fail(StatusCode::NOT_IMPLEMENTED)
    }
}
