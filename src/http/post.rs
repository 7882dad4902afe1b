//! POST message intake.
//!
//! The body is one JSON message or an array of them. Every message is routed
//! concurrently; the response is 204 if all routes succeed and 500 if the
//! body does not parse or any route fails. Both have empty bodies.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::future::join_all;
use hyper::{Method, StatusCode};
use tracing::{trace, warn};

use crate::protocol::parse_batch;
use crate::session::{Completion, MessageRouter};

use super::{Handler, Outcome, RelayRequest, empty_response};

// ============================================================================
// PostMessages
// ============================================================================

/// Routes message batches posted by remote environments.
#[derive(Debug, Clone)]
pub struct PostMessages {
    router: MessageRouter,
}

impl PostMessages {
    /// Creates the handler.
    #[must_use]
    pub fn new(router: MessageRouter) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Handler for PostMessages {
    async fn handle(&self, request: &RelayRequest) -> Outcome {
        if request.method != Method::POST {
            return Outcome::Next;
        }

        let messages = match parse_batch(&request.body) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, path = %request.path, "Malformed HTTP message batch");
                return Outcome::Fail(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        trace!(count = messages.len(), "Received HTTP messages");

        let completions: Vec<Completion> = messages
            .iter()
            .map(|message| self.router.route(message))
            .collect();

        let failed = join_all(completions.into_iter().map(Completion::wait))
            .await
            .into_iter()
            .find_map(Result::err);

        match failed {
            None => Outcome::Respond(empty_response(StatusCode::NO_CONTENT)),
            Some(e) => {
                warn!(error = %e, "HTTP message routing failed");
                Outcome::Fail(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
