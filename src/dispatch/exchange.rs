//! Captured-call tokens.
//!
//! An [`ExchangeToken`] is the only way to complete the transport request of
//! a captured call. It is consumed by [`ExchangeToken::resolve`], so a call is
//! answered at most once. Dropping an unresolved token aborts the call: the
//! listener side sees a closed channel and answers with the abort reply.

use std::fmt;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::dispatch::ResponseWriteError;
use crate::http::TransportResponse;

/// Dispatcher phases, reported for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Not armed.
    Idle,
    /// Armed by a waiting receive; inbound calls are tested.
    Matching,
    /// A call matched and was normalized.
    Captured,
    /// Mock: waiting for the engine's response.
    Responding,
    /// Proxy: building the downstream call.
    Forwarding,
    /// Proxy: downstream call in flight.
    AwaitingDownstream,
    /// Proxy: writing the downstream result back.
    Relaying,
    /// The last exchange is finished.
    Completed,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeState::Idle => "idle",
            ExchangeState::Matching => "matching",
            ExchangeState::Captured => "captured",
            ExchangeState::Responding => "responding",
            ExchangeState::Forwarding => "forwarding",
            ExchangeState::AwaitingDownstream => "awaiting-downstream",
            ExchangeState::Relaying => "relaying",
            ExchangeState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Write side of a captured call.
#[derive(Debug)]
pub struct ExchangeToken {
    id: Uuid,
    reply: oneshot::Sender<TransportResponse>,
}

/// Listener side of a captured call.
pub type ExchangeReply = oneshot::Receiver<TransportResponse>;

impl ExchangeToken {
    pub fn new() -> (Self, ExchangeReply) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                id: Uuid::new_v4(),
                reply,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The caller is gone (client disconnect or listener teardown).
    pub fn is_closed(&self) -> bool {
        self.reply.is_closed()
    }

    /// Complete the call. Consumes the token.
    pub fn resolve(self, response: TransportResponse) -> Result<(), ResponseWriteError> {
        self.reply
            .send(response)
            .map_err(|_| ResponseWriteError::ConnectionClosed)
    }
}
