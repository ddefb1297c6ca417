//! Mock/proxy dispatch.
//!
//! # Data Flow
//! ```text
//! receive_message()
//!     → Idle → Matching (armed)
//!
//! Inbound call offered by the registry:
//!     → Matching: decode, test predicates (HTTP-bind)
//!         no match / not armed → Declined (next binding)
//!     → Captured: onOriginalMessageReceived
//!     → Mock:  Responding → send_response() → Completed
//!     → Proxy: Forwarding → AwaitingDownstream → Relaying → Completed
//!              (onMessageReceived with the downstream reply)
//! ```
//!
//! # Design Decisions
//! - One exchange per subscription at a time; arming is explicit
//! - The transport future holds the only receiver for the reply, the
//!   dispatcher holds the only sender ([`ExchangeToken`])
//! - No internal timeout in mock mode; the proxy leg carries its own

pub mod dispatcher;
pub mod exchange;

use thiserror::Error;

pub use dispatcher::Dispatcher;
pub use exchange::{ExchangeReply, ExchangeState, ExchangeToken};

/// Failure to complete an exchange.
#[derive(Debug, Error)]
pub enum ResponseWriteError {
    #[error("no exchange is pending")]
    NoPendingExchange,

    #[error("the original connection is closed")]
    ConnectionClosed,

    #[error("response cannot be written: invalid {0}")]
    InvalidResponse(String),
}
