//! Outbound calls: the proxy leg and one-shot publications.
//!
//! # Data Flow
//! ```text
//! Captured Message (proxy mode) | PublicationSettings (publisher.rs)
//!     → DownstreamCall { endpoint, operation, payload, headers, timeout, security }
//!     → client.rs (hyper-util legacy client, tokio timeout)
//!         Endpoint: POST payload as JSON or XML
//!         Soap:     POST request envelope, SOAPAction header,
//!                   WS-Security block in the SOAP header
//!     → DownstreamReply { status, headers, body, raw }
//!     → relayed to the original caller, or returned to the publisher
//! ```
//!
//! # Design Decisions
//! - One trait seam (`Downstream`) so the dispatcher never sees hyper
//! - Timeouts are distinct errors, never retried
//! - HTTP status >= 400 and SOAP faults are errors

pub mod client;
pub mod publisher;
pub mod security;

use std::collections::BTreeMap;
use std::time::Duration;

use axum::body::Bytes;
use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::message::{BodyKind, ParseError};
use crate::registry::OperationKey;
use crate::soap::SoapFault;

pub use client::HyperDownstream;
pub use publisher::Publisher;
pub use security::ClientSecurity;

/// Applied when a subscription does not set `timeout_ms`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// What the downstream call addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Flat HTTP endpoint, body encoded per kind.
    Endpoint { body_kind: BodyKind },
    /// SOAP operation, optionally namespace-qualified.
    Soap {
        key: OperationKey,
        namespace: Option<String>,
    },
}

/// One outbound proxy request.
#[derive(Debug, Clone)]
pub struct DownstreamCall {
    pub endpoint: Url,
    pub operation: Operation,
    pub payload: Value,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    pub security: Option<ClientSecurity>,
}

/// A successful downstream response.
#[derive(Debug, Clone)]
pub struct DownstreamReply {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Decoded result (SOAP: content of the response element).
    pub body: Value,
    /// Undecoded response body.
    pub raw: Bytes,
}

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("downstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("downstream transport error: {0}")]
    Transport(String),

    #[error("downstream answered with status {status}")]
    Status { status: u16, body: String },

    #[error("downstream fault {0}")]
    Fault(SoapFault),

    #[error("downstream response could not be decoded: {0}")]
    Decode(#[from] ParseError),

    #[error("downstream request could not be built: {0}")]
    InvalidRequest(String),
}

impl DownstreamError {
    /// Metrics label.
    pub fn outcome(&self) -> &'static str {
        match self {
            DownstreamError::Timeout(_) => "timeout",
            DownstreamError::Transport(_) => "transport",
            DownstreamError::Status { .. } => "status",
            DownstreamError::Fault(_) => "fault",
            DownstreamError::Decode(_) => "decode",
            DownstreamError::InvalidRequest(_) => "invalid",
        }
    }
}

/// Performs the proxy leg.
pub trait Downstream: Send + Sync {
    fn invoke(&self, call: DownstreamCall) -> BoxFuture<'static, Result<DownstreamReply, DownstreamError>>;
}
