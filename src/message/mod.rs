//! Canonical messages.
//!
//! # Data Flow
//! ```text
//! Inbound call (raw bytes, HeaderMap)
//!     → normalize.rs (body kind: JSON default, XML on request)
//!     → xml.rs (envelope → value tree, prefixes stripped)
//!     → Message { body, headers } (owned snapshot)
//! ```
//!
//! # Design Decisions
//! - A Message owns its data; nothing borrows from the transport buffer
//! - Parse failures are errors, never an empty body
//! - Header names are lowercase (as delivered by hyper)

pub mod normalize;
pub mod xml;

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use normalize::{headers_from_map, normalize};

/// Immutable snapshot of a captured call or a downstream reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    body: Value,
    headers: BTreeMap<String, String>,
}

impl Message {
    pub fn new(body: Value, headers: BTreeMap<String, String>) -> Self {
        Self { body, headers }
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn into_parts(self) -> (Value, BTreeMap<String, String>) {
        (self.body, self.headers)
    }
}

/// How an HTTP-bind body is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyKind {
    #[default]
    Json,
    Xml,
}

impl FromStr for BodyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(BodyKind::Json),
            "xml" => Ok(BodyKind::Xml),
            other => Err(format!("unknown body type '{}'", other)),
        }
    }
}

/// A body that does not decode as its declared kind.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("body is not valid UTF-8")]
    Utf8,

    #[error("invalid XML body: {0}")]
    Xml(String),

    #[error("invalid SOAP envelope: {0}")]
    Envelope(String),
}
