//! Service handler registry.
//!
//! # Data Flow
//! ```text
//! subscribe() (HTTP-bind)          receive_message() (SOAP)
//!     → register(Name, handler)        → register(Operation, cycle handler)
//!                                      → deregister when the cycle ends
//!
//! Inbound call on a port binding:
//!     → binding resolves RouteKey
//!     → lookup(key) → handler | absent ("not for me")
//!     → handler.offer(request) → Accepted | Declined
//! ```
//!
//! # Design Decisions
//! - One Registry per bridge instance, no process-wide statics
//! - A key belongs to exactly one live subscription; re-registration by the
//!   same owner replaces the entry (last registration wins)
//! - Lookups clone the handler out, no map guard is held across an await

pub mod route_key;
pub mod table;

use axum::body::Body;
use axum::http::Response;
use futures_util::future::BoxFuture;

use crate::net::inbound::InboundRequest;

pub use route_key::{OperationKey, RouteKey, SubscriptionId};
pub use table::{Registry, RegistryError};

/// Outcome of offering an inbound call to a handler.
pub enum Offer {
    /// The handler owns the call; the future yields the transport response.
    Accepted(BoxFuture<'static, Response<Body>>),
    /// Not for this handler; the request goes to the next candidate.
    Declined(InboundRequest),
}

impl std::fmt::Debug for Offer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Offer::Accepted(_) => f.write_str("Accepted"),
            Offer::Declined(req) => f.debug_tuple("Declined").field(&req.uri).finish(),
        }
    }
}

/// A registered handler for one route key.
pub trait ServiceHandler: Send + Sync {
    /// Inspect the call and either take it or hand it back.
    fn offer(&self, request: InboundRequest) -> Offer;
}
