//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Pooled port listener (axum-server)
//!     → request.rs (request ID, trace span)
//!     → net::listener dispatch (binding chain)
//!     → response.rs (engine response → HTTP or SOAP encoding)
//!     → Send to client
//! ```

pub mod request;
pub mod response;

pub use request::{request_id, with_request_layers, X_REQUEST_ID};
pub use response::{Response, TransportResponse};
