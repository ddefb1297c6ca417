//! SOAP envelope handling.
//!
//! # Data Flow
//! ```text
//! Inbound POST {path}
//!     → envelope.rs parse_envelope (operation, args, SOAP headers)
//!     → binding resolves (service, port, operation)
//!
//! Proxy leg:
//!     request_envelope → downstream → parse_reply (result | fault)
//!
//! Writing back:
//!     response_envelope / fault_envelope
//! ```

pub mod envelope;

pub use envelope::{
    fault_envelope, parse_envelope, parse_reply, request_envelope, response_envelope, SoapEnvelope,
    SoapFault, SOAP_ENV_NS,
};
