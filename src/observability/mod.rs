//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Listener pool, dispatcher, downstream client produce:
//!     → logging.rs (structured log events, per-request spans)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID (x-request-id) is attached to every per-request span
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
