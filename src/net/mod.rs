//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! subscribe()
//!     → pool.rs acquire(port, credentials) (ref-counted, one listener per port)
//!     → tls.rs (optional rustls config)
//!     → listener.rs add_binding(method, path, resolver)
//!
//! Inbound call
//!     → listener.rs dispatch (buffer body, walk bindings in order)
//!     → inbound.rs InboundRequest offered to registry handlers
//!     → 404 at chain end
//!
//! unsubscribe()
//!     → listener.rs remove_bindings(owner)
//!     → pool.rs release(port) (last release shuts the port down)
//! ```
//!
//! # Design Decisions
//! - Bindings are evaluated in registration order, first acceptor wins
//! - Secure and plain subscriptions never share a port

pub mod inbound;
pub mod listener;
pub mod pool;
pub mod tls;

pub use inbound::InboundRequest;
pub use listener::{Binding, PortListener, RouteResolver};
pub use pool::{ListenerLease, ListenerPool, TransportError};
