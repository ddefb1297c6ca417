//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Bridge (bridge.rs):
//!     ListenerConfig → Registry + ListenerPool + downstream client + observer
//!
//! Subscription (subscription.rs):
//!     subscribe → receive_message ⇄ send_response → unsubscribe
//!
//! Standalone runner (startup.rs):
//!     validated settings → start_all (rollback on failure) → publish_all
//!         → one loop per subscription
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGINT/SIGTERM → stop_all → Shutdown::trigger → loops exit
//! ```
//!
//! # Design Decisions
//! - Subscriptions start in file order and stop in reverse order
//! - Unsubscribe aborts pending exchanges before releasing the listener

pub mod bridge;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod subscription;

pub use bridge::Bridge;
pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{publish_all, spawn_runner, start_all, stop_all};
pub use subscription::Subscription;
