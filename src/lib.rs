//! HTTP-bind and SOAP mock/proxy bridge for test orchestration.
//!
//! A [`Bridge`] owns a route [`Registry`](registry::Registry) and a pool of
//! shared port listeners. Each [`Subscription`] binds one path on one port
//! and either captures calls for the orchestration engine to answer (mock)
//! or forwards them to a downstream service and relays the reply (proxy).

pub mod config;
pub mod dispatch;
pub mod downstream;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod message;
pub mod net;
pub mod observability;
pub mod observer;
pub mod predicate;
pub mod registry;
pub mod soap;

pub use config::{BridgeConfig, Mode, Protocol, SubscriptionConfig};
pub use downstream::Publisher;
pub use error::BridgeError;
pub use http::Response;
pub use lifecycle::{Bridge, Subscription};
pub use message::Message;
pub use observer::{ChannelObserver, MessageObserver, Notification, TracingObserver};
