//! Subscription lifecycle.
//!
//! # Responsibilities
//! - `subscribe`: take a pooled listener, register routes, add the binding
//! - `receive_message` / `send_response`: one exchange at a time
//! - `unsubscribe`: abort in-flight work, drop routes, release the listener
//!
//! # Design Decisions
//! - HTTP-bind routes are registered for the whole subscription lifetime;
//!   SOAP routes only while a receive is armed (see the dispatcher)
//! - A failed subscribe leaves nothing behind: the pool reference is
//!   released before the error is returned

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::{Protocol, SubscriptionSettings};
use crate::dispatch::{Dispatcher, ExchangeState};
use crate::downstream::Downstream;
use crate::error::BridgeError;
use crate::http::Response;
use crate::message::Message;
use crate::net::{Binding, ListenerLease, ListenerPool};
use crate::observer::MessageObserver;
use crate::registry::{Registry, SubscriptionId};

/// One configured route on a shared port.
pub struct Subscription {
    settings: Arc<SubscriptionSettings>,
    owner: SubscriptionId,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<Registry>,
    pool: Arc<ListenerPool>,
    lease: Mutex<Option<ListenerLease>>,
}

impl Subscription {
    pub(crate) fn new(
        settings: Arc<SubscriptionSettings>,
        registry: Arc<Registry>,
        pool: Arc<ListenerPool>,
        downstream: Arc<dyn Downstream>,
        observer: Arc<dyn MessageObserver>,
    ) -> Self {
        let owner = SubscriptionId::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(&settings),
            owner,
            Arc::clone(&registry),
            downstream,
            observer,
        );
        Self {
            settings,
            owner,
            dispatcher,
            registry,
            pool,
            lease: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &SubscriptionSettings {
        &self.settings
    }

    pub fn state(&self) -> ExchangeState {
        self.dispatcher.state()
    }

    /// Address of the listener serving this subscription, once subscribed.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.lease.lock().await.as_ref().map(|lease| lease.local_addr)
    }

    /// Start serving. Returns the bound address of the shared listener.
    ///
    /// Subscribing twice is a no-op that returns the same address.
    pub async fn subscribe(&self) -> Result<SocketAddr, BridgeError> {
        let mut lease = self.lease.lock().await;
        if let Some(lease) = lease.as_ref() {
            return Ok(lease.local_addr);
        }

        let port = self.settings.port;
        let wsdl = match self.settings.soap.as_ref().and_then(|target| target.wsdl.as_ref()) {
            Some(path) => Some(tokio::fs::read_to_string(path).await.map_err(|e| {
                BridgeError::TransportSetup {
                    port,
                    reason: format!("cannot read WSDL {}: {}", path.display(), e),
                }
            })?),
            None => None,
        };

        let acquired = self
            .pool
            .acquire(port, self.settings.credentials.as_ref())
            .await
            .map_err(|e| BridgeError::TransportSetup {
                port: e.port(),
                reason: e.to_string(),
            })?;

        if self.settings.protocol == Protocol::HttpBind {
            if let Err(e) = self
                .registry
                .register(self.dispatcher.route_key(), self.owner, self.dispatcher.handler())
            {
                self.pool.release(acquired.port).await;
                return Err(e.into());
            }
        }

        let mut binding = Binding::for_subscription(&self.settings, self.owner);
        if let Some(document) = wsdl {
            binding = binding.with_wsdl(document);
        }
        acquired.listener.add_binding(binding);
        self.dispatcher.open();

        let local_addr = acquired.local_addr;
        tracing::info!(
            subscription = %self.settings.name,
            protocol = %self.settings.protocol,
            mode = %self.settings.mode,
            address = %local_addr,
            path = %self.settings.path,
            "Subscribed"
        );
        *lease = Some(acquired);
        Ok(local_addr)
    }

    /// Wait for exactly one captured call.
    ///
    /// In mock mode the captured message is returned and the caller stays
    /// suspended until [`send_response`](Self::send_response). In proxy mode
    /// the downstream reply is returned after it was relayed.
    pub async fn receive_message(&self) -> Result<Message, BridgeError> {
        self.dispatcher.receive().await
    }

    /// Answer the pending mock exchange.
    pub fn send_response(&self, response: &Response) -> Result<(), BridgeError> {
        self.dispatcher.send_response(response)
    }

    /// Stop serving and release the listener reference.
    pub async fn unsubscribe(&self) -> Result<(), BridgeError> {
        let Some(lease) = self.lease.lock().await.take() else {
            return Err(BridgeError::NotSubscribed);
        };

        self.dispatcher.close();
        let bindings = lease.listener.remove_bindings(self.owner);
        if self.settings.protocol == Protocol::HttpBind {
            self.registry.deregister(&self.dispatcher.route_key(), self.owner);
        }
        let torn_down = self.pool.release(lease.port).await;

        tracing::info!(
            subscription = %self.settings.name,
            bindings,
            listener_stopped = torn_down,
            "Unsubscribed"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.settings.name)
            .field("owner", &self.owner)
            .field("state", &self.dispatcher.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ListenerConfig, SubscriptionConfig};
    use crate::lifecycle::Bridge;
    use crate::registry::RouteKey;

    fn bridge() -> Bridge {
        Bridge::new(ListenerConfig {
            bind_host: "127.0.0.1".into(),
            ..Default::default()
        })
    }

    fn http_bind(name: &str, path: &str) -> SubscriptionConfig {
        SubscriptionConfig {
            name: name.into(),
            kind: Some("http-bind".into()),
            port: 0,
            path: Some(path.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_subscribe_registers_name_route() {
        let bridge = bridge();
        let subscription = bridge.subscription(&http_bind("orders", "/orders")).unwrap();
        let addr = subscription.subscribe().await.unwrap();
        assert_eq!(subscription.local_addr().await, Some(addr));
        assert!(bridge.registry().lookup(&RouteKey::Name("orders".into())).is_some());
        assert_eq!(subscription.state(), ExchangeState::Idle);

        subscription.unsubscribe().await.unwrap();
        assert!(bridge.registry().is_empty());
        assert_eq!(bridge.pool().active_listeners().await, 0);
        assert!(matches!(subscription.unsubscribe().await, Err(BridgeError::NotSubscribed)));
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let bridge = bridge();
        let subscription = bridge.subscription(&http_bind("orders", "/orders")).unwrap();
        let first = subscription.subscribe().await.unwrap();
        let second = subscription.subscribe().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(bridge.pool().ref_count(0).await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_name_releases_listener() {
        let bridge = bridge();
        let first = bridge.subscription(&http_bind("orders", "/a")).unwrap();
        let second = bridge.subscription(&http_bind("orders", "/b")).unwrap();
        first.subscribe().await.unwrap();

        let err = second.subscribe().await.unwrap_err();
        assert!(matches!(err, BridgeError::Registry(_)));
        assert_eq!(bridge.pool().ref_count(0).await, 1);
        assert_eq!(second.local_addr().await, None);
    }

    #[tokio::test]
    async fn test_unreadable_wsdl_fails_subscribe() {
        let bridge = bridge();
        let config = SubscriptionConfig {
            name: "quotes".into(),
            kind: Some("soap".into()),
            port: 0,
            path: Some("/quotes".into()),
            soap: Some(crate::config::SoapConfig {
                wsdl: Some("/nonexistent/quotes.wsdl".into()),
                service: Some("QuoteService".into()),
                port: Some("QuotePort".into()),
                operation: Some("GetQuote".into()),
                namespace: None,
            }),
            ..Default::default()
        };
        let subscription = bridge.subscription(&config).unwrap();
        let err = subscription.subscribe().await.unwrap_err();
        assert!(matches!(err, BridgeError::TransportSetup { port: 0, .. }));
        assert_eq!(bridge.pool().active_listeners().await, 0);
    }

    #[tokio::test]
    async fn test_receive_before_subscribe() {
        let bridge = bridge();
        let subscription = bridge.subscription(&http_bind("orders", "/orders")).unwrap();
        assert!(matches!(
            subscription.receive_message().await,
            Err(BridgeError::NotSubscribed)
        ));
    }
}
