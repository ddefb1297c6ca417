//! The bridge instance: one registry, one listener pool, one downstream client.

use std::sync::Arc;

use crate::config::{
    ConfigError, ListenerConfig, PublicationConfig, PublicationSettings, SubscriptionConfig, SubscriptionSettings,
};
use crate::downstream::client::HyperDownstream;
use crate::downstream::{Downstream, Publisher};
use crate::error::BridgeError;
use crate::lifecycle::subscription::Subscription;
use crate::net::ListenerPool;
use crate::observer::{MessageObserver, TracingObserver};
use crate::registry::Registry;

/// Owns everything subscriptions share.
///
/// Subscriptions created from the same bridge share listeners by port and
/// route keys through the same [`Registry`]; two bridges never see each
/// other's routes.
pub struct Bridge {
    registry: Arc<Registry>,
    pool: Arc<ListenerPool>,
    downstream: Arc<dyn Downstream>,
    observer: Arc<dyn MessageObserver>,
}

impl Bridge {
    pub fn new(listener: ListenerConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let pool = Arc::new(ListenerPool::new(Arc::clone(&registry), listener));
        Self {
            registry,
            pool,
            downstream: Arc::new(HyperDownstream::new()),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the notification sink for subscriptions created afterwards.
    pub fn with_observer(mut self, observer: Arc<dyn MessageObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the client used for proxy legs and publications.
    pub fn with_downstream(mut self, downstream: Arc<dyn Downstream>) -> Self {
        self.downstream = downstream;
        self
    }

    /// Validate `config` and build an unsubscribed [`Subscription`].
    pub fn subscription(&self, config: &SubscriptionConfig) -> Result<Subscription, BridgeError> {
        let settings = SubscriptionSettings::compile(config).map_err(ConfigError::Validation)?;
        Ok(self.from_settings(settings))
    }

    /// Build a subscription from already validated settings.
    pub fn from_settings(&self, settings: SubscriptionSettings) -> Subscription {
        Subscription::new(
            Arc::new(settings),
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            Arc::clone(&self.downstream),
            Arc::clone(&self.observer),
        )
    }

    /// Validate `config` and build a [`Publisher`] on the bridge's client.
    pub fn publisher(&self, config: &PublicationConfig) -> Result<Publisher, BridgeError> {
        let settings = PublicationSettings::compile(config).map_err(ConfigError::Validation)?;
        Ok(self.publisher_from_settings(settings))
    }

    pub fn publisher_from_settings(&self, settings: PublicationSettings) -> Publisher {
        Publisher::new(Arc::new(settings), Arc::clone(&self.downstream))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<ListenerPool> {
        &self.pool
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish()
    }
}
