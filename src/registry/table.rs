//! Concurrent route table.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::registry::{RouteKey, ServiceHandler, SubscriptionId};

/// Registry invariant violations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Another live subscription already owns the key.
    #[error("route {key} is already registered by another subscription")]
    DuplicateRoute { key: RouteKey },
}

struct HandlerEntry {
    owner: SubscriptionId,
    handler: Arc<dyn ServiceHandler>,
}

/// Maps route keys to handlers.
#[derive(Default)]
pub struct Registry {
    entries: DashMap<RouteKey, HandlerEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` under `key` for `owner`.
    pub fn register(
        &self,
        key: RouteKey,
        owner: SubscriptionId,
        handler: Arc<dyn ServiceHandler>,
    ) -> Result<(), RegistryError> {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().owner != owner {
                    return Err(RegistryError::DuplicateRoute {
                        key: occupied.key().clone(),
                    });
                }
                tracing::trace!(key = %occupied.key(), %owner, "Route re-registered");
                occupied.insert(HandlerEntry { owner, handler });
            }
            Entry::Vacant(vacant) => {
                tracing::trace!(key = %vacant.key(), %owner, "Route registered");
                vacant.insert(HandlerEntry { owner, handler });
            }
        }
        Ok(())
    }

    /// Current handler for `key`, if any.
    pub fn lookup(&self, key: &RouteKey) -> Option<Arc<dyn ServiceHandler>> {
        self.entries.get(key).map(|entry| Arc::clone(&entry.handler))
    }

    /// Remove `key` if `owner` still holds it.
    pub fn deregister(&self, key: &RouteKey, owner: SubscriptionId) -> bool {
        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.owner == owner)
            .is_some();
        if removed {
            tracing::trace!(%key, %owner, "Route deregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("routes", &self.entries.len()).finish()
    }
}
