//! Route keys and owner identities.

use std::fmt;

use uuid::Uuid;

/// A SOAP operation address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub service: String,
    pub port: String,
    pub operation: String,
}

impl OperationKey {
    pub fn new(service: impl Into<String>, port: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            port: port.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.service, self.port, self.operation)
    }
}

/// Lookup key of a registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteKey {
    /// HTTP-bind: the subscription name.
    Name(String),
    /// SOAP: service / port / operation.
    Operation(OperationKey),
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKey::Name(name) => write!(f, "name:{}", name),
            RouteKey::Operation(key) => write!(f, "soap:{}", key),
        }
    }
}

/// Identity of the subscription that owns a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}
