//! Per-port binding chain.
//!
//! # Responsibilities
//! - Hold the bindings mounted on one port, in registration order
//! - Buffer each inbound call and walk the chain until a handler accepts it
//! - Serve `GET {path}?wsdl` for SOAP bindings that publish a WSDL
//! - Answer 404 when the chain is exhausted
//!
//! # Design Decisions
//! - The chain is an `ArcSwap` snapshot: dispatch never blocks subscribe or
//!   unsubscribe, and a call sees one consistent chain
//! - A binding only resolves a route key; ownership of the key is decided by
//!   the registry

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::Router;

use crate::config::{CredentialsConfig, Protocol, SubscriptionSettings};
use crate::http::response::{self, TransportResponse};
use crate::http::{request_id, with_request_layers};
use crate::net::inbound::InboundRequest;
use crate::observability::metrics;
use crate::registry::{Offer, OperationKey, Registry, RouteKey, SubscriptionId};

/// How a binding turns a call into a registry key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteResolver {
    /// HTTP-bind: fixed subscription name.
    Name(String),
    /// SOAP: service and port fixed, operation from the envelope.
    Operation { service: String, port: String },
}

/// A method + path mount owned by one subscription.
#[derive(Debug)]
pub struct Binding {
    owner: SubscriptionId,
    method: Method,
    path: String,
    resolver: RouteResolver,
    wsdl: Option<Arc<str>>,
}

impl Binding {
    pub fn new(owner: SubscriptionId, method: Method, path: impl Into<String>, resolver: RouteResolver) -> Self {
        Self {
            owner,
            method,
            path: path.into(),
            resolver,
            wsdl: None,
        }
    }

    /// The binding a subscription mounts on its port.
    pub fn for_subscription(settings: &SubscriptionSettings, owner: SubscriptionId) -> Self {
        let resolver = match (&settings.protocol, &settings.soap) {
            (Protocol::Soap, Some(target)) => RouteResolver::Operation {
                service: target.service.clone(),
                port: target.port.clone(),
            },
            _ => RouteResolver::Name(settings.name.clone()),
        };
        Self::new(owner, Method::POST, settings.path.clone(), resolver)
    }

    pub fn with_wsdl(mut self, document: impl Into<Arc<str>>) -> Self {
        self.wsdl = Some(document.into());
        self
    }

    pub fn owner(&self) -> SubscriptionId {
        self.owner
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn accepts(&self, request: &InboundRequest) -> bool {
        request.method == self.method && request.path() == self.path
    }

    fn route_key(&self, request: &mut InboundRequest) -> Option<RouteKey> {
        match &self.resolver {
            RouteResolver::Name(name) => Some(RouteKey::Name(name.clone())),
            RouteResolver::Operation { service, port } => request
                .envelope()
                .map(|envelope| RouteKey::Operation(OperationKey::new(service, port, &envelope.operation))),
        }
    }
}

/// One pooled port.
pub struct PortListener {
    port: u16,
    local_addr: SocketAddr,
    credentials: Option<CredentialsConfig>,
    registry: Arc<Registry>,
    bindings: ArcSwap<Vec<Arc<Binding>>>,
    max_body_size: usize,
}

impl PortListener {
    pub fn new(
        port: u16,
        local_addr: SocketAddr,
        credentials: Option<CredentialsConfig>,
        registry: Arc<Registry>,
        max_body_size: usize,
    ) -> Self {
        Self {
            port,
            local_addr,
            credentials,
            registry,
            bindings: ArcSwap::from_pointee(Vec::new()),
            max_body_size,
        }
    }

    /// Configured port (may be 0).
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn credentials(&self) -> Option<&CredentialsConfig> {
        self.credentials.as_ref()
    }

    pub fn is_secure(&self) -> bool {
        self.credentials.is_some()
    }

    /// Append a binding; it is tried after every existing one.
    pub fn add_binding(&self, binding: Binding) {
        let binding = Arc::new(binding);
        self.bindings.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&binding));
            next
        });
        tracing::debug!(port = self.port, path = %binding.path, owner = %binding.owner, "Binding added");
    }

    /// Drop every binding of `owner`. Returns how many were removed.
    pub fn remove_bindings(&self, owner: SubscriptionId) -> usize {
        let before = self.bindings.load().len();
        self.bindings.rcu(|current| {
            current
                .iter()
                .filter(|binding| binding.owner != owner)
                .cloned()
                .collect::<Vec<_>>()
        });
        before.saturating_sub(self.bindings.load().len())
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.load().len()
    }

    /// Walk the chain for one call.
    pub async fn dispatch(&self, request: Request<Body>) -> TransportResponse {
        let (parts, body) = request.into_parts();
        let body = match axum::body::to_bytes(body, self.max_body_size).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(port = self.port, error = %e, "Failed to buffer request body");
                return response::plain(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
            }
        };
        let mut inbound = InboundRequest::new(parts.method, parts.uri, parts.headers, body);
        let request_id = request_id(&inbound.headers).to_string();
        let chain = self.bindings.load_full();

        if inbound.is_wsdl_query() {
            let document = chain
                .iter()
                .filter(|binding| binding.path == inbound.path())
                .find_map(|binding| binding.wsdl.clone());
            if let Some(document) = document {
                return response::wsdl(&document);
            }
        }

        let mut offered: Vec<RouteKey> = Vec::new();
        for binding in chain.iter() {
            if !binding.accepts(&inbound) {
                continue;
            }
            let Some(key) = binding.route_key(&mut inbound) else {
                continue;
            };
            if offered.contains(&key) {
                continue;
            }
            let Some(handler) = self.registry.lookup(&key) else {
                tracing::trace!(port = self.port, %key, "No handler registered");
                continue;
            };
            match handler.offer(inbound) {
                Offer::Accepted(reply) => return reply.await,
                Offer::Declined(returned) => {
                    inbound = returned;
                    offered.push(key);
                }
            }
        }

        metrics::record_pass_through(self.port);
        tracing::debug!(
            port = self.port,
            %request_id,
            method = %inbound.method,
            path = %inbound.path(),
            "No binding accepted the call"
        );
        response::plain(StatusCode::NOT_FOUND, "no subscription matched")
    }

    /// The axum router serving this port.
    pub fn router(self: Arc<Self>) -> Router {
        with_request_layers(Router::new().fallback(serve).with_state(self))
    }
}

impl std::fmt::Debug for PortListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortListener")
            .field("port", &self.port)
            .field("local_addr", &self.local_addr)
            .field("secure", &self.is_secure())
            .field("bindings", &self.binding_count())
            .finish()
    }
}

async fn serve(State(listener): State<Arc<PortListener>>, request: Request<Body>) -> TransportResponse {
    listener.dispatch(request).await
}
