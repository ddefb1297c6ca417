//! Shared listener pool.
//!
//! # Responsibilities
//! - One listener per configured port, shared by every subscription on it
//! - Reference-count acquire/release; the last release tears the port down
//! - Refuse to mix secure and plain subscriptions on one port
//!
//! # Design Decisions
//! - Pool state sits behind an async mutex: acquire awaits TLS loading and
//!   must be atomic with respect to release on the same port
//! - Port 0 is a valid key; every subscription configured with port 0 shares
//!   one ephemeral listener per pool

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::{CredentialsConfig, ListenerConfig};
use crate::net::listener::PortListener;
use crate::net::tls::load_tls_config;
use crate::observability::metrics;
use crate::registry::Registry;

/// Error type for listener setup.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },

    #[error("failed to load TLS material for port {port}: {source}")]
    Tls { port: u16, source: std::io::Error },

    #[error("port {port} is already served {existing}, requested {requested}")]
    SecurityMismatch {
        port: u16,
        existing: &'static str,
        requested: &'static str,
    },
}

impl TransportError {
    pub fn port(&self) -> u16 {
        match self {
            TransportError::Bind { port, .. }
            | TransportError::Tls { port, .. }
            | TransportError::SecurityMismatch { port, .. } => *port,
        }
    }
}

/// A subscription's hold on a pooled listener.
#[derive(Debug, Clone)]
pub struct ListenerLease {
    pub port: u16,
    pub local_addr: SocketAddr,
    pub listener: Arc<PortListener>,
}

struct PooledListener {
    listener: Arc<PortListener>,
    refs: usize,
    handle: Handle,
}

/// Reference-counted per-port listeners.
pub struct ListenerPool {
    registry: Arc<Registry>,
    settings: ListenerConfig,
    listeners: Mutex<HashMap<u16, PooledListener>>,
}

fn security_label(credentials: Option<&CredentialsConfig>) -> &'static str {
    if credentials.is_some() {
        "with TLS"
    } else {
        "without TLS"
    }
}

impl ListenerPool {
    pub fn new(registry: Arc<Registry>, settings: ListenerConfig) -> Self {
        Self {
            registry,
            settings,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Take a reference on the listener for `port`, starting it if needed.
    pub async fn acquire(
        &self,
        port: u16,
        credentials: Option<&CredentialsConfig>,
    ) -> Result<ListenerLease, TransportError> {
        let mut listeners = self.listeners.lock().await;

        if let Some(pooled) = listeners.get_mut(&port) {
            if pooled.listener.credentials() != credentials {
                return Err(TransportError::SecurityMismatch {
                    port,
                    existing: security_label(pooled.listener.credentials()),
                    requested: security_label(credentials),
                });
            }
            pooled.refs += 1;
            tracing::debug!(port, refs = pooled.refs, "Listener shared");
            return Ok(ListenerLease {
                port,
                local_addr: pooled.listener.local_addr(),
                listener: Arc::clone(&pooled.listener),
            });
        }

        let tcp = std::net::TcpListener::bind((self.settings.bind_host.as_str(), port))
            .and_then(|tcp| tcp.set_nonblocking(true).map(|()| tcp))
            .map_err(|source| TransportError::Bind { port, source })?;
        let local_addr = tcp.local_addr().map_err(|source| TransportError::Bind { port, source })?;

        let listener = Arc::new(PortListener::new(
            port,
            local_addr,
            credentials.cloned(),
            Arc::clone(&self.registry),
            self.settings.max_body_size,
        ));
        let app = Arc::clone(&listener).router().into_make_service();
        let handle = Handle::new();

        match credentials {
            Some(credentials) => {
                let tls = load_tls_config(credentials)
                    .await
                    .map_err(|source| TransportError::Tls { port, source })?;
                let server = axum_server::from_tcp_rustls(tcp, tls).handle(handle.clone());
                tokio::spawn(async move {
                    if let Err(e) = server.serve(app).await {
                        tracing::error!(address = %local_addr, error = %e, "Listener failed");
                    }
                });
            }
            None => {
                let server = axum_server::from_tcp(tcp).handle(handle.clone());
                tokio::spawn(async move {
                    if let Err(e) = server.serve(app).await {
                        tracing::error!(address = %local_addr, error = %e, "Listener failed");
                    }
                });
            }
        }

        tracing::info!(
            port,
            address = %local_addr,
            secure = credentials.is_some(),
            "Listener started"
        );
        listeners.insert(
            port,
            PooledListener {
                listener: Arc::clone(&listener),
                refs: 1,
                handle,
            },
        );
        metrics::set_active_listeners(listeners.len());

        Ok(ListenerLease {
            port,
            local_addr,
            listener,
        })
    }

    /// Drop one reference. Returns `true` when this tore the listener down.
    pub async fn release(&self, port: u16) -> bool {
        let mut listeners = self.listeners.lock().await;
        let Some(pooled) = listeners.get_mut(&port) else {
            tracing::warn!(port, "Release of a port that is not pooled");
            return false;
        };

        pooled.refs -= 1;
        if pooled.refs > 0 {
            tracing::debug!(port, refs = pooled.refs, "Listener reference released");
            return false;
        }

        if let Some(pooled) = listeners.remove(&port) {
            pooled
                .handle
                .graceful_shutdown(Some(Duration::from_millis(self.settings.drain_timeout_ms)));
            tracing::info!(port, address = %pooled.listener.local_addr(), "Listener stopped");
        }
        metrics::set_active_listeners(listeners.len());
        true
    }

    /// Live references on `port`.
    pub async fn ref_count(&self, port: u16) -> usize {
        self.listeners
            .lock()
            .await
            .get(&port)
            .map(|pooled| pooled.refs)
            .unwrap_or(0)
    }

    pub async fn active_listeners(&self) -> usize {
        self.listeners.lock().await.len()
    }
}

impl std::fmt::Debug for ListenerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerPool")
            .field("bind_host", &self.settings.bind_host)
            .finish()
    }
}
