//! Configuration schema definitions.
//!
//! This module defines the on-disk shape of a bridge file. All types derive
//! Serde traits for deserialization from TOML. Subscriptions are deserialized
//! leniently here and compiled into validated settings by
//! [`crate::config::validation`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Shared listener settings (apply to every port).
    pub listener: ListenerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Subscriptions to activate at startup.
    pub subscriptions: Vec<SubscriptionConfig>,

    /// Outbound SOAP calls fired once, after every subscription is up.
    pub publications: Vec<PublicationConfig>,
}

/// Settings shared by every pooled port listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface the pooled listeners bind to.
    pub bind_host: String,

    /// Maximum inbound body size in bytes.
    pub max_body_size: usize,

    /// How long a released listener may drain in-flight requests, in milliseconds.
    pub drain_timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
            drain_timeout_ms: 1000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Raw subscription definition as written in the bridge file.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SubscriptionConfig {
    /// Subscription name. Doubles as the HTTP-bind route key.
    pub name: String,

    /// Legacy type string (`http-bind`, `soap-proxy`, ...).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// Explicit protocol; wins over the protocol implied by `type`.
    #[serde(default)]
    pub protocol: Option<Protocol>,

    /// Explicit mode; wins over the mode implied by `type`.
    #[serde(default)]
    pub mode: Option<Mode>,

    /// Listening port.
    pub port: u16,

    /// Inbound path served on the listener.
    #[serde(default)]
    pub path: Option<String>,

    /// Downstream target for proxy mode.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Body kind for HTTP-bind captures (`json` or `xml`).
    #[serde(default)]
    pub body_type: Option<String>,

    /// Downstream request timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Listener TLS material. Presence makes the listener secure.
    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,

    /// Match rules, AND-combined.
    #[serde(default)]
    pub bind: Vec<BindConfig>,

    /// SOAP operation descriptor.
    #[serde(default)]
    pub soap: Option<SoapConfig>,

    /// Outbound security for the proxy leg.
    #[serde(default)]
    pub security: Option<SecurityConfig>,

    /// Static SOAP headers added to written SOAP responses.
    #[serde(default)]
    pub soap_headers: BTreeMap<String, String>,

    /// Canned response used by the standalone runner in mock mode.
    #[serde(default)]
    pub response: Option<ResponseConfig>,
}

/// A one-shot outbound SOAP call.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PublicationConfig {
    pub name: String,

    /// Service URL the envelope is posted to.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Operation to call. `wsdl` is ignored here.
    #[serde(default)]
    pub soap: Option<SoapConfig>,

    /// Operation arguments.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// SOAP header entries.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub security: Option<SecurityConfig>,
}

/// Wire protocol of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    HttpBind,
    Soap,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::HttpBind => write!(f, "http-bind"),
            Protocol::Soap => write!(f, "soap"),
        }
    }
}

/// Whether captures are answered locally or forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Mock,
    Proxy,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Mock => write!(f, "mock"),
            Mode::Proxy => write!(f, "proxy"),
        }
    }
}

/// TLS material for a secure listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CredentialsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// One match rule.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BindConfig {
    /// Where to look.
    #[serde(default)]
    pub request: BindTarget,

    /// Expected value, compared strictly.
    pub value: serde_json::Value,
}

/// Locator pair. `body` wins when both are set.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BindTarget {
    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub header: Option<String>,
}

/// SOAP operation descriptor.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SoapConfig {
    /// WSDL location; a readable file is published at `{path}?wsdl`.
    #[serde(default)]
    pub wsdl: Option<String>,

    #[serde(default)]
    pub service: Option<String>,

    #[serde(default)]
    pub port: Option<String>,

    #[serde(default)]
    pub operation: Option<String>,

    /// Target namespace used to qualify the operation element.
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Outbound security for the proxy leg. The first configured variant wins.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub basic_auth: Option<BasicAuthConfig>,

    #[serde(default)]
    pub bearer: Option<BearerConfig>,

    /// WS-Security UsernameToken (PasswordText). SOAP calls only.
    #[serde(default)]
    pub ws_security: Option<WsSecurityConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BearerConfig {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WsSecurityConfig {
    pub username: String,
    pub password: String,
}

/// Response supplied by the orchestration engine (or by config).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseConfig {
    #[serde(default = "default_status")]
    pub status: u16,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_status() -> u16 {
    200
}
