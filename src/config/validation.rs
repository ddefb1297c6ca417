//! Configuration validation.
//!
//! # Responsibilities
//! - Resolve protocol and mode (explicit enums, legacy type strings)
//! - Parse locators, endpoint URL, body kind, timeout
//! - Check protocol-specific requirements (SOAP descriptor, proxy endpoint)
//! - Detect duplicate subscription and publication names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Output is an immutable [`SubscriptionSettings`]; nothing downstream
//!   re-reads the raw config

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::config::schema::{
    BridgeConfig, CredentialsConfig, Mode, Protocol, PublicationConfig, SoapConfig, SubscriptionConfig,
};
use crate::downstream::{ClientSecurity, DEFAULT_TIMEOUT};
use crate::http::Response;
use crate::message::BodyKind;
use crate::predicate::{BindPredicate, Locator};
use crate::registry::OperationKey;

/// A single validation problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub subscription: String,
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(subscription: &str, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            subscription: subscription.to_string(),
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.subscription, self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Legacy `type` strings, matched exactly (case-insensitive).
const LEGACY_TYPES: &[(&str, Protocol, Mode)] = &[
    ("http-bind", Protocol::HttpBind, Mode::Mock),
    ("http-bind-server", Protocol::HttpBind, Mode::Mock),
    ("http-bind-proxy", Protocol::HttpBind, Mode::Proxy),
    ("soap", Protocol::Soap, Mode::Mock),
    ("soap-server", Protocol::Soap, Mode::Mock),
    ("soap-proxy", Protocol::Soap, Mode::Proxy),
];

/// Look up a legacy type string.
pub fn legacy_type(kind: &str) -> Option<(Protocol, Mode)> {
    let kind = kind.trim();
    LEGACY_TYPES
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(kind))
        .map(|(_, protocol, mode)| (*protocol, *mode))
}

/// SOAP operation a subscription serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapTarget {
    pub service: String,
    pub port: String,
    pub operation: String,
    pub namespace: Option<String>,
    pub wsdl: Option<PathBuf>,
}

impl SoapTarget {
    pub fn key(&self) -> OperationKey {
        OperationKey::new(&self.service, &self.port, &self.operation)
    }
}

/// Validated, immutable subscription settings.
#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    pub name: String,
    pub protocol: Protocol,
    pub mode: Mode,
    pub port: u16,
    pub path: String,
    pub endpoint: Option<Url>,
    pub body_kind: BodyKind,
    pub timeout: Duration,
    pub credentials: Option<CredentialsConfig>,
    pub predicates: Vec<BindPredicate>,
    pub soap: Option<SoapTarget>,
    pub security: Option<ClientSecurity>,
    pub soap_headers: BTreeMap<String, String>,
    pub response: Option<Response>,
}

impl SubscriptionSettings {
    /// Validate one raw subscription.
    pub fn compile(config: &SubscriptionConfig) -> Result<Self, Vec<ValidationError>> {
        let name = config.name.trim();
        let mut errors = Vec::new();
        let mut error = |field: &'static str, message: String| {
            errors.push(ValidationError::new(name, field, message));
        };

        if name.is_empty() {
            error("name", "must not be empty".into());
        }

        let implied = match config.kind.as_deref() {
            Some(kind) => match legacy_type(kind) {
                Some(pair) => Some(pair),
                None => {
                    error("type", format!("unknown subscription type '{}'", kind));
                    None
                }
            },
            None => None,
        };
        let protocol = config.protocol.or(implied.map(|(p, _)| p));
        let mode = config.mode.or(implied.map(|(_, m)| m)).unwrap_or(Mode::Mock);
        if protocol.is_none() && config.kind.is_none() {
            error("protocol", "either 'protocol' or 'type' is required".into());
        }

        let path = config.path.clone().unwrap_or_else(|| "/".to_string());
        if !path.starts_with('/') {
            error("path", format!("'{}' must start with '/'", path));
        }

        let body_kind = match config.body_type.as_deref() {
            Some(kind) => kind.parse::<BodyKind>().unwrap_or_else(|e| {
                error("body_type", e);
                BodyKind::default()
            }),
            None => BodyKind::default(),
        };

        let timeout = timeout(config.timeout_ms).unwrap_or_else(|e| {
            error("timeout_ms", e);
            DEFAULT_TIMEOUT
        });

        let endpoint = match config.endpoint.as_deref() {
            Some(raw) => endpoint_url(raw).map_err(|e| error("endpoint", e)).ok(),
            None => None,
        };
        if mode == Mode::Proxy && config.endpoint.is_none() {
            error("endpoint", "proxy mode requires a downstream endpoint".into());
        }

        if let Some(credentials) = &config.credentials {
            if credentials.cert_path.trim().is_empty() || credentials.key_path.trim().is_empty() {
                error("credentials", "cert_path and key_path must both be set".into());
            }
        }

        let mut predicates = Vec::with_capacity(config.bind.len());
        for rule in &config.bind {
            let locator = match rule.request.body.as_deref().filter(|b| !b.trim().is_empty()) {
                Some(path) => match Locator::parse(path) {
                    Ok(locator) => Some(locator),
                    Err(e) => {
                        error("bind", e.to_string());
                        continue;
                    }
                },
                None => None,
            };
            predicates.push(BindPredicate::from_locators(
                locator,
                rule.request.header.as_deref(),
                rule.value.clone(),
            ));
        }

        let soap = match protocol {
            Some(Protocol::Soap) => {
                if !config.bind.is_empty() {
                    error("bind", "SOAP subscriptions route by operation, not by predicates".into());
                }
                Some(soap_target(config.soap.clone().unwrap_or_default(), &mut error))
            }
            _ => None,
        };

        let security = config.security.as_ref().and_then(ClientSecurity::from_config);
        if protocol == Some(Protocol::HttpBind) && security.as_ref().is_some_and(|s| s.authorization().is_none()) {
            error("security", "ws_security applies to SOAP calls only".into());
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        let Some(protocol) = protocol else {
            return Err(vec![ValidationError::new(name, "protocol", "could not be resolved")]);
        };

        Ok(Self {
            name: name.to_string(),
            protocol,
            mode,
            port: config.port,
            path,
            endpoint,
            body_kind,
            timeout,
            credentials: config.credentials.clone(),
            predicates,
            soap,
            security,
            soap_headers: config.soap_headers.clone(),
            response: config.response.clone().map(Response::from),
        })
    }

    /// Whether the listener for this subscription terminates TLS.
    pub fn is_secure(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Validated one-shot SOAP call.
#[derive(Debug, Clone)]
pub struct PublicationSettings {
    pub name: String,
    pub endpoint: Url,
    pub target: SoapTarget,
    pub payload: serde_json::Value,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    pub security: Option<ClientSecurity>,
}

impl PublicationSettings {
    pub fn compile(config: &PublicationConfig) -> Result<Self, Vec<ValidationError>> {
        let name = config.name.trim();
        let mut errors = Vec::new();
        let mut error = |field: &'static str, message: String| {
            errors.push(ValidationError::new(name, field, message));
        };

        if name.is_empty() {
            error("name", "must not be empty".into());
        }
        let endpoint = match config.endpoint.as_deref() {
            Some(raw) => endpoint_url(raw).map_err(|e| error("endpoint", e)).ok(),
            None => {
                error("endpoint", "required for publications".into());
                None
            }
        };
        let timeout = timeout(config.timeout_ms).unwrap_or_else(|e| {
            error("timeout_ms", e);
            DEFAULT_TIMEOUT
        });
        let target = soap_target(config.soap.clone().unwrap_or_default(), &mut error);

        match (endpoint, errors.is_empty()) {
            (Some(endpoint), true) => Ok(Self {
                name: name.to_string(),
                endpoint,
                target,
                payload: config.payload.clone(),
                headers: config.headers.clone(),
                timeout,
                security: config.security.as_ref().and_then(ClientSecurity::from_config),
            }),
            _ => Err(errors),
        }
    }
}

fn timeout(ms: Option<u64>) -> Result<Duration, String> {
    match ms {
        Some(0) => Err("must be greater than zero".into()),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(DEFAULT_TIMEOUT),
    }
}

fn endpoint_url(raw: &str) -> Result<Url, String> {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        Ok(url) => Err(format!("unsupported scheme '{}'", url.scheme())),
        Err(e) => Err(format!("'{}' is not a valid URL: {}", raw, e)),
    }
}

fn soap_target(descriptor: SoapConfig, error: &mut dyn FnMut(&'static str, String)) -> SoapTarget {
    let mut required = |field: &'static str, value: Option<String>| match value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        Some(value) => value,
        None => {
            error(field, "required for SOAP operations".into());
            String::new()
        }
    };
    let service = required("soap.service", descriptor.service);
    let port = required("soap.port", descriptor.port);
    let operation = required("soap.operation", descriptor.operation);
    SoapTarget {
        service,
        port,
        operation,
        namespace: descriptor.namespace.filter(|ns| !ns.trim().is_empty()),
        wsdl: descriptor.wsdl.filter(|w| !w.trim().is_empty()).map(PathBuf::from),
    }
}

/// Validate every publication of a bridge file.
pub fn validate_publications(config: &BridgeConfig) -> Result<Vec<PublicationSettings>, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut settings = Vec::with_capacity(config.publications.len());
    let mut names = HashSet::new();

    for publication in &config.publications {
        if !names.insert(publication.name.trim().to_string()) {
            errors.push(ValidationError::new(&publication.name, "name", "duplicate publication name"));
        }
        match PublicationSettings::compile(publication) {
            Ok(compiled) => settings.push(compiled),
            Err(mut problems) => errors.append(&mut problems),
        }
    }

    if errors.is_empty() {
        Ok(settings)
    } else {
        Err(errors)
    }
}

/// Validate a whole bridge file.
pub fn validate_config(config: &BridgeConfig) -> Result<Vec<SubscriptionSettings>, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut settings = Vec::with_capacity(config.subscriptions.len());
    let mut names = HashSet::new();

    if config.listener.max_body_size == 0 {
        errors.push(ValidationError::new("listener", "max_body_size", "must be greater than zero"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability",
            "metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    for subscription in &config.subscriptions {
        if !names.insert(subscription.name.trim().to_string()) {
            errors.push(ValidationError::new(&subscription.name, "name", "duplicate subscription name"));
        }
        match SubscriptionSettings::compile(subscription) {
            Ok(compiled) => settings.push(compiled),
            Err(mut problems) => errors.append(&mut problems),
        }
    }

    if let Err(mut problems) = validate_publications(config) {
        errors.append(&mut problems);
    }

    if errors.is_empty() {
        Ok(settings)
    } else {
        Err(errors)
    }
}
