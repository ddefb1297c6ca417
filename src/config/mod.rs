//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! bridge file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, compile)
//!     → SubscriptionSettings (validated, immutable)
//!     → shared via Arc with the subscription's dispatcher
//! ```
//!
//! # Design Decisions
//! - Settings are immutable once compiled
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BasicAuthConfig, BearerConfig, BindConfig, BindTarget, BridgeConfig, CredentialsConfig, ListenerConfig, Mode,
    ObservabilityConfig, Protocol, PublicationConfig, ResponseConfig, SecurityConfig, SoapConfig, SubscriptionConfig,
    WsSecurityConfig,
};
pub use validation::{
    legacy_type, validate_config, validate_publications, PublicationSettings, SoapTarget, SubscriptionSettings,
    ValidationError,
};
