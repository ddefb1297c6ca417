//! Bridge error taxonomy.

use thiserror::Error;

use crate::config::ConfigError;
use crate::dispatch::ResponseWriteError;
use crate::downstream::DownstreamError;
use crate::message::ParseError;
use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid subscription configuration. Fatal at construction.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The listener for this subscription could not be set up.
    #[error("transport setup failed on port {port}: {reason}")]
    TransportSetup { port: u16, reason: String },

    /// A captured body did not decode. The listener keeps serving.
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Downstream(#[from] DownstreamError),

    #[error(transparent)]
    ResponseWrite(#[from] ResponseWriteError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("subscription is not subscribed")]
    NotSubscribed,

    #[error("a receive is already waiting on this subscription")]
    ReceiveInProgress,

    #[error("an exchange is still pending on this subscription")]
    ExchangePending,

    #[error("exchange cancelled by unsubscribe")]
    Cancelled,
}
