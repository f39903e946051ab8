//! Error types for relay operations.

use crate::negentropy::NegentropyError;

/// Errors that can occur while talking to a relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The relay URL could not be parsed or has an unsupported scheme.
    #[error("invalid relay url {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP error while fetching relay information.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The relay sent a frame that is not a valid protocol message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The relay closed a subscription or rejected a request.
    #[error("relay closed {subscription_id}: {message}")]
    Closed {
        /// Subscription the relay closed.
        subscription_id: String,
        /// Reason given by the relay.
        message: String,
    },

    /// The relay rejected a published event.
    #[error("event rejected: {0}")]
    Rejected(String),

    /// Negentropy reconciliation failed.
    #[error("negentropy error: {0}")]
    Negentropy(#[from] NegentropyError),

    /// The relay did not answer in time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The connection ended before the exchange completed.
    #[error("connection closed")]
    ConnectionClosed,
}
