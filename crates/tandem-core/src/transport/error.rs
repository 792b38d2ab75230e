//! Transport error handling

use thiserror::Error;

use crate::sync::ProtocolError;

/// Errors that can occur on the transport
///
/// None of these are surfaced to callers directly. The session retries or
/// turns them into a [`LoadError`](crate::LoadError), and the status view
/// reports them as a connection quality.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Endpoint URL could not be built
    #[error("Invalid endpoint URL '{url}': {details}")]
    InvalidUrl { url: String, details: String },

    /// Access token provider failed
    #[error("Failed to get access token: {0}")]
    AccessToken(String),

    /// Connection could not be established
    #[error("Failed to connect to sync server: {0}")]
    Connect(String),

    /// WebSocket failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Message could not be encoded or decoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Operation needs an open channel
    #[error("Not connected")]
    NotConnected,

    /// The peer closed the channel
    #[error("Connection closed")]
    Closed,

    /// No reply in time
    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),
}

impl TransportError {
    /// Whether another connection attempt could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidUrl { .. })
    }
}
