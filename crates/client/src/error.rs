//! Error type for the realtime client.

use std::time::Duration;

use kinderlink_shared::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// The transport could not be opened.
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// An open transport failed or was closed by the peer.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("not connected")]
    NotConnected,

    #[error("no acknowledgment for '{event}' within {timeout:?}")]
    AckTimeout { event: String, timeout: Duration },

    /// The acknowledgment carried an application error.
    #[error("server rejected '{event}': {message}")]
    Server { event: String, message: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("credential store: {0}")]
    Credentials(String),
}

impl RealtimeError {
    /// Whether the failure came from the connection rather than the server.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            RealtimeError::Connect { .. }
                | RealtimeError::Transport(_)
                | RealtimeError::NotConnected
                | RealtimeError::AckTimeout { .. }
        )
    }
}

pub type Result<T, E = RealtimeError> = std::result::Result<T, E>;
