//! Client error types.

use relay_protocol::ProtocolError;
use thiserror::Error;

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The WebSocket could not be opened.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Engine URL that was dialed.
        url: String,
        /// Why it failed.
        reason: String,
    },

    /// The engine handshake or namespace join did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The connection is gone.
    #[error("connection closed")]
    Closed,

    /// The server did not acknowledge an event in time.
    #[error("ack for '{event}' timed out after {timeout_ms}ms")]
    AckTimeout {
        /// Event that was sent.
        event: String,
        /// How long we waited.
        timeout_ms: u64,
    },

    /// The server sent something we could not decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_timeout_display() {
        let err = ClientError::AckTimeout {
            event: "customEvent".into(),
            timeout_ms: 5000,
        };
        assert_eq!(err.to_string(), "ack for 'customEvent' timed out after 5000ms");
    }

    #[test]
    fn protocol_error_is_transparent() {
        let err: ClientError = ProtocolError::Empty.into();
        assert_eq!(err.to_string(), "empty packet");
    }
}
