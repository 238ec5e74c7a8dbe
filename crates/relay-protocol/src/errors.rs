//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding frames or packets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame carried no bytes.
    #[error("empty packet")]
    Empty,
    /// The leading type digit is not a known packet type.
    #[error("invalid packet type: {0:?}")]
    InvalidType(char),
    /// The namespace segment is malformed.
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),
    /// A binary packet is missing its `<n>-` attachment prefix.
    #[error("invalid attachment count")]
    InvalidAttachments,
    /// The ack id segment is not a valid number.
    #[error("invalid packet id")]
    InvalidId,
    /// The JSON payload failed to parse.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),
    /// The payload parsed but does not fit the packet type.
    #[error("invalid payload for {kind}: {reason}")]
    InvalidPayload {
        /// Packet type name.
        kind: &'static str,
        /// What is wrong.
        reason: &'static str,
    },
    /// A binary frame arrived when no attachments were outstanding.
    #[error("unexpected binary frame")]
    UnexpectedBinary,
    /// A text frame arrived while attachments were still outstanding.
    #[error("text frame received while awaiting {0} attachment(s)")]
    AwaitingAttachments(usize),
    /// A frame exceeded the negotiated maximum payload.
    #[error("payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        /// Frame size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },
    /// The `EIO` query parameter names a version we do not speak.
    #[error("unsupported engine version: {0}")]
    UnsupportedVersion(String),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_type_display() {
        let err = ProtocolError::InvalidType('9');
        assert_eq!(err.to_string(), "invalid packet type: '9'");
    }

    #[test]
    fn payload_too_large_display() {
        let err = ProtocolError::PayloadTooLarge { size: 10, limit: 5 };
        assert_eq!(err.to_string(), "payload of 10 bytes exceeds limit of 5");
    }

    #[test]
    fn invalid_payload_display() {
        let err = ProtocolError::InvalidPayload {
            kind: "EVENT",
            reason: "missing event name",
        };
        assert_eq!(err.to_string(), "invalid payload for EVENT: missing event name");
    }
}
