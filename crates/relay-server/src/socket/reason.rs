//! Why a socket left its namespace.

use std::fmt;

use serde::{Serialize, Serializer};

/// Reason attached to every namespace departure.
///
/// Rendered as the lowercase phrases peers expect in `userDisconnected`
/// payloads and `disconnect` handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The client sent a `DISCONNECT` packet for the namespace.
    ClientNamespaceDisconnect,
    /// The server removed the socket from the namespace.
    ServerNamespaceDisconnect,
    /// The peer closed the `WebSocket` (close frame or end of stream).
    TransportClose,
    /// The `WebSocket` failed with an I/O or protocol error.
    TransportError,
    /// No liveness answer arrived in time.
    PingTimeout,
    /// The peer sent a frame that failed to decode.
    ParseError,
    /// The server is stopping.
    ServerShuttingDown,
}

impl DisconnectReason {
    /// Wire phrase for this reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientNamespaceDisconnect => "client namespace disconnect",
            Self::ServerNamespaceDisconnect => "server namespace disconnect",
            Self::TransportClose => "transport close",
            Self::TransportError => "transport error",
            Self::PingTimeout => "ping timeout",
            Self::ParseError => "parse error",
            Self::ServerShuttingDown => "server shutting down",
        }
    }

    /// Whether the client should be told with a `DISCONNECT` packet.
    ///
    /// Only departures the server initiates while the transport is still up
    /// are announced.
    pub fn notifies_client(self) -> bool {
        matches!(
            self,
            Self::ServerNamespaceDisconnect | Self::ServerShuttingDown
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DisconnectReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
