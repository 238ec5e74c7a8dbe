//! Engine-level packets: handshake, liveness, and the message envelope.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::binary::Message;
use crate::errors::{ProtocolError, Result};
use crate::packet::Packet;

/// Prefix byte V3 peers put in front of binary WebSocket frames.
const V3_BINARY_PREFIX: u8 = 4;

/// Engine protocol revision negotiated through the `EIO` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineVersion {
    /// Revision 3: the client pings, binary frames carry a `0x04` prefix,
    /// and the root namespace is joined implicitly.
    V3,
    /// Revision 4: the server pings, binary frames are raw.
    V4,
}

impl EngineVersion {
    /// Parse the `EIO` query value. A missing value means V4.
    pub fn from_query(value: Option<&str>) -> Result<Self> {
        match value {
            None | Some("4") => Ok(Self::V4),
            Some("3") => Ok(Self::V3),
            Some(other) => Err(ProtocolError::UnsupportedVersion(other.to_owned())),
        }
    }

    /// Numeric form used in query strings and logs.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::V3 => 3,
            Self::V4 => 4,
        }
    }

    /// Whether the server side initiates pings.
    pub fn server_pings(self) -> bool {
        matches!(self, Self::V4)
    }
}

/// Body of the `open` packet sent right after the WebSocket upgrade.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
    /// Engine connection id.
    pub sid: String,
    /// Transports the client may upgrade to (always empty: WebSocket only).
    pub upgrades: Vec<String>,
    /// Milliseconds between pings.
    pub ping_interval: u64,
    /// Milliseconds to wait for the matching pong.
    pub ping_timeout: u64,
    /// Largest accepted frame in bytes.
    #[serde(default)]
    pub max_payload: usize,
}

/// One engine packet (one text frame).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    /// `0`: handshake.
    Open(OpenPayload),
    /// `1`: transport close request.
    Close,
    /// `2`: ping, optionally with a probe payload.
    Ping(Option<String>),
    /// `3`: pong, echoing the ping payload.
    Pong(Option<String>),
    /// `4`: envelope for a messaging packet.
    Message(String),
    /// `5`: transport upgrade (unused with WebSocket-only transport).
    Upgrade,
    /// `6`: no-op.
    Noop,
}

impl EnginePacket {
    /// Encode to the text frame body.
    pub fn encode(&self) -> String {
        match self {
            Self::Open(payload) => {
                let json = serde_json::to_string(payload).unwrap_or_default();
                format!("0{json}")
            }
            Self::Close => "1".into(),
            Self::Ping(data) => format!("2{}", data.as_deref().unwrap_or_default()),
            Self::Pong(data) => format!("3{}", data.as_deref().unwrap_or_default()),
            Self::Message(body) => format!("4{body}"),
            Self::Upgrade => "5".into(),
            Self::Noop => "6".into(),
        }
    }

    /// Decode a text frame body.
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let Some(kind) = chars.next() else {
            return Err(ProtocolError::Empty);
        };
        let rest = chars.as_str();
        let optional = || (!rest.is_empty()).then(|| rest.to_owned());

        match kind {
            '0' => serde_json::from_str(rest)
                .map(Self::Open)
                .map_err(|e| ProtocolError::InvalidJson(e.to_string())),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(optional())),
            '3' => Ok(Self::Pong(optional())),
            '4' => Ok(Self::Message(rest.to_owned())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(ProtocolError::InvalidType(other)),
        }
    }
}

/// A WebSocket frame as the session loops see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text frame holding one encoded engine packet.
    Text(String),
    /// Binary frame holding one attachment, already version-encoded.
    Binary(Bytes),
}

impl Frame {
    /// Wrap an engine packet.
    pub fn engine(packet: &EnginePacket) -> Self {
        Self::Text(packet.encode())
    }

    /// Encode a messaging packet and its attachments into the frames that
    /// carry them: one text frame followed by one binary frame per
    /// attachment, in placeholder order.
    pub fn encode_message(version: EngineVersion, packet: &Packet, attachments: &[Bytes]) -> Vec<Self> {
        let mut frames = Vec::with_capacity(1 + attachments.len());
        frames.push(Self::engine(&EnginePacket::Message(packet.encode())));
        frames.extend(
            attachments
                .iter()
                .map(|part| Self::Binary(encode_binary(version, part))),
        );
        frames
    }

    /// Same as [`Frame::encode_message`] for an assembled [`Message`].
    pub fn from_message(version: EngineVersion, message: &Message) -> Vec<Self> {
        Self::encode_message(version, &message.packet, &message.attachments)
    }

    /// Size of the frame body in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the frame body is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode an attachment for the wire.
pub fn encode_binary(version: EngineVersion, data: &Bytes) -> Bytes {
    match version {
        EngineVersion::V4 => data.clone(),
        EngineVersion::V3 => {
            let mut buf = BytesMut::with_capacity(data.len() + 1);
            buf.put_u8(V3_BINARY_PREFIX);
            buf.put_slice(data);
            buf.freeze()
        }
    }
}

/// Decode an attachment from the wire.
pub fn decode_binary(version: EngineVersion, data: Bytes) -> Bytes {
    match version {
        EngineVersion::V3 if data.first() == Some(&V3_BINARY_PREFIX) => data.slice(1..),
        _ => data,
    }
}
