//! Messaging packets carried inside engine `Message` envelopes.
//!
//! Text form: `<type>[<attachments>-][<nsp>,][<id>][<json>]`. The namespace
//! segment is omitted for the root namespace `/`.

use std::fmt::Write as _;

use serde_json::{Value, json};

use crate::binary::count_placeholders;
use crate::errors::{ProtocolError, Result};

/// The root namespace.
pub const ROOT_NAMESPACE: &str = "/";

/// Upper bound on the attachment count a binary packet may announce.
pub const MAX_ATTACHMENTS: usize = 1024;

/// Event names the messaging layer uses itself; applications may not emit
/// them.
pub const RESERVED_EVENTS: &[&str] = &[
    "connect",
    "connect_error",
    "disconnect",
    "disconnecting",
    "newListener",
    "removeListener",
];

/// Whether `name` is reserved by the messaging layer.
pub fn is_reserved_event(name: &str) -> bool {
    RESERVED_EVENTS.contains(&name)
}

/// Messaging packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// `0`: join a namespace / join accepted.
    Connect,
    /// `1`: leave a namespace.
    Disconnect,
    /// `2`: named event.
    Event,
    /// `3`: acknowledgement.
    Ack,
    /// `4`: namespace join refused.
    ConnectError,
    /// `5`: named event with binary attachments.
    BinaryEvent,
    /// `6`: acknowledgement with binary attachments.
    BinaryAck,
}

impl PacketKind {
    /// Parse the leading type digit.
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            '0' => Self::Connect,
            '1' => Self::Disconnect,
            '2' => Self::Event,
            '3' => Self::Ack,
            '4' => Self::ConnectError,
            '5' => Self::BinaryEvent,
            '6' => Self::BinaryAck,
            _ => return None,
        })
    }

    /// The leading type digit.
    pub fn as_char(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::ConnectError => '4',
            Self::BinaryEvent => '5',
            Self::BinaryAck => '6',
        }
    }

    /// Upper-case name used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Disconnect => "DISCONNECT",
            Self::Event => "EVENT",
            Self::Ack => "ACK",
            Self::ConnectError => "CONNECT_ERROR",
            Self::BinaryEvent => "BINARY_EVENT",
            Self::BinaryAck => "BINARY_ACK",
        }
    }

    /// Whether this kind carries an attachment count.
    pub fn is_binary(self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }

    /// Whether this kind is an event (plain or binary).
    pub fn is_event(self) -> bool {
        matches!(self, Self::Event | Self::BinaryEvent)
    }

    /// Whether this kind is an acknowledgement (plain or binary).
    pub fn is_ack(self) -> bool {
        matches!(self, Self::Ack | Self::BinaryAck)
    }
}

/// One messaging packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Packet type.
    pub kind: PacketKind,
    /// Target namespace, always starting with `/`.
    pub namespace: String,
    /// Ack id: on events, the sender wants an ack; on acks, the event answered.
    pub id: Option<u64>,
    /// JSON payload.
    pub data: Option<Value>,
    /// Number of binary frames that follow this packet.
    pub attachments: usize,
}

impl Packet {
    fn new(kind: PacketKind, namespace: &str, data: Option<Value>) -> Self {
        Self {
            kind,
            namespace: namespace.to_owned(),
            id: None,
            data,
            attachments: 0,
        }
    }

    /// `CONNECT` packet. Clients send auth data; servers answer `{sid}`.
    pub fn connect(namespace: &str, data: Option<Value>) -> Self {
        Self::new(PacketKind::Connect, namespace, data)
    }

    /// `CONNECT_ERROR` packet refusing a namespace join.
    pub fn connect_error(namespace: &str, message: &str) -> Self {
        Self::new(
            PacketKind::ConnectError,
            namespace,
            Some(json!({ "message": message })),
        )
    }

    /// `DISCONNECT` packet.
    pub fn disconnect(namespace: &str) -> Self {
        Self::new(PacketKind::Disconnect, namespace, None)
    }

    /// Event packet. Switches to `BINARY_EVENT` when `args` contain
    /// attachment placeholders.
    pub fn event(namespace: &str, event: &str, args: Vec<Value>) -> Self {
        let mut payload = Vec::with_capacity(args.len() + 1);
        payload.push(Value::String(event.to_owned()));
        payload.extend(args);
        let data = Value::Array(payload);
        let attachments = count_placeholders(&data);
        let kind = if attachments > 0 {
            PacketKind::BinaryEvent
        } else {
            PacketKind::Event
        };
        Self {
            attachments,
            ..Self::new(kind, namespace, Some(data))
        }
    }

    /// Ack packet answering event `id`. Switches to `BINARY_ACK` when `args`
    /// contain attachment placeholders.
    pub fn ack(namespace: &str, id: u64, args: Vec<Value>) -> Self {
        let data = Value::Array(args);
        let attachments = count_placeholders(&data);
        let kind = if attachments > 0 {
            PacketKind::BinaryAck
        } else {
            PacketKind::Ack
        };
        Self {
            id: Some(id),
            attachments,
            ..Self::new(kind, namespace, Some(data))
        }
    }

    /// Attach an ack id.
    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Declare the number of binary frames that will follow this packet.
    ///
    /// A non-zero count switches an event or ack to its binary kind. The
    /// count always wins over the placeholders found in the payload, so the
    /// header matches the frames actually sent.
    #[must_use]
    pub fn with_attachments(mut self, count: usize) -> Self {
        if count > 0 {
            self.kind = match self.kind {
                PacketKind::Event => PacketKind::BinaryEvent,
                PacketKind::Ack => PacketKind::BinaryAck,
                other => other,
            };
        }
        if self.kind.is_binary() {
            self.attachments = count;
        }
        self
    }

    /// Event name, for event packets.
    pub fn event_name(&self) -> Option<&str> {
        if !self.kind.is_event() {
            return None;
        }
        self.data.as_ref()?.as_array()?.first()?.as_str()
    }

    /// Event arguments (everything after the name), for event packets.
    pub fn event_args(&self) -> &[Value] {
        match (&self.data, self.kind.is_event()) {
            (Some(Value::Array(items)), true) if !items.is_empty() => &items[1..],
            _ => &[],
        }
    }

    /// Ack arguments, for ack packets.
    pub fn ack_args(&self) -> &[Value] {
        match (&self.data, self.kind.is_ack()) {
            (Some(Value::Array(items)), true) => items,
            _ => &[],
        }
    }

    /// Message of a `CONNECT_ERROR` packet. Older peers send a bare string.
    pub fn error_message(&self) -> Option<&str> {
        if self.kind != PacketKind::ConnectError {
            return None;
        }
        match self.data.as_ref()? {
            Value::String(s) => Some(s.as_str()),
            other => other.get("message")?.as_str(),
        }
    }

    /// Encode to the text carried in an engine `Message`.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.as_char());
        if self.kind.is_binary() {
            let _ = write!(out, "{}-", self.attachments);
        }
        if self.namespace != ROOT_NAMESPACE {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.id {
            let _ = write!(out, "{id}");
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Decode from the text carried in an engine `Message`.
    pub fn decode(text: &str) -> Result<Self> {
        let bytes = text.as_bytes();
        let Some(&first) = bytes.first() else {
            return Err(ProtocolError::Empty);
        };
        let kind = PacketKind::from_char(char::from(first))
            .ok_or(ProtocolError::InvalidType(char::from(first)))?;
        let mut cursor = 1;

        let mut attachments = 0;
        if kind.is_binary() {
            let Some(dash) = text[cursor..].find('-') else {
                return Err(ProtocolError::InvalidAttachments);
            };
            attachments = text[cursor..cursor + dash]
                .parse()
                .map_err(|_| ProtocolError::InvalidAttachments)?;
            if attachments > MAX_ATTACHMENTS {
                return Err(ProtocolError::InvalidAttachments);
            }
            cursor += dash + 1;
        }

        let mut namespace = ROOT_NAMESPACE.to_owned();
        if bytes.get(cursor) == Some(&b'/') {
            let end = text[cursor..].find(',').map_or(text.len(), |i| cursor + i);
            namespace = normalize_namespace(&text[cursor..end])?;
            cursor = (end + 1).min(text.len());
        }

        let digits = bytes[cursor..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        let id = if digits > 0 {
            let parsed = text[cursor..cursor + digits]
                .parse()
                .map_err(|_| ProtocolError::InvalidId)?;
            cursor += digits;
            Some(parsed)
        } else {
            None
        };

        let body = &text[cursor..];
        let data = if body.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(body)
                    .map_err(|e| ProtocolError::InvalidJson(e.to_string()))?,
            )
        };

        let packet = Self {
            kind,
            namespace,
            id,
            data,
            attachments,
        };
        packet.validate()?;
        Ok(packet)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason| {
            Err(ProtocolError::InvalidPayload {
                kind: self.kind.name(),
                reason,
            })
        };
        match (self.kind, &self.data) {
            (PacketKind::Connect, None | Some(Value::Object(_))) => Ok(()),
            (PacketKind::Connect, Some(_)) => invalid("payload must be an object"),
            (PacketKind::Disconnect, None) => Ok(()),
            (PacketKind::Disconnect, Some(_)) => invalid("payload not allowed"),
            (PacketKind::ConnectError, Some(Value::String(_) | Value::Object(_))) => Ok(()),
            (PacketKind::ConnectError, _) => invalid("payload must be a string or object"),
            (PacketKind::Event | PacketKind::BinaryEvent, Some(Value::Array(items))) => {
                match items.first() {
                    Some(Value::String(_)) => Ok(()),
                    Some(_) => invalid("event name must be a string"),
                    None => invalid("missing event name"),
                }
            }
            (PacketKind::Event | PacketKind::BinaryEvent, _) => {
                invalid("payload must be an array")
            }
            (PacketKind::Ack | PacketKind::BinaryAck, Some(Value::Array(_))) => {
                if self.id.is_some() {
                    Ok(())
                } else {
                    invalid("missing ack id")
                }
            }
            (PacketKind::Ack | PacketKind::BinaryAck, _) => invalid("payload must be an array"),
        }
    }
}

/// Strip a legacy query suffix (`/chat?token=x`) and check the shape.
fn normalize_namespace(raw: &str) -> Result<String> {
    let name = raw.split('?').next().unwrap_or_default();
    if !name.starts_with('/') || name.chars().any(char::is_whitespace) {
        return Err(ProtocolError::InvalidNamespace(raw.to_owned()));
    }
    Ok(name.to_owned())
}
