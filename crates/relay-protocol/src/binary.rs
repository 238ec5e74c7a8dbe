//! Binary attachments.
//!
//! A payload containing binary data is sent as one text packet in which each
//! buffer is replaced by `{"_placeholder":true,"num":n}`, followed by one
//! binary frame per buffer in `num` order. Received payloads keep their
//! placeholders; the buffers travel next to them in [`Message::attachments`],
//! so a payload can be re-broadcast untouched.

use bytes::Bytes;
use serde_json::{Value, json};

use crate::errors::{ProtocolError, Result};
use crate::packet::{MAX_ATTACHMENTS, Packet};

/// Key marking a placeholder object.
pub const PLACEHOLDER_KEY: &str = "_placeholder";

/// Placeholder for attachment `num`.
pub fn placeholder(num: usize) -> Value {
    json!({ "_placeholder": true, "num": num })
}

/// Attachment index if `value` is a placeholder.
pub fn placeholder_index(value: &Value) -> Option<usize> {
    let obj = value.as_object()?;
    if obj.get(PLACEHOLDER_KEY)?.as_bool()? {
        usize::try_from(obj.get("num")?.as_u64()?).ok()
    } else {
        None
    }
}

/// Number of placeholders anywhere inside `value`.
pub fn count_placeholders(value: &Value) -> usize {
    if placeholder_index(value).is_some() {
        return 1;
    }
    match value {
        Value::Array(items) => items.iter().map(count_placeholders).sum(),
        Value::Object(map) => map.values().map(count_placeholders).sum(),
        _ => 0,
    }
}

/// Size in bytes of a value that is expected to hold binary data.
///
/// Placeholders resolve against `attachments`. Peers that cannot send binary
/// fall back to a JSON array of numbers or a string; those count their
/// length. Anything else is 0.
pub fn binary_len(value: &Value, attachments: &[Bytes]) -> usize {
    if let Some(num) = placeholder_index(value) {
        return attachments.get(num).map_or(0, Bytes::len);
    }
    match value {
        Value::Array(items) => items.len(),
        Value::String(s) => s.len(),
        _ => 0,
    }
}

/// Resolve a placeholder to its attachment.
pub fn resolve<'a>(value: &Value, attachments: &'a [Bytes]) -> Option<&'a Bytes> {
    attachments.get(placeholder_index(value)?)
}

/// A complete messaging packet together with its attachments.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The packet (placeholders intact).
    pub packet: Packet,
    /// Binary attachments in placeholder order.
    pub attachments: Vec<Bytes>,
}

impl Message {
    /// Message without attachments.
    pub fn plain(packet: Packet) -> Self {
        Self {
            packet,
            attachments: Vec::new(),
        }
    }
}

/// Collects outgoing buffers and hands out their placeholders.
#[derive(Debug, Default)]
pub struct AttachmentBuilder {
    parts: Vec<Bytes>,
}

impl AttachmentBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffer and return the placeholder to embed in its place.
    pub fn attach(&mut self, data: impl Into<Bytes>) -> Value {
        self.parts.push(data.into());
        placeholder(self.parts.len() - 1)
    }

    /// Number of buffers registered so far.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether no buffer was registered.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The buffers, in placeholder order.
    pub fn into_parts(self) -> Vec<Bytes> {
        self.parts
    }
}

/// Reassembles binary packets from a header followed by attachment frames.
#[derive(Debug, Default)]
pub struct AttachmentAssembler {
    pending: Option<(Packet, Vec<Bytes>)>,
}

impl AttachmentAssembler {
    /// Idle assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether attachments are still outstanding.
    pub fn is_waiting(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of attachments still expected.
    pub fn outstanding(&self) -> usize {
        self.pending
            .as_ref()
            .map_or(0, |(packet, parts)| packet.attachments - parts.len())
    }

    /// Feed a decoded packet. Returns the message when it is complete.
    pub fn push_packet(&mut self, packet: Packet) -> Result<Option<Message>> {
        if self.is_waiting() {
            return Err(ProtocolError::AwaitingAttachments(self.outstanding()));
        }
        if packet.kind.is_binary() && packet.attachments > 0 {
            if packet.attachments > MAX_ATTACHMENTS {
                return Err(ProtocolError::InvalidAttachments);
            }
            self.pending = Some((packet, Vec::new()));
            return Ok(None);
        }
        Ok(Some(Message::plain(packet)))
    }

    /// Feed a binary frame (already version-decoded). Returns the message
    /// once the last attachment arrives.
    pub fn push_binary(&mut self, data: Bytes) -> Result<Option<Message>> {
        let Some((packet, parts)) = self.pending.as_mut() else {
            return Err(ProtocolError::UnexpectedBinary);
        };
        parts.push(data);
        if parts.len() < packet.attachments {
            return Ok(None);
        }
        Ok(self.pending.take().map(|(packet, attachments)| Message {
            packet,
            attachments,
        }))
    }

    /// Drop any partially assembled packet.
    pub fn reset(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketKind;
    use assert_matches::assert_matches;

    fn binary_header(count: usize) -> Packet {
        let args: Vec<Value> = (0..count).map(placeholder).collect();
        Packet::event("/", "bin", args)
    }

    #[test]
    fn placeholder_shape() {
        let p = placeholder(3);
        assert_eq!(p["_placeholder"], true);
        assert_eq!(p["num"], 3);
        assert_eq!(placeholder_index(&p), Some(3));
    }

    #[test]
    fn non_placeholders() {
        assert_eq!(placeholder_index(&json!({"num": 1})), None);
        assert_eq!(placeholder_index(&json!({"_placeholder": false, "num": 1})), None);
        assert_eq!(placeholder_index(&json!([1, 2])), None);
    }

    #[test]
    fn counts_nested_placeholders() {
        let v = json!({
            "a": placeholder(0),
            "b": [placeholder(1), {"c": placeholder(2)}],
            "d": "text"
        });
        assert_eq!(count_placeholders(&v), 3);
        assert_eq!(count_placeholders(&json!({"x": 1})), 0);
    }

    #[test]
    fn binary_len_variants() {
        let parts = vec![Bytes::from(vec![0u8; 1024])];
        assert_eq!(binary_len(&placeholder(0), &parts), 1024);
        assert_eq!(binary_len(&placeholder(5), &parts), 0);
        assert_eq!(binary_len(&json!([1, 2, 3]), &parts), 3);
        assert_eq!(binary_len(&json!("abcd"), &parts), 4);
        assert_eq!(binary_len(&json!(null), &parts), 0);
    }

    #[test]
    fn resolve_returns_attachment() {
        let parts = vec![Bytes::from_static(b"a"), Bytes::from_static(b"bc")];
        assert_eq!(resolve(&placeholder(1), &parts).unwrap(), &Bytes::from_static(b"bc"));
        assert!(resolve(&json!(1), &parts).is_none());
    }

    #[test]
    fn builder_numbers_in_order() {
        let mut builder = AttachmentBuilder::new();
        assert!(builder.is_empty());
        let first = builder.attach(vec![1u8]);
        let second = builder.attach(Bytes::from_static(&[2, 3]));
        assert_eq!(placeholder_index(&first), Some(0));
        assert_eq!(placeholder_index(&second), Some(1));
        assert_eq!(builder.len(), 2);
        assert_eq!(builder.into_parts()[1], Bytes::from_static(&[2, 3]));
    }

    #[test]
    fn plain_packet_passes_through() {
        let mut asm = AttachmentAssembler::new();
        let msg = asm
            .push_packet(Packet::event("/", "chat", vec![]))
            .unwrap()
            .unwrap();
        assert_eq!(msg.packet.kind, PacketKind::Event);
        assert!(msg.attachments.is_empty());
        assert!(!asm.is_waiting());
    }

    #[test]
    fn assembles_after_all_attachments() {
        let mut asm = AttachmentAssembler::new();
        assert!(asm.push_packet(binary_header(2)).unwrap().is_none());
        assert!(asm.is_waiting());
        assert_eq!(asm.outstanding(), 2);

        assert!(asm.push_binary(Bytes::from_static(b"one")).unwrap().is_none());
        assert_eq!(asm.outstanding(), 1);

        let msg = asm.push_binary(Bytes::from_static(b"two")).unwrap().unwrap();
        assert_eq!(msg.attachments.len(), 2);
        assert_eq!(msg.attachments[0], Bytes::from_static(b"one"));
        assert!(!asm.is_waiting());
    }

    #[test]
    fn text_while_waiting_is_error() {
        let mut asm = AttachmentAssembler::new();
        let _ = asm.push_packet(binary_header(1)).unwrap();
        assert_eq!(
            asm.push_packet(Packet::event("/", "x", vec![])),
            Err(ProtocolError::AwaitingAttachments(1))
        );
    }

    #[test]
    fn stray_binary_is_error() {
        let mut asm = AttachmentAssembler::new();
        assert_matches!(
            asm.push_binary(Bytes::from_static(b"?")),
            Err(ProtocolError::UnexpectedBinary)
        );
    }

    #[test]
    fn reset_discards_partial() {
        let mut asm = AttachmentAssembler::new();
        let _ = asm.push_packet(binary_header(3)).unwrap();
        asm.reset();
        assert!(!asm.is_waiting());
        assert_eq!(asm.outstanding(), 0);
    }

    #[test]
    fn oversized_header_is_refused_without_waiting() {
        let mut asm = AttachmentAssembler::new();
        let header = Packet::event("/", "bin", vec![json!({})]).with_attachments(usize::MAX);
        assert_eq!(asm.push_packet(header), Err(ProtocolError::InvalidAttachments));
        assert!(!asm.is_waiting());

        let ok = asm.push_packet(binary_header(1)).unwrap();
        assert!(ok.is_none());
        assert_eq!(asm.outstanding(), 1);
    }

    #[test]
    fn binary_packet_with_zero_attachments_is_complete() {
        let mut asm = AttachmentAssembler::new();
        let packet = Packet::decode(r#"50-["bin"]"#).unwrap();
        let msg = asm.push_packet(packet).unwrap().unwrap();
        assert_eq!(msg.packet.kind, PacketKind::BinaryEvent);
    }
}
