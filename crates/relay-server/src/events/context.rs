//! Per-event handler context.

use std::sync::Arc;

use bytes::Bytes;
use relay_protocol::Packet;
use serde_json::Value;
use tracing::debug;

use crate::namespace::BroadcastManager;
use crate::socket::Socket;

static NULL: Value = Value::Null;

/// Answers one ack request. Consumed by the answer, so an event is
/// acknowledged at most once.
#[derive(Debug)]
pub struct AckResponder {
    socket: Socket,
    id: u64,
}

impl AckResponder {
    /// Responder for ack `id` requested by `socket`'s peer.
    pub fn new(socket: Socket, id: u64) -> Self {
        Self { socket, id }
    }

    /// Ack id being answered.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Send the ack.
    pub fn respond(self, args: Vec<Value>) -> bool {
        self.respond_binary(args, &[])
    }

    /// Send the ack with binary attachments referenced by placeholders.
    pub fn respond_binary(self, args: Vec<Value>, attachments: &[Bytes]) -> bool {
        let packet = Packet::ack(self.socket.namespace(), self.id, args)
            .with_attachments(attachments.len());
        let sent = self.socket.send_packet(&packet, attachments);
        debug!(socket_id = %self.socket.id(), ack_id = self.id, sent, "ack sent");
        sent
    }
}

/// Everything a handler needs to process one received event.
pub struct EventContext {
    /// Socket the event arrived on.
    pub socket: Socket,
    /// Event name.
    pub event: String,
    /// Event arguments (placeholders intact).
    pub args: Vec<Value>,
    /// Binary attachments referenced by placeholders in `args`.
    pub attachments: Vec<Bytes>,
    /// Present when the sender asked for an ack.
    pub ack: Option<AckResponder>,
    /// Fan-out to namespace members.
    pub broadcast: Arc<BroadcastManager>,
}

impl EventContext {
    /// First argument, or `null` when the event carried none.
    pub fn data(&self) -> &Value {
        self.args.first().unwrap_or(&NULL)
    }

    /// Namespace of the receiving socket.
    pub fn namespace(&self) -> &str {
        self.socket.namespace()
    }

    /// Take the ack responder, leaving `None`.
    pub fn take_ack(&mut self) -> Option<AckResponder> {
        self.ack.take()
    }

    /// Whether the sender asked for an ack.
    pub fn wants_ack(&self) -> bool {
        self.ack.is_some()
    }
}
