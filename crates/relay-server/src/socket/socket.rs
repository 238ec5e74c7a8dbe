//! Namespace-scoped socket handle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use relay_core::{EngineId, SocketId};
use relay_protocol::{EngineVersion, Packet};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ack::AckReceiver;
use super::connection::EngineConnection;
use super::reason::DisconnectReason;
use crate::metrics::ACKS_REQUESTED_TOTAL;

/// One namespace joined over one engine connection.
///
/// Cheap to clone; every clone addresses the same socket.
#[derive(Clone)]
pub struct Socket {
    id: SocketId,
    namespace: String,
    engine: Arc<EngineConnection>,
    ack_timeout: Duration,
    cancel: CancellationToken,
}

impl Socket {
    /// Create a handle. `cancel` fires when the socket leaves its namespace.
    pub fn new(
        id: SocketId,
        namespace: &str,
        engine: Arc<EngineConnection>,
        ack_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            namespace: namespace.to_owned(),
            engine,
            ack_timeout,
            cancel,
        }
    }

    /// Socket id.
    pub fn id(&self) -> &SocketId {
        &self.id
    }

    /// Namespace this socket joined.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Underlying engine connection.
    pub fn engine(&self) -> &Arc<EngineConnection> {
        &self.engine
    }

    /// Engine connection id.
    pub fn engine_id(&self) -> &EngineId {
        &self.engine.id
    }

    /// Negotiated engine revision.
    pub fn version(&self) -> EngineVersion {
        self.engine.version
    }

    /// Token cancelled when the socket leaves its namespace.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the socket is still joined.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Mark the socket as gone. Stops tasks bound to it.
    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }

    /// Send a packet and its attachments to this socket's peer.
    pub fn send_packet(&self, packet: &Packet, attachments: &[Bytes]) -> bool {
        self.engine.send_packet(packet, attachments)
    }

    /// Emit an event without attachments.
    pub fn emit(&self, event: &str, args: Vec<Value>) -> bool {
        self.emit_binary(event, args, &[])
    }

    /// Emit an event whose args reference `attachments` by placeholder.
    pub fn emit_binary(&self, event: &str, args: Vec<Value>, attachments: &[Bytes]) -> bool {
        let packet = Packet::event(&self.namespace, event, args).with_attachments(attachments.len());
        self.send_packet(&packet, attachments)
    }

    /// Emit an event and wait for the peer's acknowledgement.
    ///
    /// `timeout` defaults to the server's configured ack timeout. If the
    /// event cannot be queued the receiver resolves as cancelled.
    pub fn emit_with_ack(
        &self,
        event: &str,
        args: Vec<Value>,
        attachments: &[Bytes],
        timeout: Option<Duration>,
    ) -> AckReceiver {
        let acks = self.engine.acks();
        let id = acks.next_id();
        let receiver = acks.register(id, event, timeout.unwrap_or(self.ack_timeout));
        let packet = Packet::event(&self.namespace, event, args)
            .with_id(id)
            .with_attachments(attachments.len());
        counter!(ACKS_REQUESTED_TOTAL).increment(1);
        if !self.send_packet(&packet, attachments) {
            debug!(socket_id = %self.id, event, ack_id = id, "ack request not queued");
            let _ = acks.cancel(id);
        }
        receiver
    }

    /// Remove this socket from its namespace. The peer receives a
    /// `DISCONNECT` packet when `reason` is server-initiated.
    pub fn disconnect(&self, reason: DisconnectReason) -> bool {
        self.engine.request_leave(&self.namespace, reason)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("engine", &self.engine.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::ack::{AckError, AckResponse};
    use crate::socket::connection::SessionCommand;
    use crate::socket::test_support::{TestPeer, test_socket};
    use assert_matches::assert_matches;
    use relay_protocol::Frame;
    use serde_json::json;

    fn next_text(peer: &mut TestPeer) -> String {
        match peer.frames.try_recv().unwrap() {
            Frame::Text(t) => t,
            Frame::Binary(_) => panic!("expected text frame"),
        }
    }

    #[test]
    fn emit_encodes_namespace_and_args() {
        let (socket, mut peer) = test_socket("/chat");
        assert!(socket.emit("chatMessage", vec![json!({"message": "hi"})]));
        assert_eq!(next_text(&mut peer), r#"42/chat,["chatMessage",{"message":"hi"}]"#);
    }

    #[test]
    fn emit_binary_sends_attachments_after_header() {
        let (socket, mut peer) = test_socket("/");
        let args = vec![json!({"binaryData": {"_placeholder": true, "num": 0}})];
        assert!(socket.emit_binary("binaryEvent", args, &[Bytes::from_static(&[1, 2, 3])]));
        assert!(next_text(&mut peer).starts_with("451-[\"binaryEvent\""));
        assert_eq!(
            peer.frames.try_recv().unwrap(),
            Frame::Binary(Bytes::from_static(&[1, 2, 3]))
        );
    }

    #[tokio::test]
    async fn emit_with_ack_carries_id_and_resolves() {
        let (socket, mut peer) = test_socket("/");
        let rx = socket.emit_with_ack("welcome", vec![json!({})], &[], None);
        assert_eq!(rx.id(), 0);
        assert_eq!(next_text(&mut peer), r#"420["welcome",{}]"#);

        assert!(socket.engine().acks().resolve(
            0,
            AckResponse {
                args: vec![json!({"success": true})],
                attachments: vec![],
            }
        ));
        let response = rx.wait().await.unwrap();
        assert_eq!(response.first().unwrap()["success"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn emit_with_ack_uses_explicit_timeout() {
        let (socket, _peer) = test_socket("/");
        let rx = socket.emit_with_ack("welcome", vec![], &[], Some(Duration::from_millis(10)));
        assert_matches!(rx.wait().await, Err(AckError::Timeout));
    }

    #[tokio::test]
    async fn unsent_ack_request_is_cancelled() {
        let (socket, peer) = test_socket("/");
        drop(peer.frames);
        let rx = socket.emit_with_ack("welcome", vec![], &[], None);
        assert_matches!(rx.wait().await, Err(AckError::Cancelled));
        assert_eq!(socket.engine().acks().stats().cancelled, 1);
    }

    #[test]
    fn disconnect_requests_leave() {
        let (socket, mut peer) = test_socket("/game");
        assert!(socket.disconnect(DisconnectReason::ServerNamespaceDisconnect));
        assert_eq!(
            peer.commands.try_recv().unwrap(),
            SessionCommand::Leave {
                namespace: "/game".into(),
                reason: DisconnectReason::ServerNamespaceDisconnect,
            }
        );
    }

    #[test]
    fn close_flips_connected() {
        let (socket, _peer) = test_socket("/");
        assert!(socket.is_connected());
        socket.close();
        assert!(!socket.is_connected());
    }

    #[test]
    fn debug_names_ids() {
        let (socket, _peer) = test_socket("/chat");
        let text = format!("{socket:?}");
        assert!(text.contains("/chat"));
        assert!(text.contains(socket.id().as_str()));
    }
}
