//! Event fan-out to namespace members.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use relay_core::{EngineId, SocketId};
use relay_protocol::{EngineVersion, Frame, Packet};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::registry::NamespaceRegistry;
use crate::metrics::BROADCAST_DELIVERIES_TOTAL;
use crate::socket::EngineConnection;

/// Tracks live engine connections and delivers events to namespace members.
pub struct BroadcastManager {
    /// Connected transports indexed by engine id.
    connections: RwLock<HashMap<EngineId, Arc<EngineConnection>>>,
    namespaces: Arc<NamespaceRegistry>,
}

impl BroadcastManager {
    /// Create a manager delivering to members of `namespaces`.
    pub fn new(namespaces: Arc<NamespaceRegistry>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            namespaces,
        }
    }

    /// Namespace membership this manager delivers to.
    pub fn namespaces(&self) -> &Arc<NamespaceRegistry> {
        &self.namespaces
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<EngineConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
    }

    /// Remove a connection by id.
    pub async fn remove(&self, engine_id: &EngineId) {
        let mut conns = self.connections.write().await;
        let _ = conns.remove(engine_id);
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Snapshot of every live connection.
    pub async fn connections(&self) -> Vec<Arc<EngineConnection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Emit `event` to every socket in `namespace`. Returns the number of
    /// sockets the event was queued for.
    pub async fn broadcast(
        &self,
        namespace: &str,
        event: &str,
        args: Vec<Value>,
        attachments: &[Bytes],
    ) -> usize {
        self.fan_out(namespace, None, event, args, attachments).await
    }

    /// Emit `event` to every socket in `namespace` except `except`.
    pub async fn broadcast_except(
        &self,
        namespace: &str,
        except: &SocketId,
        event: &str,
        args: Vec<Value>,
        attachments: &[Bytes],
    ) -> usize {
        self.fan_out(namespace, Some(except), event, args, attachments)
            .await
    }

    /// Emit `event` to one socket, wherever it joined.
    pub async fn emit_to(
        &self,
        socket_id: &SocketId,
        event: &str,
        args: Vec<Value>,
        attachments: &[Bytes],
    ) -> bool {
        let Some(socket) = self.namespaces.find(socket_id).await else {
            debug!(socket_id = %socket_id, event, "emit to unknown socket");
            return false;
        };
        socket.emit_binary(event, args, attachments)
    }

    async fn fan_out(
        &self,
        namespace: &str,
        except: Option<&SocketId>,
        event: &str,
        args: Vec<Value>,
        attachments: &[Bytes],
    ) -> usize {
        let packet = Packet::event(namespace, event, args).with_attachments(attachments.len());
        let members = self.namespaces.members(namespace).await;
        let mut encoded: HashMap<EngineVersion, Vec<Frame>> = HashMap::new();
        let mut delivered = 0;

        for socket in &members {
            if except == Some(socket.id()) {
                continue;
            }
            let version = socket.version();
            let frames = encoded
                .entry(version)
                .or_insert_with(|| Frame::encode_message(version, &packet, attachments))
                .clone();
            if socket.engine().send_frames(frames) {
                delivered += 1;
            } else {
                warn!(
                    socket_id = %socket.id(),
                    namespace,
                    event,
                    "failed to deliver broadcast to socket"
                );
            }
        }

        counter!(BROADCAST_DELIVERIES_TOTAL).increment(delivered as u64);
        debug!(namespace, event, recipients = delivered, "broadcast event");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::test_support::{
        TestPeer, drain_packets, socket_on, test_connection, test_connection_with,
    };
    use relay_protocol::PacketKind;
    use serde_json::json;

    fn manager() -> BroadcastManager {
        let registry = NamespaceRegistry::new(vec!["/".into(), "/chat".into()], false);
        BroadcastManager::new(Arc::new(registry))
    }

    async fn join(bm: &BroadcastManager, namespace: &str) -> (crate::socket::Socket, TestPeer) {
        let (conn, peer) = test_connection();
        bm.add(Arc::clone(&conn)).await;
        let socket = socket_on(&conn, namespace);
        bm.namespaces().add(socket.clone()).await;
        (socket, peer)
    }

    #[tokio::test]
    async fn add_and_remove_connections() {
        let bm = manager();
        let (conn, _peer) = test_connection();
        bm.add(Arc::clone(&conn)).await;
        assert_eq!(bm.connection_count().await, 1);
        assert_eq!(bm.connections().await.len(), 1);
        bm.remove(&conn.id).await;
        assert_eq!(bm.connection_count().await, 0);
        bm.remove(&EngineId::from("missing")).await;
    }

    #[tokio::test]
    async fn broadcast_reaches_namespace_only() {
        let bm = manager();
        let (_a, mut pa) = join(&bm, "/chat").await;
        let (_b, mut pb) = join(&bm, "/chat").await;
        let (_c, mut pc) = join(&bm, "/").await;

        let sent = bm.broadcast("/chat", "chatMessage", vec![json!({"message": "hi"})], &[]).await;
        assert_eq!(sent, 2);

        for peer in [&mut pa, &mut pb] {
            let packets = drain_packets(peer);
            assert_eq!(packets.len(), 1);
            assert_eq!(packets[0].namespace, "/chat");
            assert_eq!(packets[0].event_name(), Some("chatMessage"));
        }
        assert!(drain_packets(&mut pc).is_empty());
    }

    #[tokio::test]
    async fn broadcast_except_skips_sender() {
        let bm = manager();
        let (sender, mut ps) = join(&bm, "/").await;
        let (_other, mut po) = join(&bm, "/").await;

        let sent = bm.broadcast_except("/", sender.id(), "binaryEvent", vec![json!({})], &[]).await;
        assert_eq!(sent, 1);
        assert!(drain_packets(&mut ps).is_empty());
        assert_eq!(drain_packets(&mut po).len(), 1);
    }

    #[tokio::test]
    async fn attachments_follow_header_per_version() {
        let bm = manager();
        let (v4_conn, mut p4) = test_connection();
        let (v3_conn, mut p3) = test_connection_with(EngineVersion::V3);
        for conn in [&v4_conn, &v3_conn] {
            bm.add(Arc::clone(conn)).await;
            bm.namespaces().add(socket_on(conn, "/")).await;
        }

        let args = vec![json!({"binaryData": {"_placeholder": true, "num": 0}})];
        let sent = bm.broadcast("/", "binaryEvent", args, &[Bytes::from_static(&[7, 8])]).await;
        assert_eq!(sent, 2);

        let _header = p4.frames.try_recv().unwrap();
        assert_eq!(p4.frames.try_recv().unwrap(), Frame::Binary(Bytes::from_static(&[7, 8])));

        let header = p3.frames.try_recv().unwrap();
        assert!(matches!(header, Frame::Text(t) if t.starts_with("451-")));
        assert_eq!(p3.frames.try_recv().unwrap(), Frame::Binary(Bytes::from_static(&[4, 7, 8])));
    }

    #[tokio::test]
    async fn failed_recipient_does_not_abort_fan_out() {
        let bm = manager();
        let (_a, pa) = join(&bm, "/").await;
        let (_b, mut pb) = join(&bm, "/").await;
        drop(pa);

        let sent = bm.broadcast("/", "userConnected", vec![json!({})], &[]).await;
        assert_eq!(sent, 1);
        assert_eq!(drain_packets(&mut pb).len(), 1);
    }

    #[tokio::test]
    async fn emit_to_single_socket() {
        let bm = manager();
        let (a, mut pa) = join(&bm, "/chat").await;
        let (_b, mut pb) = join(&bm, "/chat").await;

        assert!(bm.emit_to(a.id(), "welcome", vec![json!({})], &[]).await);
        assert!(!bm.emit_to(&SocketId::new(), "welcome", vec![], &[]).await);

        let packets = drain_packets(&mut pa);
        assert_eq!(packets[0].kind, PacketKind::Event);
        assert!(drain_packets(&mut pb).is_empty());
    }

    #[tokio::test]
    async fn broadcast_to_empty_namespace() {
        let bm = manager();
        assert_eq!(bm.broadcast("/chat", "x", vec![], &[]).await, 0);
    }
}
