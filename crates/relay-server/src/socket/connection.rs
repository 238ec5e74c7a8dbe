//! Engine connection state: one per `WebSocket`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use metrics::counter;
use parking_lot::Mutex;
use relay_core::{EngineId, SocketId};
use relay_protocol::{EnginePacket, EngineVersion, Frame, Packet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ack::AckManager;
use super::reason::DisconnectReason;
use crate::metrics::WS_SEND_DROPS_TOTAL;

/// Requests from socket handles to the session loop that owns the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Remove the socket joined to `namespace`.
    Leave {
        /// Namespace to leave.
        namespace: String,
        /// Reason reported to the namespace.
        reason: DisconnectReason,
    },
    /// Close the whole connection.
    Close(DisconnectReason),
}

/// A connected `WebSocket` and everything multiplexed over it.
pub struct EngineConnection {
    /// Engine connection id (the `sid` of the open packet).
    pub id: EngineId,
    /// Negotiated engine revision.
    pub version: EngineVersion,
    /// Outbound frame queue drained by the writer task.
    tx: mpsc::Sender<Frame>,
    /// Control channel into the session loop.
    commands: mpsc::UnboundedSender<SessionCommand>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the peer answered since the last liveness check.
    is_alive: AtomicBool,
    /// When the last liveness answer was received.
    last_seen: Mutex<Instant>,
    /// Frames dropped because the queue was full or closed.
    dropped_frames: AtomicU64,
    /// Acks requested by the server over this connection.
    acks: Arc<AckManager>,
    /// Namespace → socket joined over this connection.
    sockets: Mutex<HashMap<String, SocketId>>,
    /// Cancelled when the connection ends.
    cancel: CancellationToken,
}

impl EngineConnection {
    /// Create a new connection.
    pub fn new(
        id: EngineId,
        version: EngineVersion,
        tx: mpsc::Sender<Frame>,
        commands: mpsc::UnboundedSender<SessionCommand>,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            version,
            tx,
            commands,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
            acks: Arc::new(AckManager::new()),
            sockets: Mutex::new(HashMap::new()),
            cancel,
        }
    }

    /// Queue one frame.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// drop counter.
    pub fn send(&self, frame: Frame) -> bool {
        self.send_frames(vec![frame])
    }

    /// Queue frames that must stay together (a packet and its attachments).
    ///
    /// Either every frame is queued or none is.
    pub fn send_frames(&self, frames: Vec<Frame>) -> bool {
        if frames.is_empty() {
            return true;
        }
        match self.tx.try_reserve_many(frames.len()) {
            Ok(permits) => {
                for (permit, frame) in permits.zip(frames) {
                    permit.send(frame);
                }
                true
            }
            Err(_) => {
                let _ = self
                    .dropped_frames
                    .fetch_add(frames.len() as u64, Ordering::Relaxed);
                counter!(WS_SEND_DROPS_TOTAL).increment(frames.len() as u64);
                false
            }
        }
    }

    /// Queue an engine packet.
    pub fn send_engine(&self, packet: &EnginePacket) -> bool {
        self.send(Frame::engine(packet))
    }

    /// Queue a messaging packet followed by its attachments.
    pub fn send_packet(&self, packet: &Packet, attachments: &[Bytes]) -> bool {
        self.send_frames(Frame::encode_message(self.version, packet, attachments))
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (liveness answer received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last liveness answer (or establishment).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Acks requested over this connection.
    pub fn acks(&self) -> &Arc<AckManager> {
        &self.acks
    }

    /// Record that `socket_id` joined `namespace`.
    pub fn join(&self, namespace: &str, socket_id: SocketId) {
        let _ = self.sockets.lock().insert(namespace.to_owned(), socket_id);
    }

    /// Forget the socket joined to `namespace`.
    pub fn leave(&self, namespace: &str) -> Option<SocketId> {
        self.sockets.lock().remove(namespace)
    }

    /// Socket joined to `namespace`, if any.
    pub fn socket_id(&self, namespace: &str) -> Option<SocketId> {
        self.sockets.lock().get(namespace).cloned()
    }

    /// Every joined namespace with its socket id, sorted by namespace.
    pub fn joined(&self) -> Vec<(String, SocketId)> {
        let mut joined: Vec<(String, SocketId)> = self
            .sockets
            .lock()
            .iter()
            .map(|(nsp, id)| (nsp.clone(), id.clone()))
            .collect();
        joined.sort_by(|a, b| a.0.cmp(&b.0));
        joined
    }

    /// Ask the session loop to remove the socket joined to `namespace`.
    pub fn request_leave(&self, namespace: &str, reason: DisconnectReason) -> bool {
        self.commands
            .send(SessionCommand::Leave {
                namespace: namespace.to_owned(),
                reason,
            })
            .is_ok()
    }

    /// Ask the session loop to close the connection.
    pub fn request_close(&self, reason: DisconnectReason) -> bool {
        self.commands.send(SessionCommand::Close(reason)).is_ok()
    }

    /// Token cancelled when the connection ends.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the connection has ended.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn make_connection(
        capacity: usize,
    ) -> (
        EngineConnection,
        mpsc::Receiver<Frame>,
        mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        let (tx, rx) = mpsc::channel(capacity);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let conn = EngineConnection::new(
            EngineId::from("eng_1"),
            EngineVersion::V4,
            tx,
            cmd_tx,
            CancellationToken::new(),
        );
        (conn, rx, cmd_rx)
    }

    #[tokio::test]
    async fn send_frame_success() {
        let (conn, mut rx, _cmd) = make_connection(8);
        assert!(conn.send(Frame::Text("40".into())));
        assert_eq!(rx.recv().await.unwrap(), Frame::Text("40".into()));
    }

    #[test]
    fn send_to_closed_queue_returns_false() {
        let (conn, rx, _cmd) = make_connection(8);
        drop(rx);
        assert!(!conn.send(Frame::Text("2".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (conn, _rx, _cmd) = make_connection(1);
        assert!(conn.send(Frame::Text("a".into())));
        assert!(!conn.send(Frame::Text("b".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn grouped_frames_are_all_or_nothing() {
        let (conn, mut rx, _cmd) = make_connection(2);
        let frames = vec![
            Frame::Text("451-[\"bin\",{\"_placeholder\":true,\"num\":0}]".into()),
            Frame::Binary(Bytes::from_static(b"x")),
            Frame::Binary(Bytes::from_static(b"y")),
        ];
        assert!(!conn.send_frames(frames));
        assert_eq!(conn.drop_count(), 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_packet_encodes_for_version() {
        let (conn, mut rx, _cmd) = make_connection(8);
        let packet = Packet::event("/chat", "bin", vec![]).with_attachments(1);
        assert!(conn.send_packet(&packet, &[Bytes::from_static(&[9, 9])]));
        assert_matches!(rx.recv().await.unwrap(), Frame::Text(t) if t == "451-/chat,[\"bin\"]");
        assert_eq!(
            rx.recv().await.unwrap(),
            Frame::Binary(Bytes::from_static(&[9, 9]))
        );
    }

    #[test]
    fn send_engine_ping() {
        let (conn, mut rx, _cmd) = make_connection(8);
        assert!(conn.send_engine(&EnginePacket::Ping(None)));
        assert_eq!(rx.try_recv().unwrap(), Frame::Text("2".into()));
    }

    #[test]
    fn mark_alive_and_check() {
        let (conn, _rx, _cmd) = make_connection(8);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn join_and_leave_namespaces() {
        let (conn, _rx, _cmd) = make_connection(8);
        conn.join("/chat", SocketId::from("s1"));
        conn.join("/", SocketId::from("s0"));
        assert_eq!(conn.socket_id("/chat"), Some(SocketId::from("s1")));
        let joined: Vec<String> = conn.joined().into_iter().map(|(n, _)| n).collect();
        assert_eq!(joined, vec!["/", "/chat"]);
        assert_eq!(conn.leave("/chat"), Some(SocketId::from("s1")));
        assert!(conn.leave("/chat").is_none());
        assert!(conn.socket_id("/chat").is_none());
    }

    #[test]
    fn commands_reach_session() {
        let (conn, _rx, mut cmd) = make_connection(8);
        assert!(conn.request_leave("/game", DisconnectReason::ServerNamespaceDisconnect));
        assert!(conn.request_close(DisconnectReason::ServerShuttingDown));
        assert_eq!(
            cmd.try_recv().unwrap(),
            SessionCommand::Leave {
                namespace: "/game".into(),
                reason: DisconnectReason::ServerNamespaceDisconnect,
            }
        );
        assert_eq!(
            cmd.try_recv().unwrap(),
            SessionCommand::Close(DisconnectReason::ServerShuttingDown)
        );
    }

    #[test]
    fn cancel_token_marks_closed() {
        let (conn, _rx, _cmd) = make_connection(8);
        assert!(!conn.is_closed());
        conn.cancel_token().cancel();
        assert!(conn.is_closed());
    }

    #[test]
    fn connection_age_increases() {
        let (conn, _rx, _cmd) = make_connection(8);
        let age1 = conn.age();
        std::thread::sleep(Duration::from_millis(5));
        assert!(conn.age() > age1);
    }
}
