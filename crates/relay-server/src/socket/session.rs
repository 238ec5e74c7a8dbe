//! `WebSocket` session lifecycle: one engine connection from upgrade
//! through close.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use relay_core::{EngineId, SocketId};
use relay_protocol::engine::decode_binary;
use relay_protocol::packet::ROOT_NAMESPACE;
use relay_protocol::{
    AttachmentAssembler, EnginePacket, EngineVersion, Frame, OpenPayload, Packet, PacketKind,
    ProtocolError,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::ack::AckResponse;
use super::connection::{EngineConnection, SessionCommand};
use super::heartbeat::{HeartbeatResult, run_heartbeat, run_heartbeat_emitter};
use super::reason::DisconnectReason;
use super::socket::Socket;
use crate::config::ServerConfig;
use crate::events::{AckResponder, EventContext, EventRegistry, lifecycle};
use crate::metrics::{
    NAMESPACE_REJECTIONS_TOTAL, PACKET_ERRORS_TOTAL, PACKETS_RECEIVED_TOTAL, SOCKETS_ACTIVE,
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_PING_TIMEOUTS_TOTAL,
};
use crate::middleware::{ConnectRequest, MiddlewareChain};
use crate::namespace::BroadcastManager;

/// How long the writer gets to flush queued frames after the session ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Message sent with a refused namespace connect.
pub const INVALID_NAMESPACE: &str = "Invalid namespace";

/// Shared dependencies of every session.
pub struct SessionContext {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Connection tracking, membership, and fan-out.
    pub broadcast: Arc<BroadcastManager>,
    /// Event handlers.
    pub events: Arc<EventRegistry>,
    /// Namespace admission checks.
    pub middleware: Arc<MiddlewareChain>,
}

/// Run a session for an upgraded `WebSocket`.
///
/// 1. Queues the `open` packet (revision 3 also joins `/` right away)
/// 2. Decodes inbound frames and dispatches namespace packets
/// 3. Forwards outbound frames from the connection queue
/// 4. Runs liveness checks and closes unresponsive peers
/// 5. Leaves every namespace with one [`DisconnectReason`] on the way out
#[instrument(skip_all, fields(engine_id = %engine_id, eio = version.as_u8()))]
pub async fn run_ws_session(
    ws: WebSocket,
    engine_id: EngineId,
    version: EngineVersion,
    ctx: Arc<SessionContext>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let config = Arc::clone(&ctx.config);

    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(config.send_queue_capacity.max(1));
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    let conn_cancel = shutdown.child_token();
    let connection = Arc::new(EngineConnection::new(
        engine_id.clone(),
        version,
        frame_tx,
        cmd_tx,
        conn_cancel.clone(),
    ));

    let connection_start = Instant::now();
    info!("engine connection opened");
    counter!(WS_CONNECTIONS_TOTAL, "eio" => version.as_u8().to_string()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    ctx.broadcast.add(Arc::clone(&connection)).await;

    let _ = connection.send_engine(&EnginePacket::Open(OpenPayload {
        sid: engine_id.to_string(),
        upgrades: Vec::new(),
        ping_interval: config.ping_interval_ms,
        ping_timeout: config.ping_timeout_ms,
        max_payload: config.max_payload,
    }));

    // Outbound forwarder. Frames queued before cancellation are flushed.
    let writer_cancel = conn_cancel.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(to_ws_message(frame)).await.is_err() {
                        break;
                    }
                }
                () = writer_cancel.cancelled() => {
                    while let Ok(frame) = frame_rx.try_recv() {
                        if ws_tx.send(to_ws_message(frame)).await.is_err() {
                            break;
                        }
                    }
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let (interval, timeout) = liveness_window(&config, version);
    let mut liveness = tokio::spawn(run_heartbeat(
        Arc::clone(&connection),
        interval,
        timeout,
        version.server_pings(),
        conn_cancel.clone(),
    ));

    let mut session = Session::new(Arc::clone(&connection), Arc::clone(&ctx));
    if version == EngineVersion::V3 {
        session.connect_namespace(ROOT_NAMESPACE, None).await;
    }

    let reason = loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let outcome = match msg {
                    Some(Ok(msg)) => session.on_ws_message(msg).await,
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read failed");
                        Some(DisconnectReason::TransportError)
                    }
                    None => Some(DisconnectReason::TransportClose),
                };
                if let Some(reason) = outcome {
                    break reason;
                }
            }
            Some(command) = cmd_rx.recv() => {
                match command {
                    SessionCommand::Leave { namespace, reason } => {
                        session.leave_namespace(&namespace, reason).await;
                    }
                    SessionCommand::Close(reason) => break reason,
                }
            }
            result = &mut liveness => {
                break match result {
                    Ok(HeartbeatResult::TimedOut) => {
                        counter!(WS_PING_TIMEOUTS_TOTAL).increment(1);
                        DisconnectReason::PingTimeout
                    }
                    _ => DisconnectReason::ServerShuttingDown,
                };
            }
            () = shutdown.cancelled() => break DisconnectReason::ServerShuttingDown,
        }
    };

    // Clean up
    session.leave_all(reason).await;
    let cancelled = connection.acks().cancel_all();
    if cancelled > 0 {
        debug!(cancelled, "pending acks cancelled");
    }
    conn_cancel.cancel();
    liveness.abort();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        debug!("writer did not drain in time");
        writer.abort();
    }
    ctx.broadcast.remove(&connection.id).await;

    let duration = connection_start.elapsed();
    info!(
        %reason,
        duration_secs = duration.as_secs_f64(),
        dropped_frames = connection.drop_count(),
        "engine connection closed"
    );
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Liveness tick interval and timeout for a revision.
///
/// Revision 4: the server pings every `ping_interval` and expects a pong
/// before the next tick. Revision 3: the client pings, and the server
/// tolerates `ping_interval + ping_timeout` of silence.
pub fn liveness_window(config: &ServerConfig, version: EngineVersion) -> (Duration, Duration) {
    match version {
        EngineVersion::V4 => (config.ping_interval(), config.ping_timeout()),
        EngineVersion::V3 => (
            config.ping_interval() + config.ping_timeout(),
            config.ping_timeout(),
        ),
    }
}

fn to_ws_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data),
    }
}

/// Per-connection inbound state.
struct Session {
    connection: Arc<EngineConnection>,
    ctx: Arc<SessionContext>,
    assembler: AttachmentAssembler,
}

impl Session {
    fn new(connection: Arc<EngineConnection>, ctx: Arc<SessionContext>) -> Self {
        Self {
            connection,
            ctx,
            assembler: AttachmentAssembler::new(),
        }
    }

    /// Handle one `WebSocket` message. Returns a reason when the connection
    /// must close.
    async fn on_ws_message(&mut self, msg: Message) -> Option<DisconnectReason> {
        match msg {
            Message::Text(text) => {
                if let Err(e) = self.check_size(text.len()) {
                    return Some(protocol_failure(&e));
                }
                match EnginePacket::decode(text.as_str()) {
                    Ok(packet) => self.on_engine_packet(packet).await,
                    Err(e) => Some(protocol_failure(&e)),
                }
            }
            Message::Binary(data) => {
                if let Err(e) = self.check_size(data.len()) {
                    return Some(protocol_failure(&e));
                }
                let data = decode_binary(self.connection.version, data);
                match self.assembler.push_binary(data) {
                    Ok(Some(message)) => {
                        self.on_message(message.packet, message.attachments).await;
                        None
                    }
                    Ok(None) => None,
                    Err(e) => Some(protocol_failure(&e)),
                }
            }
            Message::Close(_) => {
                debug!("peer sent close frame");
                Some(DisconnectReason::TransportClose)
            }
            Message::Ping(_) | Message::Pong(_) => None,
        }
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        let limit = self.ctx.config.max_payload;
        if size > limit {
            return Err(ProtocolError::PayloadTooLarge { size, limit });
        }
        Ok(())
    }

    async fn on_engine_packet(&mut self, packet: EnginePacket) -> Option<DisconnectReason> {
        match packet {
            EnginePacket::Ping(data) => {
                self.connection.mark_alive();
                let _ = self.connection.send_engine(&EnginePacket::Pong(data));
                None
            }
            EnginePacket::Pong(_) => {
                self.connection.mark_alive();
                None
            }
            EnginePacket::Message(body) => {
                let packet = match Packet::decode(&body) {
                    Ok(packet) => packet,
                    Err(e) => return Some(protocol_failure(&e)),
                };
                match self.assembler.push_packet(packet) {
                    Ok(Some(message)) => {
                        self.on_message(message.packet, message.attachments).await;
                        None
                    }
                    Ok(None) => None,
                    Err(e) => Some(protocol_failure(&e)),
                }
            }
            EnginePacket::Close => Some(DisconnectReason::TransportClose),
            EnginePacket::Open(_) | EnginePacket::Upgrade | EnginePacket::Noop => {
                debug!(packet = %packet.encode(), "ignoring engine packet");
                None
            }
        }
    }

    /// Handle one complete namespace packet.
    async fn on_message(&self, packet: Packet, attachments: Vec<Bytes>) {
        counter!(PACKETS_RECEIVED_TOTAL, "kind" => packet.kind.name()).increment(1);
        match packet.kind {
            PacketKind::Connect => {
                self.connect_namespace(&packet.namespace, packet.data.as_ref())
                    .await;
            }
            PacketKind::Disconnect => {
                self.leave_namespace(&packet.namespace, DisconnectReason::ClientNamespaceDisconnect)
                    .await;
            }
            PacketKind::Event | PacketKind::BinaryEvent => {
                self.dispatch_event(packet, attachments).await;
            }
            PacketKind::Ack | PacketKind::BinaryAck => {
                let Some(id) = packet.id else {
                    debug!(namespace = %packet.namespace, "ack without id, ignoring");
                    return;
                };
                let args = packet.ack_args().to_vec();
                let _ = self
                    .connection
                    .acks()
                    .resolve(id, AckResponse { args, attachments });
            }
            PacketKind::ConnectError => {
                debug!(namespace = %packet.namespace, "peer sent connect error, ignoring");
            }
        }
    }

    /// Join `namespace`, or answer with `CONNECT_ERROR`.
    async fn connect_namespace(&self, namespace: &str, auth: Option<&Value>) {
        let connection = &self.connection;
        if connection.socket_id(namespace).is_some() {
            debug!(namespace, "namespace already joined");
            return;
        }

        let registry = self.ctx.broadcast.namespaces();
        if !registry.accepts(namespace) {
            warn!(namespace, "connect to unknown namespace refused");
            counter!(NAMESPACE_REJECTIONS_TOTAL, "reason" => "invalid_namespace").increment(1);
            let _ = connection.send_packet(&Packet::connect_error(namespace, INVALID_NAMESPACE), &[]);
            return;
        }

        let request = ConnectRequest {
            engine_id: &connection.id,
            namespace,
            auth,
            version: connection.version,
        };
        if let Err(message) = self.ctx.middleware.run(&request).await {
            counter!(NAMESPACE_REJECTIONS_TOTAL, "reason" => "middleware").increment(1);
            let _ = connection.send_packet(&Packet::connect_error(namespace, &message), &[]);
            return;
        }

        let socket = Socket::new(
            SocketId::new(),
            namespace,
            Arc::clone(connection),
            self.ctx.config.ack_timeout(),
            connection.cancel_token().child_token(),
        );
        connection.join(namespace, socket.id().clone());
        registry.add(socket.clone()).await;

        let data = match connection.version {
            EngineVersion::V4 => Some(json!({ "sid": socket.id() })),
            EngineVersion::V3 => None,
        };
        let _ = connection.send_packet(&Packet::connect(namespace, data), &[]);
        gauge!(SOCKETS_ACTIVE, "namespace" => namespace.to_owned()).increment(1.0);

        lifecycle::on_connect(&socket, &self.ctx.broadcast).await;

        if let Some(every) = self.ctx.config.heartbeat_emit_interval() {
            let cancel = socket.cancel_token().clone();
            let _ = tokio::spawn(run_heartbeat_emitter(socket, every, cancel));
        }
    }

    /// Remove the socket joined to `namespace`.
    async fn leave_namespace(&self, namespace: &str, reason: DisconnectReason) {
        let Some(socket_id) = self.connection.leave(namespace) else {
            debug!(namespace, "leave for namespace not joined");
            return;
        };
        if reason.notifies_client() {
            let _ = self.connection.send_packet(&Packet::disconnect(namespace), &[]);
        }

        let registry = self.ctx.broadcast.namespaces();
        if let Some(socket) = registry.get(namespace, &socket_id).await {
            lifecycle::on_disconnect(&socket, reason, &self.ctx.broadcast).await;
            socket.close();
        }
        gauge!(SOCKETS_ACTIVE, "namespace" => namespace.to_owned()).decrement(1.0);
    }

    /// Leave every joined namespace.
    async fn leave_all(&self, reason: DisconnectReason) {
        for (namespace, _) in self.connection.joined() {
            self.leave_namespace(&namespace, reason).await;
        }
    }

    async fn dispatch_event(&self, packet: Packet, attachments: Vec<Bytes>) {
        let Some(socket_id) = self.connection.socket_id(&packet.namespace) else {
            debug!(namespace = %packet.namespace, "event for namespace not joined, ignoring");
            return;
        };
        let Some(socket) = self
            .ctx
            .broadcast
            .namespaces()
            .get(&packet.namespace, &socket_id)
            .await
        else {
            return;
        };
        let Some(event) = packet.event_name().map(str::to_owned) else {
            counter!(PACKET_ERRORS_TOTAL).increment(1);
            return;
        };

        let ctx = EventContext {
            ack: packet.id.map(|id| AckResponder::new(socket.clone(), id)),
            args: packet.event_args().to_vec(),
            socket,
            event,
            attachments,
            broadcast: Arc::clone(&self.ctx.broadcast),
        };
        let _ = self.ctx.events.dispatch(ctx).await;
    }
}

fn protocol_failure(error: &ProtocolError) -> DisconnectReason {
    warn!(error = %error, "protocol error, closing connection");
    counter!(PACKET_ERRORS_TOTAL).increment(1);
    DisconnectReason::ParseError
}
