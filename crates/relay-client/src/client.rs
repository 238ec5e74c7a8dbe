//! `RelayClient`: one WebSocket, one namespace.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use relay_protocol::binary;
use relay_protocol::{
    AttachmentAssembler, EnginePacket, EngineVersion, Frame, Message, OpenPayload, Packet,
    PacketKind,
};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::ack::{AckResponse, AckTracker, AckWaitError};
use crate::errors::{ClientError, Result};
use crate::reconnect::ReconnectPolicy;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Name of the local event delivered after a successful reconnection. Its
/// only argument is the attempt number that succeeded.
pub const RECONNECT_EVENT: &str = "reconnect";

/// Computes the arguments sent back when the server asks for an ack.
///
/// Called with the event name, its arguments, and this client's socket id.
pub type AckResponder = Arc<dyn Fn(&str, &[Value], &str) -> Vec<Value> + Send + Sync>;

/// Answer `{success, message, clientId}` to every ack request.
pub fn default_responder() -> AckResponder {
    Arc::new(|event: &str, _args: &[Value], client_id: &str| {
        vec![json!({
            "success": true,
            "message": format!("{event} received from relay client"),
            "clientId": client_id,
        })]
    })
}

/// Client settings.
#[derive(Clone)]
pub struct ClientOptions {
    /// How long `emit_with_ack` waits.
    pub ack_timeout: Duration,
    /// How long the handshake and namespace join may take.
    pub connect_timeout: Duration,
    /// Auth payload sent with the namespace connect.
    pub auth: Option<Value>,
    /// Answers server ack requests.
    pub responder: AckResponder,
    /// What happens when the transport drops.
    pub reconnection: ReconnectPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            auth: None,
            responder: default_responder(),
            reconnection: ReconnectPolicy::default(),
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("ack_timeout", &self.ack_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("auth", &self.auth)
            .field("reconnection", &self.reconnection)
            .finish_non_exhaustive()
    }
}

/// An event received from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingEvent {
    /// Event name.
    pub event: String,
    /// Event arguments (placeholders intact).
    pub args: Vec<Value>,
    /// Binary attachments in placeholder order.
    pub attachments: Vec<Bytes>,
    /// Whether the server asked for (and got) an ack.
    pub acked: bool,
}

impl IncomingEvent {
    /// First argument, or `Null`.
    pub fn data(&self) -> &Value {
        self.args.first().unwrap_or(&Value::Null)
    }

    /// Resolve a placeholder found in the arguments.
    pub fn binary(&self, placeholder: &Value) -> Option<&Bytes> {
        binary::resolve(placeholder, &self.attachments)
    }
}

/// Build the engine endpoint URL from a server base URL.
///
/// `ws://host:port` and `http://host:port` both work; a `/socket.io` path is
/// kept when present.
pub fn engine_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        base.to_owned()
    };
    let path = if base.ends_with("/socket.io") { "/" } else { "/socket.io/" };
    format!("{base}{path}?EIO=4&transport=websocket")
}

enum ClientCommand {
    Send(Vec<Frame>),
    Reconnect,
    Close,
}

/// Where to dial and what to join, kept for reconnection.
#[derive(Clone)]
struct Target {
    endpoint: String,
    namespace: String,
    auth: Option<Value>,
    connect_timeout: Duration,
}

/// Identity of the current connection. Changes on every reconnection.
struct Identity {
    socket_id: String,
    engine: OpenPayload,
}

/// State shared between the handle and the connection task.
struct Shared {
    identity: Mutex<Identity>,
    connected: AtomicBool,
    reconnects: AtomicU32,
}

/// A connected client.
pub struct RelayClient {
    namespace: String,
    options: ClientOptions,
    acks: Arc<AckTracker>,
    shared: Arc<Shared>,
    cmd_tx: mpsc::UnboundedSender<ClientCommand>,
    events: mpsc::UnboundedReceiver<IncomingEvent>,
    handle: JoinHandle<()>,
}

impl RelayClient {
    /// Open a WebSocket to `url` and join `namespace`.
    pub async fn connect(url: &str, namespace: &str, options: ClientOptions) -> Result<Self> {
        let target = Target {
            endpoint: engine_url(url),
            namespace: namespace.to_owned(),
            auth: options.auth.clone(),
            connect_timeout: options.connect_timeout,
        };
        let (ws, engine, socket_id) = dial(&target).await?;
        info!(namespace, socket_id = %socket_id, engine_id = %engine.sid, "connected");

        let shared = Arc::new(Shared {
            identity: Mutex::new(Identity {
                socket_id: socket_id.clone(),
                engine,
            }),
            connected: AtomicBool::new(true),
            reconnects: AtomicU32::new(0),
        });
        let acks = Arc::new(AckTracker::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let state = LoopState {
            namespace: namespace.to_owned(),
            socket_id,
            acks: Arc::clone(&acks),
            events: events_tx,
            responder: Arc::clone(&options.responder),
            assembler: AttachmentAssembler::new(),
            shared: Arc::clone(&shared),
        };
        let handle = tokio::spawn(client_loop(
            ws,
            cmd_rx,
            state,
            target,
            options.reconnection,
        ));

        Ok(Self {
            namespace: namespace.to_owned(),
            options,
            acks,
            shared,
            cmd_tx,
            events,
            handle,
        })
    }

    /// Namespace socket id assigned by the server on the current connection.
    pub fn socket_id(&self) -> String {
        self.shared.identity.lock().socket_id.clone()
    }

    /// Engine connection id.
    pub fn engine_id(&self) -> String {
        self.shared.identity.lock().engine.sid.clone()
    }

    /// The handshake the server sent on the current connection.
    pub fn handshake(&self) -> OpenPayload {
        self.shared.identity.lock().engine.clone()
    }

    /// Namespace this client joined.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Acknowledgement counters.
    pub fn acks(&self) -> &Arc<AckTracker> {
        &self.acks
    }

    /// Successful reconnections so far.
    pub fn reconnects(&self) -> u32 {
        self.shared.reconnects.load(Ordering::Relaxed)
    }

    /// Whether a transport is up right now.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed) && !self.handle.is_finished()
    }

    /// Drop the current transport and dial again, following the attempt
    /// budget and backoff of the reconnection policy even when automatic
    /// reconnection is off.
    pub fn reconnect(&self) -> Result<()> {
        self.cmd_tx
            .send(ClientCommand::Reconnect)
            .map_err(|_| ClientError::Closed)
    }

    fn send(&self, packet: &Packet, attachments: &[Bytes]) -> Result<()> {
        let frames = Frame::encode_message(EngineVersion::V4, packet, attachments);
        self.cmd_tx
            .send(ClientCommand::Send(frames))
            .map_err(|_| ClientError::Closed)
    }

    /// Emit an event without asking for an ack.
    ///
    /// While a reconnection is in progress the frames are held back and
    /// flushed once the namespace is joined again.
    pub fn emit(&self, event: &str, args: Vec<Value>) -> Result<()> {
        self.send(&Packet::event(&self.namespace, event, args), &[])
    }

    /// Emit an event whose arguments reference `attachments` through
    /// placeholders.
    pub fn emit_binary(&self, event: &str, args: Vec<Value>, attachments: &[Bytes]) -> Result<()> {
        let packet = Packet::event(&self.namespace, event, args).with_attachments(attachments.len());
        self.send(&packet, attachments)
    }

    /// Emit an event and wait for the server's ack.
    pub async fn emit_with_ack(
        &self,
        event: &str,
        args: Vec<Value>,
        attachments: &[Bytes],
    ) -> Result<AckResponse> {
        let id = self.acks.next_id();
        let pending = self.acks.register(id, self.options.ack_timeout);
        let packet = Packet::event(&self.namespace, event, args)
            .with_id(id)
            .with_attachments(attachments.len());
        self.send(&packet, attachments)?;

        pending.wait().await.map_err(|e| match e {
            AckWaitError::Timeout => ClientError::AckTimeout {
                event: event.to_owned(),
                timeout_ms: u64::try_from(self.options.ack_timeout.as_millis()).unwrap_or(u64::MAX),
            },
            AckWaitError::Cancelled => ClientError::Closed,
        })
    }

    /// Next event from the server, or `None` once the connection closed
    /// for good.
    pub async fn next_event(&mut self) -> Option<IncomingEvent> {
        self.events.recv().await
    }

    /// Wait for an event named `event`, skipping others.
    pub async fn wait_for(&mut self, event: &str, timeout: Duration) -> Result<IncomingEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, self.events.recv())
                .await
                .map_err(|_| ClientError::AckTimeout {
                    event: event.to_owned(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })?;
            match next {
                Some(incoming) if incoming.event == event => return Ok(incoming),
                Some(other) => debug!(event = %other.event, "skipping event"),
                None => return Err(ClientError::Closed),
            }
        }
    }

    /// Leave the namespace and close the WebSocket.
    pub async fn disconnect(self) {
        let _ = self.cmd_tx.send(ClientCommand::Close);
        if tokio::time::timeout(Duration::from_secs(2), self.handle).await.is_err() {
            warn!(namespace = %self.namespace, "client loop did not stop in time");
        }
    }
}

impl fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let identity = self.shared.identity.lock();
        f.debug_struct("RelayClient")
            .field("namespace", &self.namespace)
            .field("socket_id", &identity.socket_id)
            .field("engine_id", &identity.engine.sid)
            .finish_non_exhaustive()
    }
}

fn to_ws(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text.into()),
        Frame::Binary(data) => WsMessage::Binary(data),
    }
}

async fn send_engine(ws: &mut WsStream, packet: &EnginePacket) -> Result<()> {
    ws.send(WsMessage::Text(packet.encode().into()))
        .await
        .map_err(|_| ClientError::Closed)
}

/// Open the WebSocket and join the namespace, each step bounded by the
/// connect timeout.
async fn dial(target: &Target) -> Result<(WsStream, OpenPayload, String)> {
    let endpoint = &target.endpoint;
    let (mut ws, _) = tokio::time::timeout(target.connect_timeout, connect_async(endpoint))
        .await
        .map_err(|_| ClientError::Connect {
            url: endpoint.clone(),
            reason: "timed out".into(),
        })?
        .map_err(|e| ClientError::Connect {
            url: endpoint.clone(),
            reason: e.to_string(),
        })?;

    let (engine, socket_id) = tokio::time::timeout(
        target.connect_timeout,
        handshake(&mut ws, &target.namespace, target.auth.clone()),
    )
    .await
    .map_err(|_| ClientError::Handshake("timed out".into()))??;
    Ok((ws, engine, socket_id))
}
/// Read the open packet, join the namespace, and return the engine
/// handshake plus the namespace socket id.
async fn handshake(
    ws: &mut WsStream,
    namespace: &str,
    auth: Option<Value>,
) -> Result<(OpenPayload, String)> {
    let mut open = None;
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| ClientError::Handshake(e.to_string()))?;
        let WsMessage::Text(text) = msg else { continue };
        match EnginePacket::decode(text.as_str())? {
            EnginePacket::Open(payload) => {
                open = Some(payload);
                break;
            }
            EnginePacket::Close => break,
            _ => {}
        }
    }
    let open = open.ok_or_else(|| ClientError::Handshake("no open packet".into()))?;

    let connect = Packet::connect(namespace, auth);
    send_engine(ws, &EnginePacket::Message(connect.encode())).await?;

    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| ClientError::Handshake(e.to_string()))?;
        let WsMessage::Text(text) = msg else { continue };
        let body = match EnginePacket::decode(text.as_str())? {
            EnginePacket::Message(body) => body,
            EnginePacket::Ping(data) => {
                send_engine(ws, &EnginePacket::Pong(data)).await?;
                continue;
            }
            EnginePacket::Close => break,
            _ => continue,
        };
        let packet = Packet::decode(&body)?;
        if packet.namespace != namespace {
            continue;
        }
        match packet.kind {
            PacketKind::Connect => {
                let sid = packet
                    .data
                    .as_ref()
                    .and_then(|d| d.get("sid"))
                    .and_then(Value::as_str)
                    .map_or_else(|| open.sid.clone(), str::to_owned);
                return Ok((open, sid));
            }
            PacketKind::ConnectError => {
                let message = packet.error_message().unwrap_or("refused");
                return Err(ClientError::Handshake(format!(
                    "namespace {namespace} refused: {message}"
                )));
            }
            _ => {}
        }
    }
    Err(ClientError::Closed)
}

struct LoopState {
    namespace: String,
    socket_id: String,
    acks: Arc<AckTracker>,
    events: mpsc::UnboundedSender<IncomingEvent>,
    responder: AckResponder,
    assembler: AttachmentAssembler,
    shared: Arc<Shared>,
}

/// What to do after an inbound frame.
enum Step {
    Reply(Vec<Frame>),
    /// The transport went away underneath the namespace.
    Lost,
    /// The server closed the namespace.
    Stop,
}

impl LoopState {
    fn on_text(&mut self, text: &str) -> Step {
        let body = match EnginePacket::decode(text) {
            Ok(EnginePacket::Message(body)) => body,
            Ok(EnginePacket::Ping(data)) => {
                return Step::Reply(vec![Frame::engine(&EnginePacket::Pong(data))]);
            }
            Ok(EnginePacket::Close) => return Step::Lost,
            Ok(_) => return Step::Reply(Vec::new()),
            Err(e) => {
                warn!(error = %e, "undecodable engine packet");
                return Step::Reply(Vec::new());
            }
        };
        match Packet::decode(&body).and_then(|p| self.assembler.push_packet(p)) {
            Ok(Some(message)) => self.on_message(message),
            Ok(None) => Step::Reply(Vec::new()),
            Err(e) => {
                warn!(error = %e, "undecodable packet");
                self.assembler.reset();
                Step::Reply(Vec::new())
            }
        }
    }

    fn on_binary(&mut self, data: Bytes) -> Step {
        match self.assembler.push_binary(data) {
            Ok(Some(message)) => self.on_message(message),
            Ok(None) => Step::Reply(Vec::new()),
            Err(e) => {
                warn!(error = %e, "unexpected binary frame");
                Step::Reply(Vec::new())
            }
        }
    }

    fn on_message(&mut self, message: Message) -> Step {
        let Message {
            packet,
            attachments,
        } = message;
        if packet.namespace != self.namespace {
            debug!(namespace = %packet.namespace, "packet for another namespace");
            return Step::Reply(Vec::new());
        }
        match packet.kind {
            PacketKind::Event | PacketKind::BinaryEvent => {
                let Some(event) = packet.event_name() else {
                    return Step::Reply(Vec::new());
                };
                let args = packet.event_args().to_vec();
                let mut replies = Vec::new();
                if let Some(id) = packet.id {
                    let answer = (self.responder)(event, &args, &self.socket_id);
                    let ack = Packet::ack(&self.namespace, id, answer);
                    replies.extend(Frame::encode_message(EngineVersion::V4, &ack, &[]));
                }
                let _ = self.events.send(IncomingEvent {
                    event: event.to_owned(),
                    args,
                    attachments,
                    acked: packet.id.is_some(),
                });
                Step::Reply(replies)
            }
            PacketKind::Ack | PacketKind::BinaryAck => {
                if let Some(id) = packet.id {
                    let response = AckResponse {
                        args: packet.ack_args().to_vec(),
                        attachments,
                    };
                    if !self.acks.resolve(id, response) {
                        debug!(ack_id = id, "ack for unknown id");
                    }
                }
                Step::Reply(Vec::new())
            }
            PacketKind::Disconnect => {
                info!(namespace = %self.namespace, "server closed the namespace");
                Step::Stop
            }
            PacketKind::Connect | PacketKind::ConnectError => Step::Reply(Vec::new()),
        }
    }
}

/// How one connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    /// Closed on purpose, by us or by the server.
    Closed,
    /// The transport dropped.
    Dropped,
    /// `RelayClient::reconnect` asked for a fresh transport.
    Requested,
}

async fn client_loop(
    mut ws: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
    mut state: LoopState,
    target: Target,
    policy: ReconnectPolicy,
) {
    let mut backlog = Vec::new();
    loop {
        let ended = run_connection(ws, &mut cmd_rx, &mut state, backlog).await;
        state.shared.connected.store(false, Ordering::Relaxed);
        state.assembler.reset();
        match ended {
            Ended::Closed => break,
            Ended::Dropped if !policy.enabled => break,
            Ended::Dropped | Ended::Requested => {}
        }

        let cancelled = state.acks.cancel_all();
        warn!(namespace = %state.namespace, ?ended, cancelled, "transport lost, reconnecting");
        match reconnect(&target, &policy, &mut cmd_rx, &mut state).await {
            Some((next, held)) => {
                ws = next;
                backlog = held;
            }
            None => break,
        }
    }

    let cancelled = state.acks.cancel_all();
    debug!(socket_id = %state.socket_id, cancelled, "client loop stopped");
}

/// Pump one WebSocket until it ends. `backlog` is sent first.
async fn run_connection(
    ws: WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    state: &mut LoopState,
    backlog: Vec<Frame>,
) -> Ended {
    let (mut ws_tx, mut ws_rx) = ws.split();
    for frame in backlog {
        if ws_tx.send(to_ws(frame)).await.is_err() {
            return Ended::Dropped;
        }
    }

    loop {
        let step = tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::Send(frames)) => Step::Reply(frames),
                Some(ClientCommand::Reconnect) => {
                    let _ = ws_tx.close().await;
                    return Ended::Requested;
                }
                Some(ClientCommand::Close) | None => {
                    let leave = Packet::disconnect(&state.namespace);
                    let frame = Frame::engine(&EnginePacket::Message(leave.encode()));
                    let _ = ws_tx.send(to_ws(frame)).await;
                    let _ = ws_tx.close().await;
                    return Ended::Closed;
                }
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => state.on_text(text.as_str()),
                Some(Ok(WsMessage::Binary(data))) => state.on_binary(data),
                Some(Ok(WsMessage::Close(_)) | Err(_)) | None => Step::Lost,
                Some(Ok(_)) => Step::Reply(Vec::new()),
            },
        };

        match step {
            Step::Reply(frames) => {
                for frame in frames {
                    if ws_tx.send(to_ws(frame)).await.is_err() {
                        return Ended::Dropped;
                    }
                }
            }
            Step::Lost => return Ended::Dropped,
            Step::Stop => return Ended::Closed,
        }
    }
}

/// Dial until the namespace is joined again or the attempt budget runs out.
///
/// Frames emitted in the meantime are held and returned with the new socket.
/// Returns `None` when the budget is spent or the handle asked to close.
async fn reconnect(
    target: &Target,
    policy: &ReconnectPolicy,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    state: &mut LoopState,
) -> Option<(WsStream, Vec<Frame>)> {
    let mut held = Vec::new();
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        if !policy.allows(attempt) {
            warn!(namespace = %state.namespace, attempts = attempt - 1, "giving up reconnecting");
            return None;
        }
        let delay = policy.delay_for(attempt);
        info!(
            namespace = %state.namespace,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnect attempt"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(ClientCommand::Send(frames)) => held.extend(frames),
                    Some(ClientCommand::Reconnect) => {}
                    Some(ClientCommand::Close) | None => return None,
                },
            }
        }

        match dial(target).await {
            Ok((ws, engine, socket_id)) => {
                info!(
                    namespace = %state.namespace,
                    attempt,
                    socket_id = %socket_id,
                    engine_id = %engine.sid,
                    "reconnected"
                );
                state.socket_id.clone_from(&socket_id);
                *state.shared.identity.lock() = Identity { socket_id, engine };
                state.shared.connected.store(true, Ordering::Relaxed);
                let _ = state.shared.reconnects.fetch_add(1, Ordering::Relaxed);
                let _ = state.events.send(IncomingEvent {
                    event: RECONNECT_EVENT.to_owned(),
                    args: vec![json!(attempt)],
                    attachments: Vec::new(),
                    acked: false,
                });
                return Some((ws, held));
            }
            Err(e) => warn!(namespace = %state.namespace, attempt, error = %e, "reconnect attempt failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type ServerWs = WebSocketStream<TcpStream>;

    async fn fake_server() -> (String, tokio::task::JoinHandle<ServerWs>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_async(stream).await.unwrap()
        });
        (format!("ws://{addr}"), handle)
    }

    async fn recv_text(ws: &mut ServerWs) -> String {
        loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return text.as_str().to_owned(),
                _ => {}
            }
        }
    }

    async fn send_text(ws: &mut ServerWs, text: &str) {
        ws.send(WsMessage::Text(text.to_owned().into())).await.unwrap();
    }

    const OPEN: &str =
        r#"0{"sid":"eng1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

    #[test]
    fn engine_url_forms() {
        assert_eq!(
            engine_url("ws://localhost:3000"),
            "ws://localhost:3000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            engine_url("http://localhost:3000/"),
            "ws://localhost:3000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            engine_url("https://example.com/socket.io"),
            "wss://example.com/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn default_responder_shape() {
        let answer = default_responder()("welcome", &[], "abc");
        assert_eq!(answer.len(), 1);
        assert_eq!(answer[0]["success"], true);
        assert_eq!(answer[0]["message"], "welcome received from relay client");
        assert_eq!(answer[0]["clientId"], "abc");
    }

    #[test]
    fn incoming_event_resolves_placeholders() {
        let event = IncomingEvent {
            event: "binaryEvent".into(),
            args: vec![json!({"binaryData": binary::placeholder(0)})],
            attachments: vec![Bytes::from_static(&[1, 2, 3])],
            acked: false,
        };
        let data = event.binary(&event.data()["binaryData"]).unwrap();
        assert_eq!(&data[..], &[1, 2, 3]);
        assert!(event.binary(&json!(null)).is_none());
    }

    #[tokio::test]
    async fn joins_namespace_and_answers_ack_requests() {
        let (url, server) = fake_server().await;
        let connect = tokio::spawn(async move {
            RelayClient::connect(&url, "/chat", ClientOptions::default()).await
        });

        let mut ws = server.await.unwrap();
        send_text(&mut ws, OPEN).await;
        assert_eq!(recv_text(&mut ws).await, "40/chat,");
        send_text(&mut ws, r#"40/chat,{"sid":"sock1"}"#).await;

        let mut client = connect.await.unwrap().unwrap();
        assert_eq!(client.socket_id(), "sock1");
        assert_eq!(client.engine_id(), "eng1");
        assert_eq!(client.handshake().ping_interval, 25_000);

        send_text(&mut ws, r#"42/chat,3["welcome",{"message":"hi"}]"#).await;
        let reply = recv_text(&mut ws).await;
        assert!(reply.starts_with("43/chat,3["), "{reply}");
        assert!(reply.contains("sock1"));

        let event = client.next_event().await.unwrap();
        assert_eq!(event.event, "welcome");
        assert!(event.acked);
        assert_eq!(event.data()["message"], "hi");

        send_text(&mut ws, "2").await;
        assert_eq!(recv_text(&mut ws).await, "3");
    }

    #[tokio::test]
    async fn emit_with_ack_resolves_on_server_answer() {
        let (url, server) = fake_server().await;
        let connect = tokio::spawn(async move {
            RelayClient::connect(&url, "/", ClientOptions::default()).await
        });
        let mut ws = server.await.unwrap();
        send_text(&mut ws, OPEN).await;
        assert_eq!(recv_text(&mut ws).await, "40");
        send_text(&mut ws, r#"40{"sid":"s"}"#).await;
        let client = connect.await.unwrap().unwrap();

        let ack = client.emit_with_ack("customEvent", vec![json!({"a": 1})], &[]);
        let server_side = async {
            let frame = recv_text(&mut ws).await;
            assert_eq!(frame, r#"420["customEvent",{"a":1}]"#);
            send_text(&mut ws, r#"430[{"success":true}]"#).await;
        };
        let (response, ()) = tokio::join!(ack, server_side);
        assert_eq!(response.unwrap().first().unwrap()["success"], true);
        assert_eq!(client.acks().stats().succeeded, 1);
    }

    #[tokio::test]
    async fn binary_emit_sends_attachment_frames() {
        let (url, server) = fake_server().await;
        let connect = tokio::spawn(async move {
            RelayClient::connect(&url, "/", ClientOptions::default()).await
        });
        let mut ws = server.await.unwrap();
        send_text(&mut ws, OPEN).await;
        let _ = recv_text(&mut ws).await;
        send_text(&mut ws, r#"40{"sid":"s"}"#).await;
        let client = connect.await.unwrap().unwrap();

        client
            .emit_binary(
                "binaryEvent",
                vec![json!({"binaryData": binary::placeholder(0)})],
                &[Bytes::from_static(b"xyz")],
            )
            .unwrap();

        assert!(recv_text(&mut ws).await.starts_with("451-["));
        match ws.next().await.unwrap().unwrap() {
            WsMessage::Binary(data) => assert_eq!(&data[..], b"xyz"),
            other => panic!("expected binary frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_namespace_is_a_handshake_error() {
        let (url, server) = fake_server().await;
        let connect = tokio::spawn(async move {
            RelayClient::connect(&url, "/nope", ClientOptions::default()).await
        });
        let mut ws = server.await.unwrap();
        send_text(&mut ws, OPEN).await;
        assert_eq!(recv_text(&mut ws).await, "40/nope,");
        send_text(&mut ws, r#"44/nope,{"message":"Invalid namespace"}"#).await;

        let err = connect.await.unwrap().unwrap_err();
        assert_matches!(err, ClientError::Handshake(ref msg) if msg.contains("Invalid namespace"));
    }

    #[tokio::test]
    async fn server_close_cancels_pending_acks() {
        let (url, server) = fake_server().await;
        let options = ClientOptions {
            ack_timeout: Duration::from_secs(30),
            ..ClientOptions::default()
        };
        let connect = tokio::spawn(async move { RelayClient::connect(&url, "/", options).await });
        let mut ws = server.await.unwrap();
        send_text(&mut ws, OPEN).await;
        let _ = recv_text(&mut ws).await;
        send_text(&mut ws, r#"40{"sid":"s"}"#).await;
        let mut client = connect.await.unwrap().unwrap();

        let ack = client.emit_with_ack("customEvent", vec![], &[]);
        let server_side = async {
            let _ = recv_text(&mut ws).await;
            ws.close(None).await.unwrap();
        };
        let (result, ()) = tokio::join!(ack, server_side);
        assert_matches!(result, Err(ClientError::Closed));
        assert!(client.next_event().await.is_none());
    }

    fn quick_reconnect(attempts: Option<u32>) -> ClientOptions {
        ClientOptions {
            connect_timeout: Duration::from_secs(2),
            reconnection: ReconnectPolicy {
                enabled: true,
                attempts,
                delay: Duration::from_millis(10),
                delay_max: Duration::from_millis(40),
                randomization_factor: 0.0,
            },
            ..ClientOptions::default()
        }
    }

    async fn accept_and_join(listener: &TcpListener, engine_sid: &str, sid: &str) -> ServerWs {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let open = OPEN.replace("eng1", engine_sid);
        send_text(&mut ws, &open).await;
        assert_eq!(recv_text(&mut ws).await, "40/chat,");
        send_text(&mut ws, &format!(r#"40/chat,{{"sid":"{sid}"}}"#)).await;
        ws
    }

    #[tokio::test]
    async fn rejoins_namespace_after_server_restart() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let mut first = accept_and_join(&listener, "eng1", "first").await;
            first.close(None).await.unwrap();
            drop(first);

            let mut second = accept_and_join(&listener, "eng2", "second").await;
            recv_text(&mut second).await
        });

        let mut client = RelayClient::connect(&url, "/chat", quick_reconnect(None))
            .await
            .unwrap();
        assert_eq!(client.socket_id(), "first");

        let event = client
            .wait_for(RECONNECT_EVENT, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(event.data(), &json!(1));
        assert_eq!(client.socket_id(), "second");
        assert_eq!(client.engine_id(), "eng2");
        assert_eq!(client.reconnects(), 1);
        assert!(client.is_connected());

        client.emit("chatMessage", vec![json!({"text": "again"})]).unwrap();
        let received = server.await.unwrap();
        assert_eq!(received, r#"42/chat,["chatMessage",{"text":"again"}]"#);
    }

    #[tokio::test]
    async fn gives_up_when_attempts_are_spent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let mut ws = accept_and_join(&listener, "eng1", "only").await;
            drop(listener);
            ws.close(None).await.unwrap();
        });

        let mut client = RelayClient::connect(&url, "/chat", quick_reconnect(Some(2)))
            .await
            .unwrap();
        server.await.unwrap();

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            let mut seen = Vec::new();
            while let Some(event) = client.next_event().await {
                seen.push(event.event);
            }
            seen
        })
        .await
        .unwrap();
        assert!(!drained.iter().any(|e| e == RECONNECT_EVENT), "{drained:?}");
        assert_eq!(client.reconnects(), 0);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn server_namespace_disconnect_is_final() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let mut ws = accept_and_join(&listener, "eng1", "only").await;
            send_text(&mut ws, "41/chat,").await;
            // Keep accepting so a reconnect would succeed if one were tried.
            let _ = listener.accept().await;
        });

        let mut client = RelayClient::connect(&url, "/chat", quick_reconnect(None))
            .await
            .unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), client.next_event())
            .await
            .unwrap();
        assert!(next.is_none());
        assert_eq!(client.reconnects(), 0);
        server.abort();
    }

    #[tokio::test]
    async fn absurd_attachment_count_is_dropped_not_fatal() {
        let (url, server) = fake_server().await;
        let connect = tokio::spawn(async move {
            RelayClient::connect(&url, "/", ClientOptions::default()).await
        });
        let mut ws = server.await.unwrap();
        send_text(&mut ws, OPEN).await;
        let _ = recv_text(&mut ws).await;
        send_text(&mut ws, r#"40{"sid":"s"}"#).await;
        let mut client = connect.await.unwrap().unwrap();

        send_text(&mut ws, r#"4518446744073709551615-["binaryEvent",{}]"#).await;
        send_text(&mut ws, r#"42["chatMessage",{"text":"still here"}]"#).await;

        let event = client
            .wait_for("chatMessage", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(event.data()["text"], "still here");
        assert!(client.is_connected());
    }
}
