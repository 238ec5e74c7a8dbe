//! Socket lifecycle broadcasts: `welcome`, `userConnected`,
//! `userDisconnected`.

use std::sync::Arc;

use relay_core::now_iso;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::namespace::BroadcastManager;
use crate::socket::{AckError, DisconnectReason, Socket};

/// Greeting sent to every new socket.
pub const WELCOME_MESSAGE: &str = "Welcome to Socket.IO server!";

/// Greet a socket that just joined, then announce it to its namespace.
///
/// The socket must already be a namespace member so it receives its own
/// `userConnected`.
pub async fn on_connect(socket: &Socket, broadcast: &Arc<BroadcastManager>) {
    info!(
        socket_id = %socket.id(),
        engine_id = %socket.engine_id(),
        namespace = socket.namespace(),
        eio = socket.version().as_u8(),
        "socket connected"
    );

    let welcome = json!({
        "message": WELCOME_MESSAGE,
        "socketId": socket.id(),
    });
    let receiver = socket.emit_with_ack("welcome", vec![welcome], &[], None);
    let socket_id = socket.id().clone();
    let _ = tokio::spawn(async move {
        match receiver.wait().await {
            Ok(response) => info!(%socket_id, ack = ?response.args, "welcome ack from client"),
            Err(AckError::Timeout) => warn!(%socket_id, "welcome ack timed out"),
            Err(AckError::Cancelled) => debug!(%socket_id, "welcome ack cancelled"),
        }
    });

    let _ = broadcast
        .broadcast(
            socket.namespace(),
            "userConnected",
            vec![json!({
                "socketId": socket.id(),
                "timestamp": now_iso(),
                "namespace": socket.namespace(),
            })],
            &[],
        )
        .await;
}

/// Remove a departing socket from its namespace and tell the members left.
pub async fn on_disconnect(socket: &Socket, reason: DisconnectReason, broadcast: &Arc<BroadcastManager>) {
    info!(
        socket_id = %socket.id(),
        namespace = socket.namespace(),
        %reason,
        "socket disconnecting"
    );

    let _ = broadcast
        .namespaces()
        .remove(socket.namespace(), socket.id())
        .await;

    let remaining = broadcast
        .broadcast(
            socket.namespace(),
            "userDisconnected",
            vec![json!({
                "socketId": socket.id(),
                "reason": reason,
                "timestamp": now_iso(),
                "namespace": socket.namespace(),
            })],
            &[],
        )
        .await;

    info!(
        socket_id = %socket.id(),
        namespace = socket.namespace(),
        %reason,
        notified = remaining,
        "socket disconnected"
    );
}
