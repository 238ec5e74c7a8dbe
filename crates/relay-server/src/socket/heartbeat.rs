//! Liveness monitoring and periodic `heartbeat` emission.

use std::sync::Arc;
use std::time::Duration;

use relay_core::now_iso;
use relay_protocol::EnginePacket;
use serde_json::json;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::connection::EngineConnection;
use super::socket::Socket;

/// Outcome of the liveness loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The peer stopped answering within the timeout window.
    TimedOut,
    /// The loop was cancelled externally.
    Cancelled,
}

/// Run liveness checks for a connection.
///
/// At each `interval` tick the alive flag is checked and reset. When the
/// peer has not answered since the previous tick the missed counter
/// increments; `max_missed` consecutive misses end the loop with
/// [`HeartbeatResult::TimedOut`].
///
/// With `send_pings` the loop also emits an engine `Ping` after each
/// successful check (the server-pings revision). Expired acks are swept on
/// every tick.
///
/// `max_missed` is `timeout / interval`, clamped to at least 1.
pub async fn run_heartbeat(
    connection: Arc<EngineConnection>,
    interval: Duration,
    timeout: Duration,
    send_pings: bool,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = check_interval.tick().await;

    let mut missed: u32 = 0;
    let interval_ms = interval.as_millis().max(1);
    #[allow(clippy::cast_possible_truncation)]
    let max_missed = (timeout.as_millis() / interval_ms).max(1) as u32;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                let _ = connection.acks().expire();
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    debug!(engine_id = %connection.id, missed, "liveness check missed");
                    if missed >= max_missed {
                        warn!(
                            engine_id = %connection.id,
                            silent_for = ?connection.last_seen_elapsed(),
                            "peer unresponsive, closing"
                        );
                        return HeartbeatResult::TimedOut;
                    }
                }
                if send_pings && !connection.send_engine(&EnginePacket::Ping(None)) {
                    debug!(engine_id = %connection.id, "ping not queued");
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

/// Emit a `heartbeat` event to `socket` every `every` until cancelled.
///
/// Payload: `{timestamp, namespace, socketId}`.
pub async fn run_heartbeat_emitter(socket: Socket, every: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval(every);
    let _ = ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let payload = json!({
                    "timestamp": now_iso(),
                    "namespace": socket.namespace(),
                    "socketId": socket.id(),
                });
                if !socket.emit("heartbeat", vec![payload]) {
                    debug!(socket_id = %socket.id(), "heartbeat emission dropped");
                }
            }
            () = cancel.cancelled() => {
                debug!(socket_id = %socket.id(), "heartbeat emitter stopped");
                return;
            }
        }
    }
}
