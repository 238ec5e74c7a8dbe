//! Prometheus metrics recorder and `/metrics` endpoint rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if another recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
///
/// Used when the global slot is taken (tests, embedded servers).
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// `WebSocket` connections opened total (counter, labels: eio).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// `WebSocket` disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active `WebSocket` connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Frames dropped because a recipient queue was full or closed (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Connections closed for missing the ping deadline (counter).
pub const WS_PING_TIMEOUTS_TOTAL: &str = "ws_ping_timeouts_total";
/// Active namespace sockets (gauge, labels: namespace).
pub const SOCKETS_ACTIVE: &str = "sockets_active";
/// Namespace joins refused (counter, labels: reason).
pub const NAMESPACE_REJECTIONS_TOTAL: &str = "namespace_rejections_total";
/// Inbound packets (counter, labels: kind).
pub const PACKETS_RECEIVED_TOTAL: &str = "packets_received_total";
/// Packets rejected by the decoder (counter).
pub const PACKET_ERRORS_TOTAL: &str = "packet_errors_total";
/// Events dispatched to a handler (counter, labels: event).
pub const EVENTS_HANDLED_TOTAL: &str = "events_handled_total";
/// Events with no registered handler (counter).
pub const EVENTS_UNHANDLED_TOTAL: &str = "events_unhandled_total";
/// Handler duration (histogram, labels: event).
pub const EVENT_DURATION_SECONDS: &str = "event_duration_seconds";
/// Broadcast deliveries (counter).
pub const BROADCAST_DELIVERIES_TOTAL: &str = "broadcast_deliveries_total";
/// Server acks requested (counter).
pub const ACKS_REQUESTED_TOTAL: &str = "acks_requested_total";
/// Server acks answered (counter).
pub const ACKS_RESOLVED_TOTAL: &str = "acks_resolved_total";
/// Server acks that expired unanswered (counter).
pub const ACKS_TIMED_OUT_TOTAL: &str = "acks_timed_out_total";
