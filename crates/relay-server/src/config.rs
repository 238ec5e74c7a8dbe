//! Server configuration.

use std::time::Duration;

use relay_settings::RelaySettings;
use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Namespaces accepted at connect time.
    pub namespaces: Vec<String>,
    /// Accept connects to namespaces that are not configured.
    pub allow_dynamic_namespaces: bool,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Milliseconds between liveness pings.
    pub ping_interval_ms: u64,
    /// Milliseconds of silence tolerated after a ping interval elapses.
    pub ping_timeout_ms: u64,
    /// Max frame size in bytes.
    pub max_payload: usize,
    /// Default wait for acknowledgements requested by the server.
    pub ack_timeout_ms: u64,
    /// Period of the per-socket `heartbeat` emission, if enabled.
    pub heartbeat_emit_interval_secs: Option<u64>,
    /// Outbound frame queue depth per connection.
    pub send_queue_capacity: usize,
    /// Accept `EIO=3` clients.
    pub allow_eio3: bool,
    /// Seconds to wait for sessions to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.http_port,
            namespaces: settings.server.namespaces.clone(),
            allow_dynamic_namespaces: settings.server.allow_dynamic_namespaces,
            max_connections: settings.server.max_connections,
            ping_interval_ms: settings.engine.ping_interval_ms,
            ping_timeout_ms: settings.engine.ping_timeout_ms,
            max_payload: settings.engine.max_payload,
            ack_timeout_ms: settings.engine.ack_timeout_ms,
            heartbeat_emit_interval_secs: settings.engine.heartbeat_emit_interval_secs,
            send_queue_capacity: settings.engine.send_queue_capacity,
            allow_eio3: settings.engine.allow_eio3,
            shutdown_timeout_secs: settings.server.shutdown_timeout_secs,
        }
    }

    /// Ping interval as a `Duration`.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Ping timeout as a `Duration`.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Ack timeout as a `Duration`.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Heartbeat emission period, if enabled.
    pub fn heartbeat_emit_interval(&self) -> Option<Duration> {
        self.heartbeat_emit_interval_secs.map(Duration::from_secs)
    }

    /// Shutdown drain timeout as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let engine = relay_settings::EngineSettings::default();
        let server = relay_settings::ServerSettings::default();
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            namespaces: server.namespaces,
            allow_dynamic_namespaces: false,
            max_connections: server.max_connections,
            ping_interval_ms: engine.ping_interval_ms,
            ping_timeout_ms: engine.ping_timeout_ms,
            max_payload: engine.max_payload,
            ack_timeout_ms: engine.ack_timeout_ms,
            heartbeat_emit_interval_secs: None,
            send_queue_capacity: engine.send_queue_capacity,
            allow_eio3: true,
            shutdown_timeout_secs: server.shutdown_timeout_secs,
        }
    }
}
