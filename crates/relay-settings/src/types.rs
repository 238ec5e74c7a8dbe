//! Settings types.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]` so a
//! settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and namespace settings.
    pub server: ServerSettings,
    /// Engine liveness, payload and acknowledgement settings.
    pub engine: EngineSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.namespaces.is_empty() {
            return Err(SettingsError::InvalidValue(
                "server.namespaces must not be empty".into(),
            ));
        }
        if let Some(bad) = self.server.namespaces.iter().find(|n| !n.starts_with('/')) {
            return Err(SettingsError::InvalidValue(format!(
                "namespace {bad:?} must start with '/'"
            )));
        }
        if self.engine.ping_interval_ms == 0 || self.engine.ping_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "engine ping interval and timeout must be positive".into(),
            ));
        }
        if self.engine.ack_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "engine.ackTimeoutMs must be positive".into(),
            ));
        }
        if self.engine.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "engine.sendQueueCapacity must be positive".into(),
            ));
        }
        if self.engine.heartbeat_emit_interval_secs == Some(0) {
            return Err(SettingsError::InvalidValue(
                "engine.heartbeatEmitIntervalSecs must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener and namespace settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP port serving `/socket.io/`, `/health` and `/metrics`.
    pub http_port: u16,
    /// Namespaces accepted at connect time.
    pub namespaces: Vec<String>,
    /// Accept connects to namespaces that are not configured.
    pub allow_dynamic_namespaces: bool,
    /// Maximum simultaneous WebSocket connections.
    pub max_connections: usize,
    /// Seconds to wait for sessions to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 3000,
            namespaces: ["/", "/chat", "/game", "/test"]
                .into_iter()
                .map(String::from)
                .collect(),
            allow_dynamic_namespaces: false,
            max_connections: 1000,
            shutdown_timeout_secs: 5,
        }
    }
}

/// Engine-level behaviour.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Milliseconds between server pings (V4) or expected client pings (V3).
    pub ping_interval_ms: u64,
    /// Grace period after a missed ping before the connection is closed.
    pub ping_timeout_ms: u64,
    /// Largest accepted frame in bytes.
    pub max_payload: usize,
    /// How long a server-initiated ack request stays pending.
    pub ack_timeout_ms: u64,
    /// Emit a `heartbeat` event to every socket at this period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_emit_interval_secs: Option<u64>,
    /// Outbound frame queue depth per connection.
    pub send_queue_capacity: usize,
    /// Accept `EIO=3` clients.
    pub allow_eio3: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ping_interval_ms: 25_000,
            ping_timeout_ms: 20_000,
            max_payload: 1_000_000,
            ack_timeout_ms: 5_000,
            heartbeat_emit_interval_secs: None,
            send_queue_capacity: 1024,
            allow_eio3: true,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
