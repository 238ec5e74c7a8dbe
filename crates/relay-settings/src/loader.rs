//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::RelaySettings;

/// Resolve the path to the settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a value that fails
/// [`RelaySettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = merge_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Each variable has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are logged and ignored (fall back to file/default)
///
/// `RELAY_HTTP_PORT` wins over the legacy `HTTP_PORT`.
pub fn apply_overrides_with<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env
        .u16("RELAY_HTTP_PORT", 1, 65535)
        .or_else(|| env.u16("HTTP_PORT", 1, 65535))
    {
        settings.server.http_port = v;
    }
    if let Some(v) = env.bool("RELAY_DYNAMIC_NAMESPACES") {
        settings.server.allow_dynamic_namespaces = v;
    }
    if let Some(v) = env.usize("RELAY_MAX_CONNECTIONS", 1, 100_000) {
        settings.server.max_connections = v;
    }

    // ── Engine ──────────────────────────────────────────────────────
    if let Some(v) = env.u64("RELAY_PING_INTERVAL_MS", 100, 600_000) {
        settings.engine.ping_interval_ms = v;
    }
    if let Some(v) = env.u64("RELAY_PING_TIMEOUT_MS", 100, 600_000) {
        settings.engine.ping_timeout_ms = v;
    }
    if let Some(v) = env.u64("RELAY_ACK_TIMEOUT_MS", 1, 600_000) {
        settings.engine.ack_timeout_ms = v;
    }
    if let Some(v) = env.usize("RELAY_MAX_PAYLOAD", 1024, 100_000_000) {
        settings.engine.max_payload = v;
    }
    if let Some(v) = env.u64("RELAY_HEARTBEAT_EMIT_SECS", 1, 3600) {
        settings.engine.heartbeat_emit_interval_secs = Some(v);
    }
    if let Some(v) = env.bool("RELAY_ALLOW_EIO3") {
        settings.engine.allow_eio3 = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("RELAY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn overrides(pairs: &[(&str, &str)]) -> RelaySettings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut settings = RelaySettings::default();
        apply_overrides_with(&mut settings, |name| env.get(name).cloned());
        settings
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "server": {"httpPort": 3000, "host": "localhost"}
        });
        let source = serde_json::json!({
            "server": {"httpPort": 4000}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["httpPort"], 4000);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"namespaces": ["/", "/chat"]});
        let source = serde_json::json!({"namespaces": ["/lobby"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["namespaces"], serde_json::json!(["/lobby"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = merge_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, RelaySettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"httpPort": 4100}, "engine": {"heartbeatEmitIntervalSecs": 3}}"#,
        )
        .unwrap();

        let settings = merge_file(&path).unwrap();
        assert_eq!(settings.server.http_port, 4100);
        assert_eq!(settings.engine.heartbeat_emit_interval_secs, Some(3));
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.engine.ack_timeout_ms, 5_000);
    }

    #[test]
    fn load_namespace_list_replaces_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"namespaces": ["/", "/lobby"]}}"#).unwrap();

        let settings = merge_file(&path).unwrap();
        assert_eq!(settings.server.namespaces, vec!["/", "/lobby"]);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"namespaces": ["lobby"]}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply_to_every_section() {
        let settings = overrides(&[
            ("RELAY_HOST", "127.0.0.1"),
            ("RELAY_HTTP_PORT", "4000"),
            ("RELAY_PING_INTERVAL_MS", "1000"),
            ("RELAY_PING_TIMEOUT_MS", "500"),
            ("RELAY_ACK_TIMEOUT_MS", "250"),
            ("RELAY_HEARTBEAT_EMIT_SECS", "10"),
            ("RELAY_LOG_LEVEL", "debug"),
            ("RELAY_LOG_JSON", "yes"),
            ("RELAY_DYNAMIC_NAMESPACES", "on"),
        ]);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.http_port, 4000);
        assert_eq!(settings.engine.ping_interval_ms, 1000);
        assert_eq!(settings.engine.ping_timeout_ms, 500);
        assert_eq!(settings.engine.ack_timeout_ms, 250);
        assert_eq!(settings.engine.heartbeat_emit_interval_secs, Some(10));
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
        assert!(settings.server.allow_dynamic_namespaces);
    }

    #[test]
    fn legacy_port_used_when_prefixed_missing() {
        assert_eq!(overrides(&[("HTTP_PORT", "8088")]).server.http_port, 8088);
    }

    #[test]
    fn prefixed_port_wins_over_legacy() {
        let settings = overrides(&[("HTTP_PORT", "8088"), ("RELAY_HTTP_PORT", "9099")]);
        assert_eq!(settings.server.http_port, 9099);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let settings = overrides(&[
            ("RELAY_HTTP_PORT", "0"),
            ("RELAY_ACK_TIMEOUT_MS", "soon"),
            ("RELAY_LOG_JSON", "maybe"),
            ("RELAY_HOST", ""),
        ]);
        assert_eq!(settings, RelaySettings::default());
    }

    // ── parse helpers ───────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "FALSE", "Off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_u16_bounds() {
        assert_eq!(parse_u16_range("3000", 1, 65535), Some(3000));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u16_range("port", 1, 65535), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("25000", 100, 600_000), Some(25_000));
        assert_eq!(parse_u64_range("50", 100, 600_000), None);
        assert_eq!(parse_u64_range("700000", 100, 600_000), None);
    }

    #[test]
    fn parse_usize_bounds() {
        assert_eq!(parse_usize_range("2048", 1024, 4096), Some(2048));
        assert_eq!(parse_usize_range("1", 1024, 4096), None);
    }
}
