//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `TETHER_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! The settings file is `$TETHER_CONFIG` when set, otherwise
//! `~/.tether/settings.json`.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tether_core::CodecKind;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::TetherSettings;

/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV: &str = "TETHER_CONFIG";

/// Resolve the settings file path.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = read_env_string(CONFIG_ENV) {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the resolved path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; an unreadable or invalid one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Load settings reading overrides through `env` instead of the process
/// environment.
pub fn load_with_env<F>(path: &Path, env: F) -> Result<TetherSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced, and nulls in
/// `source` leave `target` untouched.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TETHER_*` overrides looked up through `env`.
///
/// Values that fail to parse or fall outside their range are logged and
/// ignored.
pub fn apply_overrides<F>(settings: &mut TetherSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |key: &str| env(key).filter(|v| !v.is_empty());
    let checked = |key: &str, parsed: Option<u64>, raw: &str| {
        if parsed.is_none() {
            warn!(key, value = raw, "invalid numeric env var, ignoring");
        }
        parsed
    };
    let number = |key: &str, min: u64, max: u64| {
        let raw = string(key)?;
        checked(key, parse_u64_range(&raw, min, max), &raw)
    };
    let boolean = |key: &str| {
        let raw = string(key)?;
        let parsed = parse_bool(&raw);
        if parsed.is_none() {
            warn!(key, value = %raw, "invalid boolean env var, ignoring");
        }
        parsed
    };

    // ── Protocol ────────────────────────────────────────────────────
    if let Some(raw) = string("TETHER_CODEC") {
        match raw.parse::<CodecKind>() {
            Ok(kind) => settings.protocol.codec = kind,
            Err(e) => warn!(value = %raw, error = %e, "invalid TETHER_CODEC, ignoring"),
        }
    }
    if let Some(v) = number("TETHER_CALL_TIMEOUT_MS", 1, 3_600_000) {
        settings.protocol.call_timeout_ms = v;
    }
    if let Some(v) = number("TETHER_PING_TIMEOUT_MS", 1, 600_000) {
        settings.protocol.ping_timeout_ms = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = string("TETHER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = number("TETHER_PORT", 0, u64::from(u16::MAX)) {
        settings.server.port = u16::try_from(v).unwrap_or(settings.server.port);
    }
    if let Some(v) = number("TETHER_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = usize::try_from(v).unwrap_or(usize::MAX);
    }
    if let Some(v) = number("TETHER_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = number("TETHER_HEARTBEAT_TIMEOUT_MS", 200, 3_600_000) {
        settings.server.heartbeat_timeout_ms = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = string("TETHER_URL") {
        settings.client.url = v;
    }
    if let Some(v) = boolean("TETHER_RECONNECT") {
        settings.client.reconnect.enabled = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = boolean("TETHER_LOG_JSON") {
        settings.logging.json = v;
    }
}

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

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 1, "host": "a"}});
        let source = serde_json::json!({"server": {"port": 2}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 2);
        assert_eq!(merged["server"]["host"], "a");
    }

    #[test]
    fn merge_skips_null() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_replaces_arrays() {
        let merged = deep_merge(
            serde_json::json!({"a": [1, 2, 3]}),
            serde_json::json!({"a": [9]}),
        );
        assert_eq!(merged["a"], serde_json::json!([9]));
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn range_parsing() {
        assert_eq!(parse_u64_range("50", 1, 100), Some(50));
        assert_eq!(parse_u64_range("0", 1, 100), None);
        assert_eq!(parse_u64_range("101", 1, 100), None);
        assert_eq!(parse_u64_range("abc", 1, 100), None);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_with_env(&dir.path().join("nope.json"), no_env).unwrap();
        assert_eq!(settings, TetherSettings::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9100}, "protocol": {"codec": "cbor"}}"#)
            .unwrap();
        let settings = load_with_env(&path, no_env).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.path, "/ws");
        assert_eq!(settings.protocol.codec, CodecKind::Cbor);
    }

    #[test]
    fn env_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9100}}"#).unwrap();
        let env = env_of(&[
            ("TETHER_PORT", "9200"),
            ("TETHER_CODEC", "binary"),
            ("TETHER_RECONNECT", "no"),
            ("TETHER_CALL_TIMEOUT_MS", "2500"),
        ]);
        let settings = load_with_env(&path, env).unwrap();
        assert_eq!(settings.server.port, 9200);
        assert_eq!(settings.protocol.codec, CodecKind::Cbor);
        assert!(!settings.client.reconnect.enabled);
        assert_eq!(settings.protocol.call_timeout_ms, 2500);
    }

    #[test]
    fn invalid_env_is_ignored() {
        let mut settings = TetherSettings::default();
        apply_overrides(
            &mut settings,
            env_of(&[
                ("TETHER_PORT", "70000"),
                ("TETHER_CODEC", "xml"),
                ("TETHER_LOG_JSON", "sometimes"),
            ]),
        );
        assert_eq!(settings, TetherSettings::default());
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_with_env(&path, no_env), Err(SettingsError::Json(_))));
    }

    #[test]
    fn inconsistent_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"heartbeatIntervalMs": 5000, "heartbeatTimeoutMs": 1000}}"#,
        )
        .unwrap();
        assert!(matches!(
            load_with_env(&path, no_env),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn zero_heartbeat_interval_in_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"heartbeatIntervalMs": 0}}"#).unwrap();
        assert!(matches!(
            load_with_env(&path, no_env),
            Err(SettingsError::InvalidValue(msg)) if msg.contains("heartbeatIntervalMs")
        ));
    }
}
