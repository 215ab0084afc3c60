//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::TaskbotSettings;

/// `~/.taskbot`, falling back to `/tmp/.taskbot` without a home directory.
pub fn taskbot_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".taskbot")
}

/// Resolve the path to the settings file (`~/.taskbot/settings.json`).
pub fn settings_path() -> PathBuf {
    taskbot_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TaskbotSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TaskbotSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<TaskbotSettings> {
    let defaults = serde_json::to_value(TaskbotSettings::default())?;

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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut TaskbotSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Override logic over an arbitrary lookup so it can be tested without
/// touching the process environment.
fn apply_overrides(settings: &mut TaskbotSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let checked = |name: &str, parsed: Option<u64>, raw: &str| {
        if parsed.is_none() {
            tracing::warn!(key = name, value = %raw, "invalid numeric env var, ignoring");
        }
        parsed
    };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = string("TASKBOT_HOST") {
        settings.server.host = v;
    }
    if let Some(raw) = string("TASKBOT_PORT") {
        let parsed = parse_u64_range(&raw, 0, u64::from(u16::MAX));
        if let Some(v) = checked("TASKBOT_PORT", parsed, &raw) {
            settings.server.port = v as u16;
        }
    }

    // ── Database ────────────────────────────────────────────────────
    if let Some(v) = string("TASKBOT_DB_PATH") {
        settings.database.path = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = string("TASKBOT_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(raw) = string("TASKBOT_TOKEN_TTL_SECS") {
        let parsed = parse_u64_range(&raw, 60, 30 * 24 * 60 * 60);
        if let Some(v) = checked("TASKBOT_TOKEN_TTL_SECS", parsed, &raw) {
            settings.auth.token_ttl_secs = v;
        }
    }

    // ── Telegram ────────────────────────────────────────────────────
    if let Some(v) = string("TELEGRAM_BOT_TOKEN") {
        settings.telegram.bot_token = Some(v);
    }
    if let Some(v) = string("TASKBOT_TELEGRAM_API_URL") {
        settings.telegram.api_base_url = v;
    }
    if let Some(v) = string("TASKBOT_WEBHOOK_SECRET") {
        settings.telegram.webhook_secret = Some(v);
    }

    // ── Bridge ──────────────────────────────────────────────────────
    if let Some(raw) = string("TASKBOT_BRIDGE_TIMEOUT_MS") {
        let parsed = parse_u64_range(&raw, 100, 600_000);
        if let Some(v) = checked("TASKBOT_BRIDGE_TIMEOUT_MS", parsed, &raw) {
            settings.bridge.timeout_ms = v;
        }
    }
    if let Some(raw) = string("TASKBOT_BRIDGE_CANCEL_ON_TIMEOUT") {
        match parse_bool(&raw) {
            Some(v) => settings.bridge.cancel_on_timeout = v,
            None => {
                tracing::warn!(key = "TASKBOT_BRIDGE_CANCEL_ON_TIMEOUT", value = %raw, "invalid boolean env var, ignoring");
            }
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("TASKBOT_LOG_LEVEL") {
        settings.logging.level = v;
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
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 5000, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(
            serde_json::json!({"a": 1, "b": 2}),
            serde_json::json!({"a": null}),
        );
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 5000);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 8088}, "bridge": {"timeoutMs": 5000}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 8088);
        assert_eq!(settings.bridge.timeout_ms, 5000);
        assert!(settings.bridge.cancel_on_timeout);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(load_file_layer(&path), Err(SettingsError::Json(_))));
    }

    // ── env layer ───────────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut s = TaskbotSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("TASKBOT_PORT", "8443"),
                ("TELEGRAM_BOT_TOKEN", "123:abc"),
                ("TASKBOT_BRIDGE_TIMEOUT_MS", "1500"),
                ("TASKBOT_BRIDGE_CANCEL_ON_TIMEOUT", "off"),
                ("TASKBOT_JWT_SECRET", "s3cret"),
            ]),
        );
        assert_eq!(s.server.port, 8443);
        assert_eq!(s.telegram.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(s.bridge.timeout_ms, 1500);
        assert!(!s.bridge.cancel_on_timeout);
        assert_eq!(s.auth.jwt_secret, "s3cret");
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut s = TaskbotSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("TASKBOT_PORT", "99999"),
                ("TASKBOT_BRIDGE_TIMEOUT_MS", "5"),
                ("TASKBOT_BRIDGE_CANCEL_ON_TIMEOUT", "perhaps"),
            ]),
        );
        assert_eq!(s.server.port, 5000);
        assert_eq!(s.bridge.timeout_ms, 30_000);
        assert!(s.bridge.cancel_on_timeout);
    }

    #[test]
    fn empty_env_values_ignored() {
        let mut s = TaskbotSettings::default();
        apply_overrides(&mut s, env(&[("TELEGRAM_BOT_TOKEN", "")]));
        assert!(s.telegram.bot_token.is_none());
    }

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "ON"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("1000", 1000, 600_000), Some(1000));
        assert_eq!(parse_u64_range("999", 1000, 600_000), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
    }
}
