//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MurmurSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, MurmurSettings};

/// Resolve the default settings file path (`~/.murmur/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".murmur").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MurmurSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus env overrides). If the
/// file contains invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<MurmurSettings> {
    load_settings_with_env(path, |name| std::env::var(name).ok())
}

/// Load settings from `path`, resolving environment variables through `env`.
pub fn load_settings_with_env(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<MurmurSettings> {
    let defaults = serde_json::to_value(MurmurSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: MurmurSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    validate(&settings)?;
    Ok(settings)
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
/// - `PORT`: listening port (1–65535)
/// - `MURMUR_HOST`: bind address
/// - `MURMUR_WELCOME_DELAY_MS`: welcome latency (0–600000)
/// - `MURMUR_WELCOME_MESSAGE`: welcome text
/// - `MURMUR_LOG_LEVEL`: default log filter
/// - `MURMUR_LOG_FORMAT`: `pretty` or `json`
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut MurmurSettings, env: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| env(name).filter(|v| !v.is_empty());

    if let Some(val) = read("PORT") {
        match parse_u16_range(&val, 1, 65535) {
            Some(port) => settings.server.port = port,
            None => warn!(key = "PORT", value = %val, "invalid port env var, ignoring"),
        }
    }
    if let Some(v) = read("MURMUR_HOST") {
        settings.server.host = v;
    }
    if let Some(val) = read("MURMUR_WELCOME_DELAY_MS") {
        match parse_u64_range(&val, 0, 600_000) {
            Some(ms) => settings.welcome.delay_ms = ms,
            None => {
                warn!(key = "MURMUR_WELCOME_DELAY_MS", value = %val, "invalid u64 env var, ignoring");
            }
        }
    }
    if let Some(v) = read("MURMUR_WELCOME_MESSAGE") {
        settings.welcome.message = v;
    }
    if let Some(v) = read("MURMUR_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(val) = read("MURMUR_LOG_FORMAT") {
        match LogFormat::parse(&val) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "MURMUR_LOG_FORMAT", value = %val, "invalid log format, ignoring"),
        }
    }
}

/// Reject values the server cannot run with.
pub fn validate(settings: &MurmurSettings) -> Result<()> {
    let server = &settings.server;
    let positive = "must be greater than 0";
    let checks = [
        ("server.sendQueueCapacity", server.send_queue_capacity == 0, positive),
        ("server.maxMessageSize", server.max_message_size == 0, positive),
        ("server.pingIntervalSecs", server.ping_interval_secs == 0, positive),
        (
            "server.pongTimeoutSecs",
            server.pong_timeout_secs <= server.ping_interval_secs,
            "must be greater than server.pingIntervalSecs",
        ),
    ];
    match checks.into_iter().find(|(_, failed, _)| *failed) {
        Some((field, _, reason)) => Err(SettingsError::InvalidValue { field, reason }),
        None => Ok(()),
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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
