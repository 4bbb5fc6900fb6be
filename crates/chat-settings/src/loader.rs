//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ChatSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `CHAT_*` environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::ChatSettings;

/// Resolve the default settings path (`~/.config/chat/chatd.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home)
        .join(".config")
        .join("chat")
        .join("chatd.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ChatSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a failed validation is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<ChatSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Read and deep-merge the settings file over defaults, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<ChatSettings> {
    let defaults = serde_json::to_value(ChatSettings::default())?;

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

/// Check constraints that span several fields.
pub fn validate(settings: &ChatSettings) -> Result<()> {
    let l = &settings.liveness;
    if l.sweep_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "liveness.sweepIntervalSecs must be positive".into(),
        ));
    }
    if l.dead_after_secs <= l.silent_after_secs {
        return Err(SettingsError::InvalidValue(format!(
            "liveness.deadAfterSecs ({}) must be greater than silentAfterSecs ({})",
            l.dead_after_secs, l.silent_after_secs
        )));
    }
    if settings.server.outbound_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "server.outboundQueue must be positive".into(),
        ));
    }
    if settings.server.max_upload_size == 0 {
        return Err(SettingsError::InvalidValue(
            "server.maxUploadSize must be positive".into(),
        ));
    }
    if settings.history.limit == 0 {
        return Err(SettingsError::InvalidValue(
            "history.limit must be positive".into(),
        ));
    }
    Ok(())
}

/// Apply `CHAT_*` environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut ChatSettings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Each variable has strict parsing rules; invalid values are ignored with a
/// warning and the file/default value is kept.
pub fn apply_overrides(settings: &mut ChatSettings, lookup: &dyn Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("CHAT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("CHAT_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("CHAT_WORK_DIR") {
        settings.server.work_dir = v;
    }
    if let Some(v) = env.usize("CHAT_OUTBOUND_QUEUE", 1, 65_536) {
        settings.server.outbound_queue = v;
    }
    if let Some(v) = env.usize("CHAT_MAX_UPLOAD_SIZE", 1, 1 << 30) {
        settings.server.max_upload_size = v;
    }

    // ── Liveness ────────────────────────────────────────────────────
    if let Some(v) = env.u64("CHAT_SWEEP_INTERVAL_SECS", 1, 86_400) {
        settings.liveness.sweep_interval_secs = v;
    }
    if let Some(v) = env.u64("CHAT_SILENT_AFTER_SECS", 1, 86_400) {
        settings.liveness.silent_after_secs = v;
    }
    if let Some(v) = env.u64("CHAT_DEAD_AFTER_SECS", 1, 86_400) {
        settings.liveness.dead_after_secs = v;
    }

    // ── History / mail / logging ────────────────────────────────────
    if let Some(v) = env.usize("CHAT_HISTORY_LIMIT", 1, 1_000_000) {
        settings.history.limit = v;
    }
    if let Some(v) = env.string("CHAT_ADMIN_EMAIL") {
        settings.mail.admin_email = v;
    }
    if let Some(v) = env.string("CHAT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("CHAT_LOG_FORMAT") {
        match serde_json::from_value(Value::String(v.clone())) {
            Ok(format) => settings.logging.format = format,
            Err(_) => tracing::warn!(key = "CHAT_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
