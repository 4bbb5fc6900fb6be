//! Settings types with compiled defaults.
//!
//! Every struct uses `#[serde(default)]` so a partial JSON file only needs to
//! name the values it overrides.

use std::collections::BTreeMap;
use std::time::Duration;

use chat_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Root settings object (`chatd.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Network and filesystem settings.
    pub server: ServerSettings,
    /// Ping/eviction policy.
    pub liveness: LivenessSettings,
    /// Replay buffer settings.
    pub history: HistorySettings,
    /// Admin digest delivery.
    pub mail: MailSettings,
    /// Display colors keyed by lowercase user name, as `RRGGBB`.
    pub colors: BTreeMap<String, String>,
    /// Log output.
    pub logging: LoggingSettings,
}

impl ChatSettings {
    /// Color for a user name, matched case-insensitively.
    pub fn color_for(&self, name: &str) -> Option<&str> {
        self.colors.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Server network and filesystem settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Directory holding `history.html`, `tokens.json` and uploaded files.
    pub work_dir: String,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of each client's outbound queue.
    pub outbound_queue: usize,
    /// Max body size of a `/upload` request in bytes.
    pub max_upload_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8085,
            work_dir: "/usr/local/www/wet/work".to_string(),
            max_message_size: 1024 * 1024,
            outbound_queue: 256,
            max_upload_size: 32 * 1024 * 1024,
        }
    }
}

/// Liveness sweep policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivenessSettings {
    /// Seconds between sweeps.
    pub sweep_interval_secs: u64,
    /// Seconds without an acknowledgment before the client is pinged.
    pub silent_after_secs: u64,
    /// Seconds without an acknowledgment before the client is evicted.
    /// Must be greater than `silent_after_secs`.
    pub dead_after_secs: u64,
}

impl LivenessSettings {
    /// Sweep period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Ping threshold.
    pub fn silent_after(&self) -> Duration {
        Duration::from_secs(self.silent_after_secs)
    }

    /// Eviction threshold.
    pub fn dead_after(&self) -> Duration {
        Duration::from_secs(self.dead_after_secs)
    }
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 600,
            silent_after_secs: 480,
            dead_after_secs: 720,
        }
    }
}

/// Replay buffer settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistorySettings {
    /// Maximum number of envelopes kept for replay.
    pub limit: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self { limit: 1000 }
    }
}

/// Admin digest delivery.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailSettings {
    /// Recipient of the periodic conversation digest. Empty disables mail;
    /// the digest is then written to the log.
    pub admin_email: String,
    /// Path to the `sendmail` binary.
    pub sendmail_path: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            admin_email: String::new(),
            sendmail_path: "/usr/sbin/sendmail".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
