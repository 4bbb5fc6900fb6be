//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use chat_settings::ChatSettings;
use serde::{Deserialize, Serialize};

/// Network-facing configuration for [`ChatServer`](crate::ChatServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,
    /// Seconds between liveness sweeps.
    pub sweep_interval_secs: u64,
    /// Where `/upload` stores files.
    pub work_dir: PathBuf,
    /// Max `/upload` body size in bytes.
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 1024 * 1024,
            outbound_queue: 256,
            sweep_interval_secs: 600,
            work_dir: std::env::temp_dir(),
            max_upload_size: 32 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Extract the server's share of the settings.
    pub fn from_settings(settings: &ChatSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            outbound_queue: settings.server.outbound_queue,
            sweep_interval_secs: settings.liveness.sweep_interval_secs,
            work_dir: PathBuf::from(&settings.server.work_dir),
            max_upload_size: settings.server.max_upload_size,
        }
    }

    /// Sweep period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
