//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder globally.
///
/// Returns the handle used by `/metrics`. Call once at startup, before any
/// metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Attach attempts refused by the identity resolver (counter).
pub const ATTACH_REJECTED_TOTAL: &str = "attach_rejected_total";
/// Undecodable or ambiguous envelopes received (counter).
pub const PROTOCOL_VIOLATIONS_TOTAL: &str = "protocol_violations_total";
/// Chat messages published (counter).
pub const CHAT_MESSAGES_TOTAL: &str = "chat_messages_total";
/// Outbound enqueues refused because a queue was full or closed (counter).
pub const OUTBOUND_DROPS_TOTAL: &str = "outbound_drops_total";
/// Liveness pings sent (counter).
pub const LIVENESS_PINGS_TOTAL: &str = "liveness_pings_total";
/// Sessions evicted for missing acknowledgments (counter).
pub const LIVENESS_EVICTIONS_TOTAL: &str = "liveness_evictions_total";
/// Attached sessions (gauge).
pub const SESSIONS_ATTACHED: &str = "sessions_attached";
/// Messages accepted by the HTTP receiver (counter, labels: status).
pub const HTTP_MESSAGES_TOTAL: &str = "http_messages_total";
/// `/upload` outcomes by status (counter).
pub const UPLOADS_TOTAL: &str = "uploads_total";
