//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the hub is running, `"degraded"` once it has stopped.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Attached connections.
    pub connections: usize,
    /// Known sessions, attached or not.
    pub sessions: usize,
}

/// Build a health response from live counters. `None` means the hub did not
/// answer.
pub fn health_check(start_time: Instant, counts: Option<(usize, usize)>) -> HealthResponse {
    let (status, (connections, sessions)) = match counts {
        Some(counts) => ("ok", counts),
        None => ("degraded", (0, 0)),
    };
    HealthResponse {
        status: status.into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        sessions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok_with_counts() {
        let resp = health_check(Instant::now(), Some((2, 3)));
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.connections, 2);
        assert_eq!(resp.sessions, 3);
    }

    #[test]
    fn degraded_without_hub() {
        let resp = health_check(Instant::now(), None);
        assert_eq!(resp.status, "degraded");
        assert_eq!(resp.connections, 0);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, Some((0, 0)));
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), Some((1, 1)));
        let parsed: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["version"], env!("CARGO_PKG_VERSION"));
        assert!(parsed["uptime_secs"].is_number());
    }
}
