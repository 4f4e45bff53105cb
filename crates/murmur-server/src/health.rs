//! `/health` endpoint body.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Liveness plus the relay's two population counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` whenever the process can answer.
    pub status: String,
    /// Whole seconds since the server was built.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Connections that have claimed a display name.
    pub identified_users: usize,
}

impl HealthResponse {
    /// Build from an uptime and the live counters.
    pub fn new(uptime: Duration, connections: usize, identified_users: usize) -> Self {
        Self {
            status: "ok".into(),
            uptime_secs: uptime.as_secs(),
            connections,
            identified_users,
        }
    }
}

/// Snapshot health for a server started at `start_time`.
pub fn health_check(start_time: Instant, connections: usize, identified: usize) -> HealthResponse {
    HealthResponse::new(start_time.elapsed(), connections, identified)
}
