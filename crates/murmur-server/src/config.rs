//! Server configuration.

use std::time::Duration;

use crate::websocket::session::SessionConfig;

/// Configuration for the relay server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before drops begin.
    pub send_queue_capacity: usize,
    /// Ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Close a client after this many seconds without a pong.
    pub pong_timeout_secs: u64,
    /// Upper bound on stopping the listener and draining welcome tasks.
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Per-connection parameters handed to each session.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            send_queue_capacity: self.send_queue_capacity,
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs),
        }
    }

    /// Shutdown bound as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            shutdown_timeout_secs: 10,
        }
    }
}

impl From<&murmur_settings::ServerSettings> for ServerConfig {
    fn from(s: &murmur_settings::ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_message_size: s.max_message_size,
            send_queue_capacity: s.send_queue_capacity,
            ping_interval_secs: s.ping_interval_secs,
            pong_timeout_secs: s.pong_timeout_secs,
            shutdown_timeout_secs: s.shutdown_timeout_secs,
        }
    }
}
