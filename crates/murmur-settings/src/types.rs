//! Settings types.
//!
//! Every struct is `#[serde(default)]` so a partial settings file only needs to
//! name the values it changes.

use serde::{Deserialize, Serialize};

/// Default listening port, overridable through `PORT`.
pub const DEFAULT_PORT: u16 = 3001;

/// Default welcome text sent to a client after it claims a name.
pub const DEFAULT_WELCOME_MESSAGE: &str = "Welcome to the Simple WebSocket Chat!";

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MurmurSettings {
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Welcome notice settings.
    pub welcome: WelcomeSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port (`0` lets the OS pick one).
    pub port: u16,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before new frames are dropped.
    pub send_queue_capacity: usize,
    /// Interval between server-initiated Ping frames.
    pub ping_interval_secs: u64,
    /// Silence after which an unresponsive client is disconnected.
    pub pong_timeout_secs: u64,
    /// Upper bound on draining pending work at shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Welcome notice settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WelcomeSettings {
    /// Simulated upstream latency before the welcome text resolves.
    pub delay_ms: u64,
    /// Welcome text.
    pub message: String,
}

impl Default for WelcomeSettings {
    fn default() -> Self {
        Self {
            delay_ms: 1500,
            message: DEFAULT_WELCOME_MESSAGE.to_string(),
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Pretty,
    /// Newline-delimited JSON.
    Json,
}

impl LogFormat {
    /// Parse a format name (case-insensitive).
    pub fn parse(val: &str) -> Option<Self> {
        match val.to_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
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
            format: LogFormat::Pretty,
        }
    }
}
