//! Welcome notice sources.
//!
//! The welcome text stands in for a value fetched from an upstream service,
//! so it is produced asynchronously and may fail.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Sent to the claiming connection when the source fails.
pub const WELCOME_FALLBACK: &str = "Sorry, couldn't fetch the welcome message.";

/// Errors a welcome source can report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WelcomeError {
    /// The upstream could not produce a message.
    #[error("welcome message unavailable: {0}")]
    Unavailable(String),
}

/// Produces the welcome notice for a freshly identified connection.
#[async_trait]
pub trait WelcomeSource: Send + Sync {
    /// Resolve the welcome text.
    async fn fetch(&self) -> Result<String, WelcomeError>;
}

/// Resolves to a fixed message after a fixed delay.
pub struct SimulatedWelcome {
    delay: Duration,
    message: String,
}

impl SimulatedWelcome {
    /// Create a source that waits `delay` and then yields `message`.
    pub fn new(delay: Duration, message: impl Into<String>) -> Self {
        Self {
            delay,
            message: message.into(),
        }
    }

    /// Build from the welcome section of the settings.
    pub fn from_settings(settings: &murmur_settings::WelcomeSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.delay_ms),
            settings.message.clone(),
        )
    }
}

#[async_trait]
impl WelcomeSource for SimulatedWelcome {
    async fn fetch(&self) -> Result<String, WelcomeError> {
        debug!(delay_ms = self.delay.as_millis(), "fetching welcome message");
        tokio::time::sleep(self.delay).await;
        Ok(self.message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn simulated_waits_then_resolves() {
        let source = SimulatedWelcome::new(Duration::from_millis(1500), "hello");
        let start = Instant::now();
        let msg = source.fetch().await.unwrap();
        assert_eq!(msg, "hello");
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn from_settings_uses_defaults() {
        let source = SimulatedWelcome::from_settings(&murmur_settings::WelcomeSettings::default());
        assert_eq!(source.delay, Duration::from_millis(1500));
        assert_eq!(
            source.fetch().await.unwrap(),
            "Welcome to the Simple WebSocket Chat!"
        );
    }

    #[test]
    fn error_display() {
        let err = WelcomeError::Unavailable("upstream 503".into());
        assert_eq!(err.to_string(), "welcome message unavailable: upstream 503");
    }
}
