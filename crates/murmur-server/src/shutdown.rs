//! Shutdown signalling shared by the listener and every WebSocket session.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How a bounded wait on server tasks ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every task finished within the timeout.
    Completed,
    /// The timeout elapsed; this many tasks were still running and got aborted.
    TimedOut {
        /// Tasks aborted after the timeout.
        aborted: usize,
    },
}

/// Owns the root cancellation token. Sessions hold child tokens.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the root token for tasks that must stop on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been triggered.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger shutdown and wait up to `timeout` for `tasks`.
    ///
    /// Tasks still running when the timeout elapses are aborted.
    pub async fn shutdown_and_wait(
        &self,
        tasks: Vec<JoinHandle<()>>,
        timeout: Duration,
    ) -> ShutdownOutcome {
        self.shutdown();
        info!(tasks = tasks.len(), ?timeout, "shutting down");

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(tasks))
            .await
            .is_ok()
        {
            return ShutdownOutcome::Completed;
        }

        let stragglers: Vec<_> = aborts.into_iter().filter(|a| !a.is_finished()).collect();
        for task in &stragglers {
            task.abort();
        }
        warn!(aborted = stragglers.len(), ?timeout, "shutdown timed out");
        ShutdownOutcome::TimedOut {
            aborted: stragglers.len(),
        }
    }
}
