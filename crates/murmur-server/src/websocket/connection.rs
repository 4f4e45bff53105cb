//! Per-client outbound queue and liveness tracking.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::ConnectionId;

/// Why a frame could not be queued.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The client is not draining its queue fast enough.
    #[error("send queue full")]
    QueueFull,
    /// The writer task has exited.
    #[error("connection closed")]
    Closed,
}

/// One connected client as seen by the fan-out path.
pub struct ClientConnection {
    /// Connection ID, also the registry key.
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<String>>,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
    alive: AtomicBool,
    dropped: AtomicU64,
}

impl ClientConnection {
    /// Wrap the sending half of a client's outbound queue.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            last_seen: Mutex::new(now),
            alive: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue an encoded frame without waiting.
    ///
    /// A frame that cannot be queued is counted and discarded.
    pub fn try_deliver(&self, frame: Arc<String>) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            }
        })
    }

    /// Frames discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Note inbound traffic (any frame, including Pong).
    pub fn record_activity(&self) {
        *self.last_seen.lock() = Instant::now();
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Called once per ping tick, before the Ping goes out.
    ///
    /// Returns true only when nothing arrived since the previous tick's Ping
    /// and the client has been silent for longer than `pong_timeout`.
    pub fn heartbeat_expired(&self, pong_timeout: Duration) -> bool {
        let heard_since_last_ping = self.alive.swap(false, Ordering::Relaxed);
        !heard_since_last_ping && self.last_seen.lock().elapsed() > pong_timeout
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
