//! Event fan-out to connected WebSocket clients.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use super::connection::ClientConnection;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;
use crate::protocol::{ConnectionId, OutboundEvent, encode_outbound};

/// Delivery targets the dispatcher can address.
///
/// Every method returns without waiting: delivery is best-effort and a
/// target that has gone away is skipped silently.
pub trait ConnectionSet: Send + Sync {
    /// Deliver to one connection.
    fn send_to(&self, id: &ConnectionId, event: &OutboundEvent);
    /// Deliver to every connection except `excluded`.
    fn send_except(&self, excluded: &ConnectionId, event: &OutboundEvent);
    /// Deliver to every connection.
    fn send_all(&self, event: &OutboundEvent);
}

/// Live connection set backed by per-client send queues.
pub struct BroadcastManager {
    /// Connected clients indexed by connection ID.
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl BroadcastManager {
    /// Create an empty broadcast manager.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection.
    pub fn add(&self, connection: Arc<ClientConnection>) {
        let _ = self
            .connections
            .write()
            .insert(connection.id.clone(), connection);
    }

    /// Remove a connection by ID.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.write().remove(id)
    }

    /// Number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    fn encode(event: &OutboundEvent) -> Option<Arc<String>> {
        match encode_outbound(event) {
            Ok(json) => Some(Arc::new(json)),
            Err(e) => {
                warn!(event = event.name(), error = %e, "failed to serialize event");
                None
            }
        }
    }

    fn deliver(conn: &ClientConnection, frame: &Arc<String>) {
        if let Err(e) = conn.try_deliver(Arc::clone(frame)) {
            counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
            warn!(conn_id = %conn.id, dropped = conn.dropped(), error = %e, "frame dropped");
        }
    }

    fn fan_out(&self, event: &OutboundEvent, excluded: Option<&ConnectionId>) {
        let Some(frame) = Self::encode(event) else {
            return;
        };
        let conns = self.connections.read();
        let mut recipients = 0usize;
        for conn in conns.values() {
            if excluded == Some(&conn.id) {
                continue;
            }
            recipients += 1;
            Self::deliver(conn, &frame);
        }
        debug!(
            event = event.name(),
            excluded = excluded.map(ConnectionId::as_str),
            recipients,
            "broadcast event"
        );
    }
}

impl ConnectionSet for BroadcastManager {
    fn send_to(&self, id: &ConnectionId, event: &OutboundEvent) {
        let conns = self.connections.read();
        let Some(conn) = conns.get(id) else {
            trace!(conn_id = %id, event = event.name(), "target gone, dropping event");
            return;
        };
        if let Some(frame) = Self::encode(event) {
            Self::deliver(conn, &frame);
        }
    }

    fn send_except(&self, excluded: &ConnectionId, event: &OutboundEvent) {
        self.fan_out(event, Some(excluded));
    }

    fn send_all(&self, event: &OutboundEvent) {
        self.fan_out(event, None);
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}
