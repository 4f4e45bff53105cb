//! Session registry: which connections have claimed which display names.

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::protocol::ConnectionId;

/// Connection → display name, in claim order.
///
/// Names are stored verbatim: empty and duplicate names are allowed. Each
/// method takes the lock once, so every call is atomic with respect to the
/// others; no call holds the lock beyond its own return.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<IndexMap<ConnectionId, String>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the name for `id`. A re-claim keeps its position.
    pub fn set(&self, id: &ConnectionId, name: impl Into<String>) {
        let _ = self.sessions.lock().insert(id.clone(), name.into());
    }

    /// Name registered for `id`, if any.
    pub fn get(&self, id: &ConnectionId) -> Option<String> {
        self.sessions.lock().get(id).cloned()
    }

    /// Remove `id`, returning the name it held. Absent ids are a no-op.
    pub fn remove(&self, id: &ConnectionId) -> Option<String> {
        self.sessions.lock().shift_remove(id)
    }

    /// Every registered name, in claim order.
    pub fn names(&self) -> Vec<String> {
        self.sessions.lock().values().cloned().collect()
    }

    /// Number of identified connections.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no connection has claimed a name.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
