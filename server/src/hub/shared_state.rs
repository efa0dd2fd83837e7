use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-held document replicated to every client on connect (`data_sync`)
/// and after each update (`data_update`).
///
/// Has no locking of its own: it lives inside the registry and is only
/// touched while the hub lock is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    pub status: String,
    /// Mirrors the size of the connection set; rewritten on every connect/disconnect.
    pub users_online: usize,
    pub last_updated: DateTime<Utc>,
    /// Opaque client payload, replaced wholesale on each update.
    pub custom_data: Value,
}

impl SharedState {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            users_online: 0,
            last_updated: Utc::now(),
            custom_data: Value::Object(Default::default()),
        }
    }

    pub fn sync_online_count(&mut self, connections: usize) {
        self.users_online = connections;
    }

    /// Swap in a new custom payload and stamp the update time.
    /// No merge: keys absent from `payload` are gone afterwards.
    pub fn replace_custom_data(&mut self, payload: Value) {
        self.custom_data = payload;
        self.last_updated = Utc::now();
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new("Offline")
    }
}
