//! Connection hub: the single owned registry shared by every connection task.
//!
//! All state (connection set, user directory, shared document) sits behind
//! one `tokio::sync::Mutex`. Sends are non-blocking channel pushes, so holding
//! the lock across a fan-out never waits on a slow peer.

pub mod directory;
pub mod registry;
pub mod shared_state;

pub use directory::{Registration, UserDirectory};
pub use registry::{BroadcastReport, Registry};
pub use shared_state::SharedState;

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::RegistryError;
use crate::proto::ServerMessage;
use crate::ws::{ConnectionHandle, ConnectionId};

#[derive(Debug, Clone)]
pub struct Hub {
    inner: Arc<Mutex<Registry>>,
}

impl Hub {
    pub fn new(shared: SharedState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry::new(shared))),
        }
    }

    /// Take the registry lock for a multi-step operation.
    pub async fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().await
    }

    pub async fn connect(&self, handle: ConnectionHandle) {
        self.lock().await.connect(handle);
    }

    /// Add a connection and, in the same critical section, hand it a
    /// `data_sync` snapshot so it starts from the current shared state.
    pub async fn connect_with_snapshot(&self, handle: ConnectionHandle) -> bool {
        let conn_id = handle.id;
        let mut registry = self.lock().await;
        registry.connect(handle);

        let snapshot = ServerMessage::DataSync {
            payload: registry.shared_state(),
        };
        match snapshot.to_text() {
            Ok(text) => registry.send_to(conn_id, &text),
            Err(e) => {
                tracing::error!(conn_id, error = %e, "Failed to encode data_sync");
                false
            }
        }
    }

    pub async fn disconnect(&self, conn_id: ConnectionId) -> bool {
        self.lock().await.disconnect(conn_id)
    }

    pub async fn register_user(
        &self,
        user_id: &str,
        conn_id: ConnectionId,
    ) -> Result<Registration, RegistryError> {
        self.lock().await.register_user(user_id, conn_id)
    }

    pub async fn unicast(&self, user_id: &str, text: &str) -> bool {
        self.lock().await.unicast(user_id, text)
    }

    pub async fn broadcast(&self, text: &str) -> BroadcastReport {
        self.lock().await.broadcast(text)
    }

    /// Replace the shared payload and fan the new document out as `data_update`.
    /// Both steps happen under one lock acquisition.
    pub async fn apply_update(&self, payload: Value) -> BroadcastReport {
        let mut registry = self.lock().await;
        registry.replace_custom_data(payload);

        let update = ServerMessage::DataUpdate {
            payload: registry.shared_state(),
        };
        match update.to_text() {
            Ok(text) => registry.broadcast(&text),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode data_update");
                BroadcastReport::default()
            }
        }
    }

    pub async fn online_users(&self) -> Vec<String> {
        self.lock().await.online_users()
    }

    pub async fn is_connected(&self, conn_id: ConnectionId) -> bool {
        self.lock().await.is_connected(conn_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.lock().await.connection_count()
    }

    pub async fn shared_state(&self) -> SharedState {
        self.lock().await.shared_state().clone()
    }
}
