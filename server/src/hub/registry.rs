use std::collections::HashMap;

use axum::extract::ws::Message;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::RegistryError;
use crate::hub::directory::{Registration, UserDirectory};
use crate::hub::shared_state::SharedState;
use crate::ws::{ConnectionHandle, ConnectionId, ConnectionSender};

/// Result of a fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was handed to.
    pub delivered: usize,
    /// Connections found closed or failing; already cleaned up.
    pub dropped: Vec<ConnectionId>,
}

/// Live connection set, user directory and shared document.
///
/// Not synchronized itself: `Hub` owns the single instance behind one lock,
/// so every method here runs serialized against all the others.
#[derive(Debug)]
pub struct Registry {
    connections: HashMap<ConnectionId, ConnectionSender>,
    users: UserDirectory,
    shared: SharedState,
}

impl Registry {
    pub fn new(shared: SharedState) -> Self {
        Self {
            connections: HashMap::new(),
            users: UserDirectory::new(),
            shared,
        }
    }

    /// Add an accepted connection to the active set.
    pub fn connect(&mut self, handle: ConnectionHandle) {
        let conn_id = handle.id;
        self.connections.insert(conn_id, handle.sender);
        self.sync_online_count();
        tracing::debug!(
            conn_id,
            connections = self.connections.len(),
            "Connection registered"
        );
    }

    /// Remove a connection and any user ID it holds.
    ///
    /// Safe to call any number of times; returns false when there was nothing
    /// left to remove.
    pub fn disconnect(&mut self, conn_id: ConnectionId) -> bool {
        let was_connected = self.connections.remove(&conn_id).is_some();
        let released = self.users.release(conn_id);
        self.sync_online_count();

        if was_connected || released.is_some() {
            tracing::debug!(
                conn_id,
                user_id = released.as_deref().unwrap_or("-"),
                connections = self.connections.len(),
                "Connection unregistered"
            );
            true
        } else {
            false
        }
    }

    /// Bind `user_id` to a live connection. First claim wins.
    pub fn register_user(
        &mut self,
        user_id: &str,
        conn_id: ConnectionId,
    ) -> Result<Registration, RegistryError> {
        if !self.connections.contains_key(&conn_id) {
            return Err(RegistryError::UnknownConnection(conn_id));
        }

        let outcome = self.users.claim(user_id, conn_id);
        match &outcome {
            Ok(Registration::Registered) => {
                tracing::info!(conn_id, user_id = %user_id, "User registered");
            }
            Ok(Registration::AlreadyRegistered) => {}
            Err(e) => {
                tracing::debug!(conn_id, user_id = %user_id, error = %e, "Registration rejected");
            }
        }
        outcome
    }

    /// Send a text frame to one connection by handle.
    ///
    /// A failed send means the writer side is gone or has fallen a full queue
    /// behind, so the connection is torn down on the spot.
    pub fn send_to(&mut self, conn_id: ConnectionId, text: &str) -> bool {
        let Some(sender) = self.connections.get(&conn_id) else {
            tracing::debug!(conn_id, "Send to unknown connection skipped");
            return false;
        };

        if let Err(e) = sender.try_send(Message::Text(text.into())) {
            tracing::warn!(conn_id, reason = send_failure(&e), "Send failed, dropping connection");
            self.disconnect(conn_id);
            return false;
        }
        true
    }

    /// Deliver a text frame to whichever connection currently holds `user_id`.
    pub fn unicast(&mut self, user_id: &str, text: &str) -> bool {
        let Some(conn_id) = self.users.connection_of(user_id) else {
            tracing::info!(user_id = %user_id, "Recipient offline or unregistered");
            return false;
        };

        let open = self
            .connections
            .get(&conn_id)
            .map(|sender| !sender.is_closed())
            .unwrap_or(false);
        if !open {
            tracing::info!(user_id = %user_id, conn_id, "Recipient connection is not open");
            return false;
        }

        self.send_to(conn_id, text)
    }

    /// Deliver a text frame to every open connection.
    ///
    /// Dead members are collected during the pass and disconnected afterwards,
    /// never removed while the set is being walked.
    pub fn broadcast(&mut self, text: &str) -> BroadcastReport {
        let msg = Message::Text(text.into());
        let mut report = BroadcastReport::default();

        for (&conn_id, sender) in self.connections.iter() {
            if sender.is_closed() || sender.try_send(msg.clone()).is_err() {
                report.dropped.push(conn_id);
            } else {
                report.delivered += 1;
            }
        }

        for &conn_id in &report.dropped {
            self.disconnect(conn_id);
        }

        if !report.dropped.is_empty() {
            tracing::info!(
                removed = report.dropped.len(),
                connections = self.connections.len(),
                "Removed disconnected clients during broadcast"
            );
        }
        tracing::debug!(receivers = report.delivered, "Broadcast sent");

        report
    }

    /// Snapshot of registered user IDs; owned, so later mutation cannot touch it.
    pub fn online_users(&self) -> Vec<String> {
        self.users.user_ids()
    }

    pub fn connection_of(&self, user_id: &str) -> Option<ConnectionId> {
        self.users.connection_of(user_id)
    }

    pub fn user_of(&self, conn_id: ConnectionId) -> Option<String> {
        self.users.user_of(conn_id).map(str::to_string)
    }

    pub fn is_connected(&self, conn_id: ConnectionId) -> bool {
        self.connections.contains_key(&conn_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn registered_count(&self) -> usize {
        self.users.len()
    }

    pub fn shared_state(&self) -> &SharedState {
        &self.shared
    }

    /// Replace the shared custom payload wholesale and resync the online count.
    pub fn replace_custom_data(&mut self, payload: Value) {
        self.shared.replace_custom_data(payload);
        self.sync_online_count();
    }

    fn sync_online_count(&mut self) {
        self.shared.sync_online_count(self.connections.len());
    }
}

fn send_failure<T>(err: &TrySendError<T>) -> &'static str {
    match err {
        TrySendError::Full(_) => "outbound queue full",
        TrySendError::Closed(_) => "writer gone",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn open_conn() -> (ConnectionHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(16);
        (ConnectionHandle::new(tx), rx)
    }

    fn text_of(msg: Message) -> String {
        match msg {
            Message::Text(text) => text.as_str().to_string(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    fn registry() -> Registry {
        Registry::new(SharedState::default())
    }

    #[test]
    fn test_online_count_tracks_connection_set() {
        let mut reg = registry();
        let (a, _rx_a) = open_conn();
        let (b, _rx_b) = open_conn();
        let (a_id, b_id) = (a.id, b.id);

        reg.connect(a);
        reg.connect(b);
        assert_eq!(reg.shared_state().users_online, 2);

        reg.disconnect(a_id);
        assert_eq!(reg.shared_state().users_online, 1);
        reg.disconnect(b_id);
        assert_eq!(reg.shared_state().users_online, 0);
        assert_eq!(reg.connection_count(), 0);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut reg = registry();
        let (a, _rx) = open_conn();
        let a_id = a.id;
        reg.connect(a);
        reg.register_user("alice", a_id).unwrap();

        assert!(reg.disconnect(a_id));
        assert!(!reg.disconnect(a_id));
        assert_eq!(reg.connection_count(), 0);
        assert!(reg.online_users().is_empty());
        assert_eq!(reg.shared_state().users_online, 0);
    }

    #[test]
    fn test_register_requires_live_connection() {
        let mut reg = registry();
        let (a, _rx) = open_conn();
        let a_id = a.id;

        assert_eq!(
            reg.register_user("alice", a_id),
            Err(RegistryError::UnknownConnection(a_id))
        );
    }

    #[test]
    fn test_duplicate_claim_keeps_original_owner() {
        let mut reg = registry();
        let (a, mut rx_a) = open_conn();
        let (b, mut rx_b) = open_conn();
        let (a_id, b_id) = (a.id, b.id);
        reg.connect(a);
        reg.connect(b);

        assert_eq!(reg.register_user("alice", a_id), Ok(Registration::Registered));
        assert!(matches!(
            reg.register_user("alice", b_id),
            Err(RegistryError::IdentityTaken { .. })
        ));

        assert!(reg.unicast("alice", "hello"));
        assert_eq!(text_of(rx_a.try_recv().unwrap()), "hello");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_unicast_to_unknown_user_is_a_noop() {
        let mut reg = registry();
        let (a, mut rx_a) = open_conn();
        reg.connect(a);

        assert!(!reg.unicast("bob", "offer"));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(reg.connection_count(), 1);
    }

    #[test]
    fn test_unicast_to_closed_peer_returns_false() {
        let mut reg = registry();
        let (a, rx_a) = open_conn();
        let a_id = a.id;
        reg.connect(a);
        reg.register_user("alice", a_id).unwrap();
        drop(rx_a);

        assert!(!reg.unicast("alice", "offer"));
        // Closed-but-not-yet-cleaned connections are left for their own handler.
        assert!(reg.is_connected(a_id));
    }

    #[test]
    fn test_send_failure_cascades_to_disconnect() {
        let mut reg = registry();
        let (a, rx_a) = open_conn();
        let a_id = a.id;
        reg.connect(a);
        reg.register_user("alice", a_id).unwrap();
        drop(rx_a);

        assert!(!reg.send_to(a_id, "data_sync"));
        assert!(!reg.is_connected(a_id));
        assert!(reg.online_users().is_empty());
    }

    #[test]
    fn test_broadcast_isolates_dead_peers() {
        let mut reg = registry();
        let (a, mut rx_a) = open_conn();
        let (b, rx_b) = open_conn();
        let (c, mut rx_c) = open_conn();
        let b_id = b.id;
        reg.connect(a);
        reg.connect(b);
        reg.connect(c);
        reg.register_user("bob", b_id).unwrap();
        drop(rx_b);

        let report = reg.broadcast(r#"{"type":"Boss_Death"}"#);

        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, vec![b_id]);
        assert_eq!(text_of(rx_a.try_recv().unwrap()), r#"{"type":"Boss_Death"}"#);
        assert_eq!(text_of(rx_c.try_recv().unwrap()), r#"{"type":"Boss_Death"}"#);

        assert!(!reg.is_connected(b_id));
        assert!(reg.online_users().is_empty());
        assert_eq!(reg.shared_state().users_online, 2);
    }

    #[test]
    fn test_slow_peer_with_full_queue_is_dropped() {
        let mut reg = registry();
        let (tx, mut rx_slow) = mpsc::channel(1);
        let slow = ConnectionHandle::new(tx);
        let slow_id = slow.id;
        let (fast, mut rx_fast) = open_conn();
        reg.connect(slow);
        reg.connect(fast);
        reg.register_user("slow", slow_id).unwrap();

        let first = reg.broadcast("one");
        assert_eq!(first.delivered, 2);

        // The slow peer never drained "one", so "two" finds its queue full.
        let second = reg.broadcast("two");
        assert_eq!(second.delivered, 1);
        assert_eq!(second.dropped, vec![slow_id]);
        assert!(!reg.is_connected(slow_id));
        assert!(reg.online_users().is_empty());

        assert_eq!(text_of(rx_fast.try_recv().unwrap()), "one");
        assert_eq!(text_of(rx_fast.try_recv().unwrap()), "two");
        assert_eq!(text_of(rx_slow.try_recv().unwrap()), "one");
        assert!(rx_slow.try_recv().is_err());
    }

    #[test]
    fn test_online_users_lists_registered_ids_only() {
        let mut reg = registry();
        let (a, _rx_a) = open_conn();
        let (b, _rx_b) = open_conn();
        let (c, _rx_c) = open_conn();
        let (a_id, b_id) = (a.id, b.id);
        reg.connect(a);
        reg.connect(b);
        reg.connect(c);
        reg.register_user("alice", a_id).unwrap();
        reg.register_user("bob", b_id).unwrap();

        let mut users = reg.online_users();
        users.sort();
        assert_eq!(users, vec!["alice", "bob"]);
        assert_eq!(reg.registered_count(), 2);
        assert_eq!(reg.user_of(a_id).as_deref(), Some("alice"));
        assert_eq!(reg.connection_of("bob"), Some(b_id));
    }

    #[test]
    fn test_replace_custom_data_resyncs_count() {
        let mut reg = registry();
        let (a, _rx) = open_conn();
        reg.connect(a);

        reg.replace_custom_data(json!({"k": 1}));
        reg.replace_custom_data(json!({"k": 2}));

        assert_eq!(reg.shared_state().custom_data, json!({"k": 2}));
        assert_eq!(reg.shared_state().users_online, 1);
    }
}
