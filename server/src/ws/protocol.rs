use serde_json::Value;

use crate::hub::Hub;
use crate::proto::{Inbound, MessageKind, ServerMessage, SERVER_SENDER_ID};
use crate::state::AppState;
use crate::ws::ConnectionId;

/// Handle an incoming text frame.
/// Parses the JSON envelope and dispatches on its `type`. Malformed frames are
/// logged and dropped; the connection stays open.
pub async fn handle_text_message(text: &str, conn_id: ConnectionId, state: &AppState) {
    let inbound = match Inbound::parse(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            tracing::warn!(
                conn_id,
                error = %e,
                "Received non-JSON message, ignoring"
            );
            return;
        }
    };

    tracing::debug!(conn_id, message_type = inbound.type_name(), "Dispatching message");
    dispatch(inbound, text, conn_id, &state.hub).await;
}

/// Dispatch a classified frame to the matching hub operation.
pub async fn dispatch(inbound: Inbound, raw: &str, conn_id: ConnectionId, hub: &Hub) {
    match inbound {
        Inbound::Broadcast { kind, body } => {
            handle_broadcast(kind, &body, conn_id, hub).await;
        }
        Inbound::Relay {
            kind,
            sender_id,
            target_id,
        } => {
            handle_relay(kind, sender_id.as_deref(), target_id.as_deref(), raw, conn_id, hub).await;
        }
        Inbound::RequestOnlineUsers { sender_id } => {
            handle_online_users_request(sender_id.as_deref(), conn_id, hub).await;
        }
        Inbound::UpdateState { payload } => match payload {
            Some(payload) => {
                let report = hub.apply_update(payload).await;
                tracing::info!(
                    conn_id,
                    receivers = report.delivered,
                    "Shared state replaced, data_update broadcast"
                );
            }
            None => {
                tracing::warn!(conn_id, "UPDATE_FROM_A without payload, dropping");
            }
        },
        Inbound::ChatBroadcast { content } => match content {
            Some(content) => handle_chat_broadcast(content, conn_id, hub).await,
            None => {
                tracing::warn!(conn_id, "MESSAGE_FROM_A without content, dropping");
            }
        },
        Inbound::Unknown { type_name } => {
            tracing::info!(
                conn_id,
                message_type = type_name.as_deref().unwrap_or("<none>"),
                "Received unknown message type"
            );
        }
    }
}

/// Re-serialize the parsed frame and send it to everyone, the sender included.
async fn handle_broadcast(kind: MessageKind, body: &Value, conn_id: ConnectionId, hub: &Hub) {
    let text = match serde_json::to_string(body) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(conn_id, error = %e, "Failed to re-serialize broadcast frame");
            return;
        }
    };

    tracing::info!(conn_id, message_type = kind.as_str(), "Broadcasting message");
    hub.broadcast(&text).await;
}

/// Signaling relay: claim `senderId` for this connection, then forward the
/// untouched frame to `targetId`.
async fn handle_relay(
    kind: MessageKind,
    sender_id: Option<&str>,
    target_id: Option<&str>,
    raw: &str,
    conn_id: ConnectionId,
    hub: &Hub,
) {
    let mut registry = hub.lock().await;

    if let Some(sender_id) = sender_id {
        if let Err(e) = registry.register_user(sender_id, conn_id) {
            tracing::warn!(
                conn_id,
                message_type = kind.as_str(),
                sender_id = %sender_id,
                error = %e,
                "senderId not bound to this connection, forwarding anyway"
            );
        }
    }

    let Some(target_id) = target_id else {
        tracing::warn!(
            conn_id,
            message_type = kind.as_str(),
            "Relay message without targetId, cannot route"
        );
        return;
    };

    let delivered = registry.unicast(target_id, raw);
    tracing::info!(
        conn_id,
        message_type = kind.as_str(),
        sender_id = sender_id.unwrap_or("<none>"),
        target_id = %target_id,
        delivered,
        "Relayed message"
    );
}

/// Reply with the registered user list, addressed to the requester's own ID.
async fn handle_online_users_request(sender_id: Option<&str>, conn_id: ConnectionId, hub: &Hub) {
    let mut registry = hub.lock().await;

    let Some(requester) = registry.user_of(conn_id) else {
        tracing::info!(
            conn_id,
            sender_id = sender_id.unwrap_or("<none>"),
            "Online users requested by unregistered connection"
        );
        return;
    };

    let response = ServerMessage::OnlineUsersList {
        users: registry.online_users(),
        sender_id: SERVER_SENDER_ID,
    };
    match response.to_text() {
        Ok(text) => {
            registry.unicast(&requester, &text);
        }
        Err(e) => {
            tracing::error!(conn_id, error = %e, "Failed to encode online_users_list");
        }
    }
}

async fn handle_chat_broadcast(content: Value, conn_id: ConnectionId, hub: &Hub) {
    match (ServerMessage::ChatMessage { content }).to_text() {
        Ok(text) => {
            tracing::info!(conn_id, "Broadcasting chat_message");
            hub.broadcast(&text).await;
        }
        Err(e) => {
            tracing::error!(conn_id, error = %e, "Failed to encode chat_message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::SharedState;
    use crate::ws::ConnectionHandle;
    use axum::extract::ws::Message;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Peer {
        id: ConnectionId,
        rx: mpsc::Receiver<Message>,
    }

    impl Peer {
        async fn join(hub: &Hub) -> Self {
            let (tx, rx) = mpsc::channel(16);
            let handle = ConnectionHandle::new(tx);
            let id = handle.id;
            hub.connect(handle).await;
            Self { id, rx }
        }

        fn next_text(&mut self) -> Option<String> {
            match self.rx.try_recv().ok()? {
                Message::Text(text) => Some(text.as_str().to_string()),
                other => panic!("expected text frame, got {:?}", other),
            }
        }
    }

    async fn send(hub: &Hub, peer: &Peer, raw: &str) {
        let inbound = Inbound::parse(raw).unwrap();
        dispatch(inbound, raw, peer.id, hub).await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone_including_sender() {
        let hub = Hub::new(SharedState::default());
        let mut a = Peer::join(&hub).await;
        let mut b = Peer::join(&hub).await;

        send(&hub, &a, r#"{"type":"Boss_Death"}"#).await;

        let from_a = a.next_text().unwrap();
        let from_b = b.next_text().unwrap();
        assert_eq!(from_a, from_b);
        assert_eq!(serde_json::from_str::<Value>(&from_a).unwrap(), json!({"type": "Boss_Death"}));
    }

    #[tokio::test]
    async fn test_relay_forwards_raw_frame_to_target() {
        let hub = Hub::new(SharedState::default());
        let mut alice = Peer::join(&hub).await;
        let mut bob = Peer::join(&hub).await;

        send(&hub, &bob, r#"{"type":"candidate","senderId":"bob","targetId":"nobody"}"#).await;

        let raw = r#"{"type":"offer",  "senderId":"alice","targetId":"bob","sdp":{"x":1}}"#;
        send(&hub, &alice, raw).await;

        assert_eq!(bob.next_text().as_deref(), Some(raw));
        assert_eq!(alice.next_text(), None);
    }

    #[tokio::test]
    async fn test_relay_to_offline_target_is_dropped() {
        let hub = Hub::new(SharedState::default());
        let mut a = Peer::join(&hub).await;

        send(&hub, &a, r#"{"type":"offer","senderId":"alice","targetId":"bob"}"#).await;

        assert_eq!(a.next_text(), None);
        assert_eq!(hub.online_users().await, vec!["alice".to_string()]);
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_relay_without_target_still_registers_sender() {
        let hub = Hub::new(SharedState::default());
        let a = Peer::join(&hub).await;

        send(&hub, &a, r#"{"type":"answer","senderId":"alice"}"#).await;

        assert_eq!(hub.online_users().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_hijack_attempt_does_not_move_identity() {
        let hub = Hub::new(SharedState::default());
        let mut alice = Peer::join(&hub).await;
        let mut mallory = Peer::join(&hub).await;
        let mut carol = Peer::join(&hub).await;

        send(&hub, &alice, r#"{"type":"chat_message","senderId":"alice","targetId":"x"}"#).await;
        send(&hub, &mallory, r#"{"type":"chat_message","senderId":"alice","targetId":"x"}"#).await;
        send(&hub, &carol, r#"{"type":"chat_message","senderId":"carol","targetId":"alice"}"#).await;

        assert!(alice.next_text().is_some());
        assert_eq!(mallory.next_text(), None);
        assert_eq!(carol.next_text(), None);
    }

    #[tokio::test]
    async fn test_rejected_sender_claim_still_forwards() {
        let hub = Hub::new(SharedState::default());
        let alice = Peer::join(&hub).await;
        let mallory = Peer::join(&hub).await;
        let mut carol = Peer::join(&hub).await;
        send(&hub, &alice, r#"{"type":"offer","senderId":"alice","targetId":"x"}"#).await;
        send(&hub, &carol, r#"{"type":"offer","senderId":"carol","targetId":"x"}"#).await;

        let raw = r#"{"type":"answer","senderId":"alice","targetId":"carol"}"#;
        send(&hub, &mallory, raw).await;

        assert_eq!(carol.next_text().as_deref(), Some(raw));
        assert_eq!(hub.lock().await.user_of(mallory.id), None);
        assert_eq!(hub.lock().await.user_of(alice.id).as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_online_users_reply_goes_to_requester_only() {
        let hub = Hub::new(SharedState::default());
        let mut alice = Peer::join(&hub).await;
        let mut bob = Peer::join(&hub).await;
        send(&hub, &alice, r#"{"type":"offer","senderId":"alice","targetId":"nobody"}"#).await;
        send(&hub, &bob, r#"{"type":"offer","senderId":"bob","targetId":"nobody"}"#).await;

        send(&hub, &alice, r#"{"type":"request_online_users","senderId":"alice"}"#).await;

        let reply: Value = serde_json::from_str(&alice.next_text().unwrap()).unwrap();
        assert_eq!(reply["type"], "online_users_list");
        assert_eq!(reply["senderId"], "server");
        let mut users: Vec<String> = serde_json::from_value(reply["users"].clone()).unwrap();
        users.sort();
        assert_eq!(users, vec!["alice", "bob"]);
        assert_eq!(bob.next_text(), None);
    }

    #[tokio::test]
    async fn test_online_users_from_unregistered_connection_is_silent() {
        let hub = Hub::new(SharedState::default());
        let mut a = Peer::join(&hub).await;

        send(&hub, &a, r#"{"type":"request_online_users","senderId":"ghost"}"#).await;

        assert_eq!(a.next_text(), None);
    }

    #[tokio::test]
    async fn test_update_replaces_payload_and_broadcasts() {
        let hub = Hub::new(SharedState::default());
        let mut a = Peer::join(&hub).await;
        let mut b = Peer::join(&hub).await;

        send(&hub, &a, r#"{"type":"UPDATE_FROM_A","payload":{"k":1}}"#).await;
        send(&hub, &a, r#"{"type":"UPDATE_FROM_A","payload":{"k":2}}"#).await;

        for peer in [&mut a, &mut b] {
            let updates: Vec<Value> = std::iter::from_fn(|| peer.next_text())
                .map(|t| serde_json::from_str(&t).unwrap())
                .collect();
            assert_eq!(updates.len(), 2);
            assert!(updates.iter().all(|u| u["type"] == "data_update"));
            assert_eq!(updates[1]["payload"]["custom_data"], json!({"k": 2}));
        }
        assert_eq!(hub.shared_state().await.custom_data, json!({"k": 2}));
    }

    #[tokio::test]
    async fn test_update_without_payload_is_ignored() {
        let hub = Hub::new(SharedState::default());
        let mut a = Peer::join(&hub).await;

        send(&hub, &a, r#"{"type":"UPDATE_FROM_A"}"#).await;

        assert_eq!(a.next_text(), None);
        assert_eq!(hub.shared_state().await.custom_data, json!({}));
    }

    #[tokio::test]
    async fn test_chat_broadcast_wraps_content() {
        let hub = Hub::new(SharedState::default());
        let mut a = Peer::join(&hub).await;
        let mut b = Peer::join(&hub).await;

        send(&hub, &a, r#"{"type":"MESSAGE_FROM_A","content":"hello"}"#).await;

        let expected = json!({"type": "chat_message", "content": "hello"});
        for peer in [&mut a, &mut b] {
            let frame: Value = serde_json::from_str(&peer.next_text().unwrap()).unwrap();
            assert_eq!(frame, expected);
        }
    }

    #[tokio::test]
    async fn test_unknown_type_is_ignored() {
        let hub = Hub::new(SharedState::default());
        let mut a = Peer::join(&hub).await;

        send(&hub, &a, r#"{"type":"Something_Else","x":1}"#).await;

        assert_eq!(a.next_text(), None);
        assert_eq!(hub.connection_count().await, 1);
    }
}
