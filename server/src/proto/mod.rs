//! JSON wire format.
//!
//! Every frame is a UTF-8 JSON object tagged by its `type` field. Inbound
//! frames are classified into [`Inbound`]; outbound frames built by the
//! server are [`ServerMessage`] values.

use serde::Serialize;
use serde_json::Value;

use crate::hub::SharedState;

/// `senderId` stamped on frames the server itself originates.
pub const SERVER_SENDER_ID: &str = "server";

/// Every `type` the router acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    SyncBossData,
    BossDeath,
    AckSync,
    Offer,
    Answer,
    Candidate,
    ChatMessage,
    RequestOnlineUsers,
    UpdateFromA,
    MessageFromA,
}

/// How a frame of a given kind is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Re-serialized and sent to every connection.
    Broadcast,
    /// Forwarded verbatim to one user ID.
    Relay,
    /// Answered to the requester only.
    Query,
    /// Replaces the shared document, then broadcast.
    StateUpdate,
    /// Wrapped as `chat_message` and broadcast.
    ChatBroadcast,
}

impl MessageKind {
    pub fn from_type(type_name: &str) -> Option<Self> {
        match type_name {
            "Sync_Boss_Data" => Some(Self::SyncBossData),
            "Boss_Death" => Some(Self::BossDeath),
            "Ack_Sync" => Some(Self::AckSync),
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "candidate" => Some(Self::Candidate),
            "chat_message" => Some(Self::ChatMessage),
            "request_online_users" => Some(Self::RequestOnlineUsers),
            "UPDATE_FROM_A" => Some(Self::UpdateFromA),
            "MESSAGE_FROM_A" => Some(Self::MessageFromA),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncBossData => "Sync_Boss_Data",
            Self::BossDeath => "Boss_Death",
            Self::AckSync => "Ack_Sync",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
            Self::ChatMessage => "chat_message",
            Self::RequestOnlineUsers => "request_online_users",
            Self::UpdateFromA => "UPDATE_FROM_A",
            Self::MessageFromA => "MESSAGE_FROM_A",
        }
    }

    pub fn class(&self) -> MessageClass {
        match self {
            Self::SyncBossData | Self::BossDeath | Self::AckSync => MessageClass::Broadcast,
            Self::Offer | Self::Answer | Self::Candidate | Self::ChatMessage => MessageClass::Relay,
            Self::RequestOnlineUsers => MessageClass::Query,
            Self::UpdateFromA => MessageClass::StateUpdate,
            Self::MessageFromA => MessageClass::ChatBroadcast,
        }
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Broadcast {
        kind: MessageKind,
        body: Value,
    },
    /// Only the routing fields are extracted; the raw frame is what gets forwarded.
    Relay {
        kind: MessageKind,
        sender_id: Option<String>,
        target_id: Option<String>,
    },
    RequestOnlineUsers {
        sender_id: Option<String>,
    },
    UpdateState {
        payload: Option<Value>,
    },
    ChatBroadcast {
        content: Option<Value>,
    },
    Unknown {
        type_name: Option<String>,
    },
}

impl Inbound {
    /// Parse a text frame. Only invalid JSON is an error; anything that parses
    /// but is not a recognizable envelope comes back as `Unknown`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::classify(value))
    }

    pub fn classify(mut value: Value) -> Self {
        let type_name = value.get("type").and_then(Value::as_str).map(str::to_string);
        let Some(kind) = type_name.as_deref().and_then(MessageKind::from_type) else {
            return Self::Unknown { type_name };
        };

        match kind.class() {
            MessageClass::Broadcast => Self::Broadcast { kind, body: value },
            MessageClass::Relay => Self::Relay {
                kind,
                sender_id: string_field(&value, "senderId"),
                target_id: string_field(&value, "targetId"),
            },
            MessageClass::Query => Self::RequestOnlineUsers {
                sender_id: string_field(&value, "senderId"),
            },
            MessageClass::StateUpdate => Self::UpdateState {
                payload: take_field(&mut value, "payload"),
            },
            MessageClass::ChatBroadcast => Self::ChatBroadcast {
                content: take_field(&mut value, "content"),
            },
        }
    }

    /// Wire `type` for logging.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Broadcast { kind, .. } | Self::Relay { kind, .. } => kind.as_str(),
            Self::RequestOnlineUsers { .. } => MessageKind::RequestOnlineUsers.as_str(),
            Self::UpdateState { .. } => MessageKind::UpdateFromA.as_str(),
            Self::ChatBroadcast { .. } => MessageKind::MessageFromA.as_str(),
            Self::Unknown { type_name } => type_name.as_deref().unwrap_or("<none>"),
        }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn take_field(value: &mut Value, key: &str) -> Option<Value> {
    value.as_object_mut().and_then(|obj| obj.remove(key))
}

/// Frames the server originates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    OnlineUsersList {
        users: Vec<String>,
        #[serde(rename = "senderId")]
        sender_id: &'a str,
    },
    DataUpdate {
        payload: &'a SharedState,
    },
    DataSync {
        payload: &'a SharedState,
    },
    ChatMessage {
        content: Value,
    },
}

impl ServerMessage<'_> {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
