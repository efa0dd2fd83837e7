pub mod actor;
pub mod handler;
pub mod protocol;

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// The hub clones frames into it; the connection's writer task drains it into the socket.
pub type ConnectionSender = mpsc::Sender<axum::extract::ws::Message>;

/// Frames a connection may have queued for its writer. A peer that falls this
/// far behind is treated as dead by the hub.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Process-unique connection handle ID. Identity is ID equality, never payload equality.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One open bidirectional text channel as seen by the hub.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub sender: ConnectionSender,
}

impl ConnectionHandle {
    /// Wrap a sender under a freshly allocated ID.
    pub fn new(sender: ConnectionSender) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            sender,
        }
    }
}
