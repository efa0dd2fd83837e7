use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::Response,
};
use std::net::SocketAddr;

use crate::state::AppState;
use crate::ws::actor;

/// GET /ws
/// WebSocket upgrade endpoint. Identity is self-declared later via `senderId`,
/// so every upgrade is accepted and handed to a connection actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::debug!(remote_addr = %remote_addr, "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, remote_addr))
}
