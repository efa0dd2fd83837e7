use axum::{extract::State, Json, Router};
use serde::Serialize;

use crate::hub::SharedState;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

#[derive(Debug, Serialize)]
pub struct OnlineUsersResponse {
    pub users: Vec<String>,
    pub connections: usize,
}

/// GET /api/state — Current shared state document (read-only).
async fn get_state(State(state): State<AppState>) -> Json<SharedState> {
    Json(state.hub.shared_state().await)
}

/// GET /api/users/online — Registered user IDs plus the raw connection count.
async fn get_online_users(State(state): State<AppState>) -> Json<OnlineUsersResponse> {
    let registry = state.hub.lock().await;
    Json(OnlineUsersResponse {
        users: registry.online_users(),
        connections: registry.connection_count(),
    })
}

/// Build the axum Router with the WebSocket endpoint and read-only views.
pub fn build_router(state: AppState) -> Router {
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    let api_routes = Router::new()
        .route("/api/state", axum::routing::get(get_state))
        .route("/api/users/online", axum::routing::get(get_online_users));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(api_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
