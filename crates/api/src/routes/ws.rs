use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Mount the client WebSocket endpoint (root level).
pub fn router() -> Router<AppState> {
    Router::new().route("/ws/{client_id}", get(ws::ws_handler))
}
