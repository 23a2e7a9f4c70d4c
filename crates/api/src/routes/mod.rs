pub mod health;
pub mod ws;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /generate-image              queue a workflow (POST)
/// /image                       image proxy with folder fallback
/// /history/{prompt_id}         ComfyUI history record
/// /status                      ComfyUI reachability
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/generate-image",
            post(handlers::generation::generate_image),
        )
        .route("/image", get(handlers::images::get_image))
        .route("/history/{prompt_id}", get(handlers::history::get_history))
        .route("/status", get(handlers::status::comfyui_status))
}
