use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// `connected` or `disconnected`.
    pub status: &'static str,
    pub message: String,
}

/// GET /api/status -- probes ComfyUI's `system_stats`.
///
/// Always answers 200; an unreachable backend is reported in the body.
pub async fn comfyui_status(State(state): State<AppState>) -> Json<StatusResponse> {
    match state.gateway.system_stats().await {
        Ok(_) => Json(StatusResponse {
            status: "connected",
            message: "ComfyUI server is reachable".to_string(),
        }),
        Err(e) => {
            tracing::warn!(error = %e, "ComfyUI status probe failed");
            Json(StatusResponse {
                status: "disconnected",
                message: e.to_string(),
            })
        }
    }
}
