use axum::extract::{Path, State};
use axum::Json;

use crate::error::AppResult;
use crate::state::AppState;

/// GET /api/history/{prompt_id}
///
/// Returns ComfyUI's history record for the prompt unchanged.
pub async fn get_history(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let history = state.gateway.history(&prompt_id).await?;
    Ok(Json(history))
}
