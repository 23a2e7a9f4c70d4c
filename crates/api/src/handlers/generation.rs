//! Handler for queuing image generation.
//!
//! Routes:
//! - `POST /generate-image`: fill a workflow template and queue it on ComfyUI

use axum::extract::State;
use axum::Json;
use genrelay_core::workflow::DEFAULT_WORKFLOW;
use serde::{Deserialize, Serialize};

use crate::engine::{submit_job, JobRequest};
use crate::error::AppResult;
use crate::state::AppState;

/// Request body for `POST /api/generate-image`.
#[derive(Debug, Deserialize)]
pub struct GenerateImageRequest {
    pub prompt_text: String,
    #[serde(default = "default_workflow")]
    pub workflow_name: String,
    /// Session to stream progress to. A fresh `api_<uuid>` id is used when
    /// absent.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_workflow() -> String {
    DEFAULT_WORKFLOW.to_string()
}

#[derive(Debug, Serialize)]
pub struct GenerateImageResponse {
    pub prompt_id: String,
    pub number: i64,
    pub client_id: String,
    pub seed: u64,
}

/// POST /api/generate-image
///
/// Queues the prompt under `client_id`. When that client has a live
/// WebSocket session, a progress monitor streams the job to it.
pub async fn generate_image(
    State(state): State<AppState>,
    Json(input): Json<GenerateImageRequest>,
) -> AppResult<Json<GenerateImageResponse>> {
    let client_id = input
        .client_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("api_{}", uuid::Uuid::new_v4()));

    let request = JobRequest {
        client_id,
        workflow_name: input.workflow_name,
        prompt_text: input.prompt_text,
        seed: input.seed,
    };

    let mut job = submit_job(&state, &request).await?;
    job.start_monitor(&state.monitor);

    Ok(Json(GenerateImageResponse {
        prompt_id: job.prompt_id,
        number: job.number,
        client_id: job.client_id,
        seed: job.seed,
    }))
}
