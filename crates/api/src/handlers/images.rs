//! Image proxy with folder-type fallback.
//!
//! ComfyUI keeps finished images under `output` and previews under `temp`;
//! clients do not always know which. The proxy tries the requested folder
//! first and then the standard ones.

use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use genrelay_comfyui::api::ComfyUIApiError;
use genrelay_core::error::CoreError;
use genrelay_core::images::{folder_fallback_order, FOLDER_OUTPUT};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Folder type; also accepted as `folder_type`.
    #[serde(rename = "type", alias = "folder_type", default = "default_folder")]
    pub kind: String,
}

fn default_folder() -> String {
    FOLDER_OUTPUT.to_string()
}

/// GET /api/image?filename=..&subfolder=..&type=..
pub async fn get_image(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> AppResult<impl IntoResponse> {
    if query.filename.is_empty() {
        return Err(AppError::BadRequest("filename is required".to_string()));
    }

    for kind in folder_fallback_order(&query.kind) {
        match state
            .gateway
            .fetch_image(&query.filename, &query.subfolder, kind)
            .await
        {
            Ok(bytes) => {
                tracing::debug!(
                    filename = %query.filename,
                    folder = %kind,
                    len = bytes.len(),
                    "Image fetched",
                );
                return Ok(([(CONTENT_TYPE, "image/png")], bytes));
            }
            Err(ComfyUIApiError::NotFound(_)) => {
                tracing::debug!(filename = %query.filename, folder = %kind, "Image not in folder");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(CoreError::NotFound {
        entity: "Image",
        id: query.filename,
    }
    .into())
}
