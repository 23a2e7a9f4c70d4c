//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission, history retrieval, image download and the
//! `system_stats` probe using [`reqwest`]. Every call is a single
//! request/response; nothing is retried.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Timeout for submission, history and status calls.
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for image downloads.
const IMAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
    /// Per-node validation errors reported by ComfyUI.
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// Transport failure or a non-success status from ComfyUI.
    #[error("ComfyUI backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The requested artifact does not exist on the backend.
    #[error("Not found on ComfyUI: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for ComfyUIApiError {
    fn from(e: reqwest::Error) -> Self {
        ComfyUIApiError::BackendUnavailable(e.to_string())
    }
}

/// The backend's wire contract, as seen by the relay.
///
/// [`ComfyUIApi`] is the production implementation; tests substitute
/// in-memory gateways.
#[async_trait]
pub trait BackendGateway: Send + Sync {
    /// `POST /prompt` with the workflow graph and the client id whose
    /// WebSocket should receive execution events.
    async fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError>;

    /// `GET /history/{prompt_id}`.
    async fn history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError>;

    /// `GET /view?filename=..&subfolder=..&type=..` returning raw bytes.
    async fn fetch_image(
        &self,
        filename: &str,
        subfolder: &str,
        kind: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError>;

    /// `GET /system_stats`, used as a reachability probe.
    async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError>;
}

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. A 404 becomes
    /// [`ComfyUIApiError::NotFound`] when `not_found` names the artifact;
    /// every other failure is [`ComfyUIApiError::BackendUnavailable`].
    async fn ensure_success(
        response: reqwest::Response,
        not_found: Option<&str>,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            if let Some(artifact) = not_found {
                return Err(ComfyUIApiError::NotFound(artifact.to_string()));
            }
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(ComfyUIApiError::BackendUnavailable(format!(
            "ComfyUI returned {}: {body}",
            status.as_u16()
        )))
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response, None).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl BackendGateway for ComfyUIApi {
    async fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .timeout(API_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .timeout(API_TIMEOUT)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn fetch_image(
        &self,
        filename: &str,
        subfolder: &str,
        kind: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[("filename", filename), ("subfolder", subfolder), ("type", kind)])
            .timeout(IMAGE_TIMEOUT)
            .send()
            .await?;

        let artifact = format!("image '{filename}' in {kind}/{subfolder}");
        let response = Self::ensure_success(response, Some(&artifact)).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .timeout(API_TIMEOUT)
            .send()
            .await?;

        Self::parse_response(response).await
    }
}
