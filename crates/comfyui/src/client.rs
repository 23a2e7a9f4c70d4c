//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the WebSocket base URL of one ComfyUI server.
//! Each relay session opens its own connection with
//! [`ComfyUIClient::connect`], passing the session's client id so that
//! ComfyUI addresses execution events for prompts submitted under that id
//! to this socket only.

use async_trait::async_trait;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

use crate::channel::BackendChannel;

/// Raw WebSocket stream to ComfyUI.
pub type ComfyUIStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens backend channels for relay sessions.
///
/// [`ComfyUIClient`] is the production implementation; tests substitute
/// in-memory connectors.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, client_id: &str) -> Result<BackendChannel, ComfyUIClientError>;
}

/// Configuration handle for a ComfyUI instance's WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Client ID sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// Create a new client.
    ///
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8188`.
    pub fn new(ws_url: String) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
        }
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Full endpoint URL for a given client id.
    ///
    /// The id is form-encoded so ComfyUI reads back exactly the id that
    /// prompts are later submitted under.
    pub fn endpoint_for(&self, client_id: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("clientId", client_id)
            .finish();
        format!("{}/ws?{query}", self.ws_url)
    }

    /// Connect to the ComfyUI WebSocket endpoint as `client_id`.
    pub async fn connect_raw(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = self.endpoint_for(client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            client_id = %client_id,
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(ComfyUIConnection {
            client_id: client_id.to_string(),
            ws_stream,
        })
    }
}

#[async_trait]
impl BackendConnector for ComfyUIClient {
    async fn connect(&self, client_id: &str) -> Result<BackendChannel, ComfyUIClientError> {
        let conn = self.connect_raw(client_id).await?;
        Ok(BackendChannel::from_websocket(conn.client_id, conn.ws_stream))
    }
}

/// Derive the WebSocket base URL from an HTTP API base URL
/// (`http` → `ws`, `https` → `wss`).
pub fn ws_url_from_api_url(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
