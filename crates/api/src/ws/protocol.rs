//! Client-facing WebSocket message schema.
//!
//! Every text frame sent to a browser client is a JSON object with a `type`
//! discriminator. Binary frames carry raw preview image bytes and are always
//! followed by a [`ClientMessage::Preview`] text frame.
//!
//! The functions here are pure; they never touch a connection.

use axum::extract::ws::Message;
use genrelay_core::images::ImageRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status string carried by a successful `connection_status` message.
pub const STATUS_CONNECTED: &str = "connected";

/// Messages the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The backend link for this session is established.
    ConnectionStatus { status: String, message: String },
    /// The backend link could not be established; the socket closes next.
    ConnectionError { message: String },
    /// A prompt sent over this socket was accepted by the backend.
    PromptQueued { prompt_id: String },
    Progress {
        prompt_id: String,
        node: String,
        progress: u8,
        node_info: Map<String, Value>,
    },
    /// Accompanies the binary frame sent immediately before it.
    Preview { prompt_id: String, node: String },
    ExecutionComplete { prompt_id: String },
    Result {
        prompt_id: String,
        seed: Option<u64>,
        images: Vec<ImageRef>,
    },
    Error { message: String },
}

impl ClientMessage {
    pub fn connected() -> Self {
        ClientMessage::ConnectionStatus {
            status: STATUS_CONNECTED.to_string(),
            message: "Connected to ComfyUI server".to_string(),
        }
    }

    pub fn connection_error(message: impl Into<String>) -> Self {
        ClientMessage::ConnectionError {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ClientMessage::Error {
            message: message.into(),
        }
    }

    /// Wire name of this message's `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::ConnectionStatus { .. } => "connection_status",
            ClientMessage::ConnectionError { .. } => "connection_error",
            ClientMessage::PromptQueued { .. } => "prompt_queued",
            ClientMessage::Progress { .. } => "progress",
            ClientMessage::Preview { .. } => "preview",
            ClientMessage::ExecutionComplete { .. } => "execution_complete",
            ClientMessage::Result { .. } => "result",
            ClientMessage::Error { .. } => "error",
        }
    }

    /// Serialize to the JSON text carried by a text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize into a ready-to-send WebSocket text frame.
    pub fn to_frame(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::Text(self.encode()?.into()))
    }
}

/// A `prompt` request sent by the client over its WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromptRequest {
    #[serde(default)]
    pub prompt_text: String,
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Messages a client may send to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Prompt(PromptRequest),
    /// Any other `type`; ignored by the relay.
    Unknown { kind: String },
}

#[derive(Deserialize)]
struct RequestEnvelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Decode a client text frame.
///
/// Frames that are not JSON objects with a string `type` are an error;
/// well-formed frames of an unknown type decode to
/// [`ClientRequest::Unknown`].
pub fn decode_request(text: &str) -> Result<ClientRequest, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let envelope: RequestEnvelope = serde_json::from_value(value.clone())?;

    if envelope.kind == "prompt" {
        return serde_json::from_value(value).map(ClientRequest::Prompt);
    }
    Ok(ClientRequest::Unknown {
        kind: envelope.kind,
    })
}
