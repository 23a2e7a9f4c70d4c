//! ComfyUI WebSocket event decoding.
//!
//! ComfyUI sends JSON text frames with the shape
//! `{"type": "<kind>", "data": {...}}`. Only `executing` frames drive the
//! relay; every other kind decodes to [`BackendEvent::Other`] so that new
//! or unfamiliar event types never abort monitoring.

use serde::Deserialize;
use serde_json::{Map, Value};

/// A decoded backend text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// A node started executing, or the prompt finished when no node is set.
    Executing(ExecutingData),
    /// Any other event type (`status`, `progress`, `executed`, ...).
    Other { kind: String },
}

/// Payload for `executing` frames.
///
/// When `node` is `None` (or empty) the prompt has completed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutingData {
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Execution metadata for the node (e.g. `step` / `steps` for samplers).
    #[serde(default)]
    pub exec_info: Option<Map<String, Value>>,
}

impl ExecutingData {
    /// The executing node, if any. Empty identifiers count as none.
    pub fn active_node(&self) -> Option<&str> {
        self.node.as_deref().filter(|node| !node.is_empty())
    }

    /// Whether this frame announces completion of the prompt.
    pub fn is_finished(&self) -> bool {
        self.active_node().is_none()
    }

    pub fn belongs_to(&self, prompt_id: &str) -> bool {
        self.prompt_id.as_deref() == Some(prompt_id)
    }

    /// The `(step, total)` pair from `exec_info`, when both are present
    /// as non-negative integers.
    pub fn step_total(&self) -> Option<(u64, u64)> {
        let info = self.exec_info.as_ref()?;
        let step = info.get("step")?.as_u64()?;
        let total = info
            .get("steps")
            .or_else(|| info.get("total"))?
            .as_u64()?;
        Some((step, total))
    }
}

/// Envelope shared by all ComfyUI text frames.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// A text frame that could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Not JSON, or missing the `type` discriminator.
    #[error("Malformed ComfyUI frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// A known event type whose payload has the wrong shape.
    #[error("Malformed '{kind}' payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a ComfyUI WebSocket text frame.
///
/// Unknown `type` values are not an error; they decode to
/// [`BackendEvent::Other`].
pub fn parse_event(text: &str) -> Result<BackendEvent, FrameError> {
    let frame: RawFrame = serde_json::from_str(text).map_err(FrameError::Malformed)?;

    if frame.kind != "executing" {
        return Ok(BackendEvent::Other { kind: frame.kind });
    }

    serde_json::from_value(frame.data)
        .map(BackendEvent::Executing)
        .map_err(|source| FrameError::Payload {
            kind: frame.kind,
            source,
        })
}
