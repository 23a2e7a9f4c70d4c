//! Progress monitor: one task per submitted job.
//!
//! The monitor owns the session's backend frame reader for the lifetime of
//! the job, decodes each frame, tracks the executing node and its progress,
//! and pushes translated [`ClientMessage`]s through the [`SessionRegistry`].
//!
//! ```text
//! AwaitEvent ──frame──▶ Executing ──▶ AwaitEvent
//!      │
//!      ├── executing(node = null) ──▶ Done
//!      ├── decode / transport error ──▶ Error
//!      └── stream ended / session gone ──▶ Closed
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use genrelay_comfyui::api::BackendGateway;
use genrelay_comfyui::channel::{BackendFrame, FrameReader};
use genrelay_comfyui::history::extract_outputs;
use genrelay_comfyui::messages::{parse_event, BackendEvent, ExecutingData};
use genrelay_core::images::ImageUrlBuilder;
use genrelay_core::stage::{step_percent, StageConfig};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use crate::ws::protocol::ClientMessage;
use crate::ws::registry::{JobSlot, SessionRegistry, SessionState, SessionTicket};

/// Knobs shared by every monitor.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub stages: StageConfig,
    pub images: ImageUrlBuilder,
    /// Node whose `inputs.seed` is reported in the result.
    pub seed_node: String,
    /// Give up when no frame arrives for this long. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

/// How a monitor finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The job completed and a `result` was sent.
    Done,
    /// One `error` message was sent and monitoring stopped.
    Failed,
    /// The backend or the client went away.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorState {
    AwaitEvent,
    Executing,
    Done,
    Error,
    Closed,
}

/// Per-job progress, private to one monitor task.
#[derive(Debug)]
struct Job {
    prompt_id: String,
    current_node: String,
    progress: u8,
    node_info: Map<String, Value>,
}

impl Job {
    fn new(prompt_id: String) -> Self {
        Self {
            prompt_id,
            current_node: String::new(),
            progress: 0,
            node_info: Map::new(),
        }
    }

    /// Apply an `executing` frame for an active node.
    fn advance(&mut self, node: &str, data: &ExecutingData, stages: &StageConfig) {
        if node != self.current_node {
            self.current_node = node.to_string();
            self.progress = 0;
        }
        self.node_info = data.exec_info.clone().unwrap_or_default();

        if !stages.is_progress_stage(node) {
            return;
        }
        if let Some(percent) = data.step_total().and_then(|(step, total)| step_percent(step, total)) {
            self.progress = self.progress.max(percent);
        }
    }

    fn progress_message(&self) -> ClientMessage {
        ClientMessage::Progress {
            prompt_id: self.prompt_id.clone(),
            node: self.current_node.clone(),
            progress: self.progress,
            node_info: self.node_info.clone(),
        }
    }
}

/// Spawns and runs progress monitors.
#[derive(Clone)]
pub struct ProgressMonitor {
    registry: Arc<SessionRegistry>,
    gateway: Arc<dyn BackendGateway>,
    settings: MonitorSettings,
}

impl ProgressMonitor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        gateway: Arc<dyn BackendGateway>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            registry,
            gateway,
            settings,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Run the monitor for `prompt_id` on its own task.
    pub fn spawn(&self, slot: JobSlot, prompt_id: String) -> JoinHandle<MonitorOutcome> {
        let monitor = self.clone();
        tokio::spawn(async move { monitor.run(slot, prompt_id).await })
    }

    /// Drive the job to a terminal state.
    ///
    /// The reader attachment is released when this returns.
    pub async fn run(&self, slot: JobSlot, prompt_id: String) -> MonitorOutcome {
        let JobSlot {
            ticket, mut reader, ..
        } = slot;
        let mut job = Job::new(prompt_id);
        let mut state = MonitorState::AwaitEvent;

        tracing::info!(
            client_id = %ticket.client_id(),
            prompt_id = %job.prompt_id,
            "Monitoring job",
        );

        let outcome = loop {
            state = match state {
                MonitorState::AwaitEvent | MonitorState::Executing => {
                    self.step(&ticket, &mut job, &mut reader).await
                }
                MonitorState::Done => break MonitorOutcome::Done,
                MonitorState::Error => break MonitorOutcome::Failed,
                MonitorState::Closed => break MonitorOutcome::Closed,
            };
        };

        match outcome {
            MonitorOutcome::Done => {
                self.registry.set_state(&ticket, SessionState::Done).await;
            }
            MonitorOutcome::Failed => {
                self.registry.set_state(&ticket, SessionState::Failed).await;
            }
            MonitorOutcome::Closed => {}
        }

        tracing::info!(
            client_id = %ticket.client_id(),
            prompt_id = %job.prompt_id,
            outcome = ?outcome,
            "Monitor finished",
        );
        outcome
    }

    // ---- private helpers ----

    /// Wait for one frame and act on it.
    async fn step(
        &self,
        ticket: &SessionTicket,
        job: &mut Job,
        reader: &mut FrameReader,
    ) -> MonitorState {
        let frame = match self.settings.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, reader.next()).await {
                Ok(frame) => frame,
                Err(_) => {
                    tracing::warn!(
                        client_id = %ticket.client_id(),
                        prompt_id = %job.prompt_id,
                        idle_secs = limit.as_secs(),
                        "No backend events within idle timeout",
                    );
                    let message = format!(
                        "No progress from ComfyUI for {} seconds",
                        limit.as_secs()
                    );
                    return self.fail(ticket, message).await;
                }
            },
            None => reader.next().await,
        };

        match frame {
            None => self.backend_closed(ticket).await,
            Some(frame) => self.handle_frame(ticket, job, frame).await,
        }
    }

    async fn handle_frame(
        &self,
        ticket: &SessionTicket,
        job: &mut Job,
        frame: BackendFrame,
    ) -> MonitorState {
        let client_id = ticket.client_id();

        let message = match frame {
            Ok(message) => message,
            Err(e) if is_disconnect(&e) => return self.backend_closed(ticket).await,
            Err(e) => {
                tracing::error!(client_id = %client_id, error = %e, "Backend transport error");
                return self
                    .fail(ticket, format!("ComfyUI connection error: {e}"))
                    .await;
            }
        };

        match message {
            WsMessage::Text(text) => self.handle_text(ticket, job, &text).await,
            WsMessage::Binary(bytes) => self.handle_preview(ticket, job, bytes).await,
            WsMessage::Close(_) => self.backend_closed(ticket).await,
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {
                MonitorState::AwaitEvent
            }
        }
    }

    async fn handle_text(&self, ticket: &SessionTicket, job: &mut Job, text: &str) -> MonitorState {
        let client_id = ticket.client_id();

        let data = match parse_event(text) {
            Ok(BackendEvent::Executing(data)) => data,
            Ok(BackendEvent::Other { kind }) => {
                tracing::trace!(client_id = %client_id, kind = %kind, "Ignoring backend event");
                return MonitorState::AwaitEvent;
            }
            Err(e) => {
                tracing::error!(client_id = %client_id, error = %e, "Undecodable backend frame");
                return self.fail(ticket, e.to_string()).await;
            }
        };

        if !data.belongs_to(&job.prompt_id) {
            tracing::trace!(
                client_id = %client_id,
                prompt_id = ?data.prompt_id,
                "Ignoring event for another prompt",
            );
            return MonitorState::AwaitEvent;
        }

        let Some(node) = data.active_node() else {
            return self.complete(ticket, job).await;
        };

        job.advance(node, &data, &self.settings.stages);
        tracing::debug!(
            client_id = %client_id,
            prompt_id = %job.prompt_id,
            node = %job.current_node,
            progress = job.progress,
            "Job progress",
        );

        if self.registry.send(client_id, &job.progress_message()).await {
            MonitorState::Executing
        } else {
            MonitorState::Closed
        }
    }

    async fn handle_preview(
        &self,
        ticket: &SessionTicket,
        job: &Job,
        bytes: Vec<u8>,
    ) -> MonitorState {
        let client_id = ticket.client_id();

        if !self.settings.stages.is_preview_stage(&job.current_node) {
            tracing::trace!(
                client_id = %client_id,
                node = %job.current_node,
                len = bytes.len(),
                "Dropping binary frame outside preview stage",
            );
            return MonitorState::AwaitEvent;
        }

        let preview = ClientMessage::Preview {
            prompt_id: job.prompt_id.clone(),
            node: job.current_node.clone(),
        };
        let text = match preview.to_frame() {
            Ok(text) => text,
            Err(e) => return self.fail(ticket, format!("Failed to encode preview: {e}")).await,
        };

        let frames = vec![Message::Binary(Bytes::from(bytes)), text];
        if self.registry.send_batch(client_id, frames).await {
            MonitorState::AwaitEvent
        } else {
            MonitorState::Closed
        }
    }

    /// The prompt finished: announce it, then report its outputs.
    async fn complete(&self, ticket: &SessionTicket, job: &Job) -> MonitorState {
        let client_id = ticket.client_id();
        let prompt_id = job.prompt_id.clone();

        let announced = ClientMessage::ExecutionComplete {
            prompt_id: prompt_id.clone(),
        };
        if !self.registry.send(client_id, &announced).await {
            return MonitorState::Closed;
        }

        let history = match self.gateway.history(&prompt_id).await {
            Ok(history) => history,
            Err(e) => {
                tracing::error!(
                    client_id = %client_id,
                    prompt_id = %prompt_id,
                    error = %e,
                    "Failed to fetch job history",
                );
                return self
                    .fail(ticket, format!("Failed to fetch results: {e}"))
                    .await;
            }
        };

        let outputs = extract_outputs(&history, &prompt_id, &self.settings.seed_node);
        let images = outputs
            .images
            .iter()
            .map(|img| {
                self.settings
                    .images
                    .image_ref(&img.filename, &img.subfolder, &img.kind)
            })
            .collect::<Vec<_>>();

        tracing::info!(
            client_id = %client_id,
            prompt_id = %prompt_id,
            image_count = images.len(),
            seed = ?outputs.seed,
            "Job complete",
        );

        let result = ClientMessage::Result {
            prompt_id,
            seed: outputs.seed,
            images,
        };
        if self.registry.send(client_id, &result).await {
            MonitorState::Done
        } else {
            MonitorState::Closed
        }
    }

    /// Report a failure to the client once.
    async fn fail(&self, ticket: &SessionTicket, message: String) -> MonitorState {
        if self
            .registry
            .send(ticket.client_id(), &ClientMessage::error(message))
            .await
        {
            MonitorState::Error
        } else {
            MonitorState::Closed
        }
    }

    /// The backend stream ended. Tear the session down unless it is already
    /// gone, so the client is not left talking to a dead backend.
    async fn backend_closed(&self, ticket: &SessionTicket) -> MonitorState {
        if self.registry.release(ticket).await {
            tracing::info!(client_id = %ticket.client_id(), "Backend closed, session released");
        }
        MonitorState::Closed
    }
}

/// Transport errors that simply mean the connection is gone.
fn is_disconnect(error: &WsError) -> bool {
    matches!(
        error,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}
