use tokio::task::JoinHandle;

use crate::error::AppResult;
use crate::state::AppState;
use crate::ws::monitor::{MonitorOutcome, ProgressMonitor};
use crate::ws::registry::JobSlot;

/// Everything needed to queue one prompt.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// ComfyUI client id; events for the prompt go to this id's socket.
    pub client_id: String,
    pub workflow_name: String,
    pub prompt_text: String,
    /// Explicit seed, or `None` for a random one.
    pub seed: Option<u64>,
}

/// A prompt accepted by ComfyUI.
pub struct SubmittedJob {
    pub prompt_id: String,
    /// Position in ComfyUI's queue.
    pub number: i64,
    pub client_id: String,
    /// Seed actually written into the workflow.
    pub seed: u64,
    slot: Option<JobSlot>,
}

impl SubmittedJob {
    /// Start the progress monitor, if the job belongs to a live session.
    ///
    /// Callers that want to tell the client about the job first (e.g.
    /// `prompt_queued`) do so before calling this.
    pub fn start_monitor(
        &mut self,
        monitor: &ProgressMonitor,
    ) -> Option<JoinHandle<MonitorOutcome>> {
        let slot = self.slot.take()?;
        Some(monitor.spawn(slot, self.prompt_id.clone()))
    }
}

/// Prepare the workflow and queue it on ComfyUI.
///
/// When `client_id` has a live session its backend frames are reserved
/// before submission, so no event for the new prompt can be missed and a
/// second concurrent job is rejected with a conflict.
pub async fn submit_job(state: &AppState, request: &JobRequest) -> AppResult<SubmittedJob> {
    let prepared = state
        .workflows
        .prepare(&request.workflow_name, &request.prompt_text, request.seed)
        .await?;

    let slot = state.sessions.begin_job(&request.client_id).await?;

    let response = match state.gateway.submit(&prepared.graph, &request.client_id).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(
                client_id = %request.client_id,
                workflow = %request.workflow_name,
                error = %e,
                "Prompt submission failed",
            );
            if let Some(slot) = slot {
                state.sessions.set_state(&slot.ticket, slot.previous).await;
            }
            return Err(e.into());
        }
    };

    if response
        .node_errors
        .as_object()
        .is_some_and(|errors| !errors.is_empty())
    {
        tracing::warn!(
            prompt_id = %response.prompt_id,
            node_errors = %response.node_errors,
            "ComfyUI reported node errors",
        );
    }

    tracing::info!(
        client_id = %request.client_id,
        prompt_id = %response.prompt_id,
        workflow = %request.workflow_name,
        seed = prepared.seed,
        monitored = slot.is_some(),
        "Prompt queued",
    );

    Ok(SubmittedJob {
        prompt_id: response.prompt_id,
        number: response.number,
        client_id: request.client_id.clone(),
        seed: prepared.seed,
        slot,
    })
}
