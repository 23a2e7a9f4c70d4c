use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use genrelay_core::workflow::DEFAULT_WORKFLOW;

use crate::engine::{submit_job, JobRequest};
use crate::state::AppState;
use crate::ws::protocol::{decode_request, ClientMessage, ClientRequest, PromptRequest};
use crate::ws::registry::{client_channel, ClientReceiver, Outbound, SessionTicket};

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the client gets its own ComfyUI connection, registered
/// under `client_id` with the session registry.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Spawns a sender task that drains the session's outbound queue.
///   2. Opens the session; on failure reports `connection_error` and closes
///      with code 1011.
///   3. Processes inbound `prompt` requests on the current task.
///   4. Tears the session down on disconnect.
async fn handle_socket(socket: WebSocket, client_id: String, state: AppState) {
    tracing::info!(client_id = %client_id, "WebSocket connected");

    let (sink, mut stream) = socket.split();
    let (tx, rx) = client_channel();
    let send_task = tokio::spawn(forward_outbound(sink, rx, client_id.clone()));

    let ticket = match state.sessions.open(&client_id, tx).await {
        Ok(ticket) => ticket,
        Err(err) => {
            let mut frames = Vec::with_capacity(2);
            if let Ok(frame) =
                ClientMessage::connection_error("Unable to connect to ComfyUI server").to_frame()
            {
                frames.push(frame);
            }
            frames.push(Message::Close(Some(CloseFrame {
                code: close_code::ERROR,
                reason: "ComfyUI connection failed".into(),
            })));
            let _ = err.client.send(Outbound::Batch(frames));
            drop(err);

            let _ = send_task.await;
            tracing::info!(client_id = %client_id, "WebSocket closed after backend connection failure");
            return;
        }
    };

    state.sessions.send(&client_id, &ClientMessage::connected()).await;

    // Receiver loop: process inbound messages.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Text(text)) => handle_request(&state, &ticket, text.as_str()).await,
            Ok(Message::Pong(_)) => {
                tracing::trace!(client_id = %client_id, "Pong received");
            }
            Ok(_msg) => {}
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Clean up: tear down this session (not a replacement) and stop the sender.
    state.sessions.release(&ticket).await;
    send_task.abort();
    tracing::info!(client_id = %client_id, "WebSocket disconnected");
}

/// Forward queued frames to the WebSocket sink until the queue closes, the
/// sink fails or a Close frame has been written.
async fn forward_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: ClientReceiver,
    client_id: String,
) {
    while let Some(outbound) = rx.recv().await {
        let frames = match outbound {
            Outbound::One(frame) => vec![frame],
            Outbound::Batch(frames) => frames,
        };
        for frame in frames {
            let closing = matches!(frame, Message::Close(_));
            if let Err(e) = sink.send(frame).await {
                tracing::debug!(client_id = %client_id, error = %e, "WebSocket sink closed");
                return;
            }
            if closing {
                return;
            }
        }
    }
    let _ = sink.close().await;
}

/// Handle one client text frame.
async fn handle_request(state: &AppState, ticket: &SessionTicket, text: &str) {
    let client_id = ticket.client_id();

    match decode_request(text) {
        Ok(ClientRequest::Prompt(prompt)) => submit_prompt(state, client_id, prompt).await,
        Ok(ClientRequest::Unknown { kind }) => {
            tracing::debug!(client_id = %client_id, kind = %kind, "Ignoring client request");
        }
        Err(e) => {
            tracing::debug!(client_id = %client_id, error = %e, "Undecodable client frame");
            let message = ClientMessage::error(format!("Invalid request: {e}"));
            state.sessions.send(client_id, &message).await;
        }
    }
}

async fn submit_prompt(state: &AppState, client_id: &str, prompt: PromptRequest) {
    let request = JobRequest {
        client_id: client_id.to_string(),
        workflow_name: prompt
            .workflow_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_WORKFLOW.to_string()),
        prompt_text: prompt.prompt_text,
        seed: prompt.seed,
    };

    match submit_job(state, &request).await {
        Ok(mut job) => {
            let queued = ClientMessage::PromptQueued {
                prompt_id: job.prompt_id.clone(),
            };
            if state.sessions.send(client_id, &queued).await {
                job.start_monitor(&state.monitor);
            }
        }
        Err(e) => {
            tracing::warn!(client_id = %client_id, error = %e, "WebSocket prompt rejected");
            state
                .sessions
                .send(client_id, &ClientMessage::error(e.to_string()))
                .await;
        }
    }
}
