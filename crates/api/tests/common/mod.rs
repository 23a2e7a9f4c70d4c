#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ws::Message;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use futures::channel::mpsc as fmpsc;
use futures::SinkExt;
use genrelay_api::config::ServerConfig;
use genrelay_api::router::build_app_router;
use genrelay_api::state::AppState;
use genrelay_api::ws::registry::{client_channel, ClientReceiver, Outbound, SessionTicket};
use genrelay_comfyui::api::{BackendGateway, ComfyUIApiError, SubmitResponse};
use genrelay_comfyui::channel::{BackendChannel, BackendFrame};
use genrelay_comfyui::client::{BackendConnector, ComfyUIClientError};
use genrelay_core::workflow::WorkflowStore;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// In-memory backend connector
// ---------------------------------------------------------------------------

/// Hands out in-memory backend channels and keeps the feeding end of each
/// so tests can play the part of ComfyUI.
#[derive(Default)]
pub struct StubConnector {
    feeds: Mutex<HashMap<String, fmpsc::UnboundedSender<BackendFrame>>>,
    refused: Mutex<Vec<String>>,
}

impl StubConnector {
    /// Make every future connect for `client_id` fail.
    pub fn refuse(&self, client_id: &str) {
        self.refused.lock().unwrap().push(client_id.to_string());
    }

    /// The frame feed of the most recent channel opened for `client_id`.
    pub fn feed(&self, client_id: &str) -> fmpsc::UnboundedSender<BackendFrame> {
        self.feeds
            .lock()
            .unwrap()
            .get(client_id)
            .cloned()
            .expect("no backend channel opened for client")
    }

    /// Drop the feed so the backend stream ends, as if ComfyUI hung up.
    pub fn hang_up(&self, client_id: &str) {
        if let Some(feed) = self.feeds.lock().unwrap().remove(client_id) {
            feed.close_channel();
        }
    }
}

#[async_trait]
impl BackendConnector for StubConnector {
    async fn connect(&self, client_id: &str) -> Result<BackendChannel, ComfyUIClientError> {
        if self.refused.lock().unwrap().iter().any(|id| id == client_id) {
            return Err(ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI for {client_id}"
            )));
        }
        let (frame_tx, frame_rx) = fmpsc::unbounded::<BackendFrame>();
        let (out_tx, _out_rx) = fmpsc::unbounded::<WsMessage>();
        let sink = out_tx.sink_map_err(|e| WsError::Io(std::io::Error::other(e)));
        self.feeds
            .lock()
            .unwrap()
            .insert(client_id.to_string(), frame_tx);
        Ok(BackendChannel::new(client_id, frame_rx, sink))
    }
}

// ---------------------------------------------------------------------------
// In-memory backend gateway
// ---------------------------------------------------------------------------

/// Records submissions and serves canned history, images and status.
#[derive(Default)]
pub struct StubGateway {
    pub submitted: Mutex<Vec<(Value, String)>>,
    histories: Mutex<HashMap<String, Value>>,
    /// Images keyed by `(folder type, filename)`.
    images: Mutex<HashMap<(String, String), Vec<u8>>>,
    next_prompt: AtomicU64,
    pub unavailable: AtomicBool,
}

impl StubGateway {
    pub fn set_history(&self, prompt_id: &str, history: Value) {
        self.histories
            .lock()
            .unwrap()
            .insert(prompt_id.to_string(), history);
    }

    pub fn put_image(&self, kind: &str, filename: &str, bytes: &[u8]) {
        self.images
            .lock()
            .unwrap()
            .insert((kind.to_string(), filename.to_string()), bytes.to_vec());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn last_submission(&self) -> (Value, String) {
        self.submitted
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("nothing was submitted")
    }

    fn check_available(&self) -> Result<(), ComfyUIApiError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ComfyUIApiError::BackendUnavailable(
                "connection refused".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BackendGateway for StubGateway {
    async fn submit(&self, workflow: &Value, client_id: &str) -> Result<SubmitResponse, ComfyUIApiError> {
        self.check_available()?;
        let n = self.next_prompt.fetch_add(1, Ordering::SeqCst) + 1;
        self.submitted
            .lock()
            .unwrap()
            .push((workflow.clone(), client_id.to_string()));
        Ok(SubmitResponse {
            prompt_id: format!("prompt-{n}"),
            number: n as i64,
            node_errors: json!({}),
        })
    }

    async fn history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        self.check_available()?;
        self.histories
            .lock()
            .unwrap()
            .get(prompt_id)
            .cloned()
            .ok_or_else(|| ComfyUIApiError::BackendUnavailable("history request failed".into()))
    }

    async fn fetch_image(
        &self,
        filename: &str,
        _subfolder: &str,
        kind: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        self.check_available()?;
        self.images
            .lock()
            .unwrap()
            .get(&(kind.to_string(), filename.to_string()))
            .cloned()
            .ok_or_else(|| ComfyUIApiError::NotFound(format!("image '{filename}'")))
    }

    async fn system_stats(&self) -> Result<Value, ComfyUIApiError> {
        self.check_available()?;
        Ok(json!({"system": {"os": "posix"}}))
    }
}

// ---------------------------------------------------------------------------
// Test application
// ---------------------------------------------------------------------------

/// The default workflow template: prompt node 4, seed node 11, output 12.
pub fn sample_workflow() -> Value {
    json!({
        "4": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["1", 1]}},
        "11": {"class_type": "KSampler", "inputs": {"seed": 0, "steps": 20}},
        "12": {"class_type": "SaveImage", "inputs": {"images": ["8", 0]}}
    })
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config(workflow_dir: &std::path::Path) -> ServerConfig {
    let mut config = ServerConfig::from_lookup(|_| None).unwrap();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.workflow_dir = workflow_dir.to_path_buf();
    config
}

pub struct TestApp {
    pub state: AppState,
    pub connector: Arc<StubConnector>,
    pub gateway: Arc<StubGateway>,
    pub router: Router,
    _workflow_dir: TempDir,
}

/// Build the full application with in-memory ComfyUI stand-ins.
pub fn build_test_app() -> TestApp {
    build_test_app_with(|_| {})
}

pub fn build_test_app_with(customize: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("0404test.json"),
        serde_json::to_string_pretty(&sample_workflow()).unwrap(),
    )
    .unwrap();

    let mut config = test_config(dir.path());
    customize(&mut config);

    let connector = Arc::new(StubConnector::default());
    let gateway = Arc::new(StubGateway::default());
    let workflows = WorkflowStore::new(config.workflow_dir.clone(), config.workflow_bindings());

    let state = AppState::new(
        config.clone(),
        Arc::clone(&connector) as Arc<dyn BackendConnector>,
        Arc::clone(&gateway) as Arc<dyn BackendGateway>,
        workflows,
    );
    let router = build_app_router(state.clone(), &config);

    TestApp {
        state,
        connector,
        gateway,
        router,
        _workflow_dir: dir,
    }
}

impl TestApp {
    /// Register a session the way the WebSocket handler does, returning
    /// the client's outbound queue.
    pub async fn open_session(&self, client_id: &str) -> (SessionTicket, ClientReceiver) {
        let (tx, rx) = client_channel();
        let ticket = self.state.sessions.open(client_id, tx).await.unwrap();
        (ticket, rx)
    }

    /// Serve the router on an ephemeral port.
    pub async fn serve(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }
}

// ---------------------------------------------------------------------------
// Backend frames
// ---------------------------------------------------------------------------

pub fn executing(prompt_id: &str, node: Option<&str>) -> BackendFrame {
    Ok(WsMessage::Text(
        json!({"type": "executing", "data": {"node": node, "prompt_id": prompt_id}}).to_string(),
    ))
}

pub fn executing_step(prompt_id: &str, node: &str, step: u64, steps: u64) -> BackendFrame {
    Ok(WsMessage::Text(
        json!({
            "type": "executing",
            "data": {
                "node": node,
                "prompt_id": prompt_id,
                "exec_info": {"step": step, "steps": steps}
            }
        })
        .to_string(),
    ))
}

pub fn event(kind: &str) -> BackendFrame {
    Ok(WsMessage::Text(json!({"type": kind, "data": {}}).to_string()))
}

pub fn binary(bytes: &[u8]) -> BackendFrame {
    Ok(WsMessage::Binary(bytes.to_vec()))
}

// ---------------------------------------------------------------------------
// Client queue helpers
// ---------------------------------------------------------------------------

/// Everything currently queued for the client, without waiting.
pub fn drain(rx: &mut ClientReceiver) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

/// Parse a single queued text frame as JSON.
pub fn as_json(outbound: &Outbound) -> Value {
    match outbound {
        Outbound::One(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("Expected a text frame, got {other:?}"),
    }
}

/// Wait (bounded) for the next queued item.
pub async fn next_outbound(rx: &mut ClientReceiver) -> Option<Outbound> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for client message")
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
