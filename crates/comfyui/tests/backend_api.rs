//! `ComfyUIApi` against a minimal in-process ComfyUI stand-in.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use genrelay_comfyui::api::{BackendGateway, ComfyUIApi, ComfyUIApiError};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct Backend {
    last_prompt: Arc<Mutex<Option<Value>>>,
}

async fn queue_prompt(State(backend): State<Backend>, Json(body): Json<Value>) -> Json<Value> {
    *backend.last_prompt.lock().unwrap() = Some(body);
    Json(json!({"prompt_id": "abc-123", "number": 7, "node_errors": {}}))
}

async fn history(Path(prompt_id): Path<String>) -> impl IntoResponse {
    match prompt_id.as_str() {
        "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        id => Json(json!({ id: {"outputs": {}} })).into_response(),
    }
}

async fn view(Query(query): Query<Vec<(String, String)>>) -> impl IntoResponse {
    let get = |key: &str| {
        query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    };
    if get("filename") == "a.png" && get("type") == "temp" && get("subfolder") == "previews" {
        (StatusCode::OK, b"PNGDATA".to_vec()).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn system_stats() -> Json<Value> {
    Json(json!({"system": {"os": "posix", "python_version": "3.11"}, "devices": []}))
}

async fn serve_backend() -> (SocketAddr, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route("/prompt", post(queue_prompt))
        .route("/history/{prompt_id}", get(history))
        .route("/view", get(view))
        .route("/system_stats", get(system_stats))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, backend)
}

// ---------------------------------------------------------------------------
// Test: submission posts the graph and client id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_posts_prompt_and_client_id() {
    let (addr, backend) = serve_backend().await;
    let api = ComfyUIApi::new(format!("http://{addr}/"));
    let graph = json!({"11": {"inputs": {"seed": 5}}});

    let response = api.submit(&graph, "client-9").await.unwrap();

    assert_eq!(response.prompt_id, "abc-123");
    assert_eq!(response.number, 7);
    let sent = backend.last_prompt.lock().unwrap().clone().unwrap();
    assert_eq!(sent["client_id"], "client-9");
    assert_eq!(sent["prompt"], graph);
}

// ---------------------------------------------------------------------------
// Test: history is returned as-is, server errors are unavailability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn history_returns_raw_record() {
    let (addr, _) = serve_backend().await;
    let api = ComfyUIApi::new(format!("http://{addr}"));

    let record = api.history("p1").await.unwrap();
    assert_eq!(record, json!({"p1": {"outputs": {}}}));
}

#[tokio::test]
async fn history_server_error_is_unavailable() {
    let (addr, _) = serve_backend().await;
    let api = ComfyUIApi::new(format!("http://{addr}"));

    let err = api.history("broken").await.unwrap_err();
    assert_matches!(err, ComfyUIApiError::BackendUnavailable(msg) if msg.contains("500"));
}

// ---------------------------------------------------------------------------
// Test: image download passes the query and maps 404 to NotFound
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_image_returns_bytes() {
    let (addr, _) = serve_backend().await;
    let api = ComfyUIApi::new(format!("http://{addr}"));

    let bytes = api.fetch_image("a.png", "previews", "temp").await.unwrap();
    assert_eq!(bytes, b"PNGDATA".to_vec());
}

#[tokio::test]
async fn fetch_missing_image_is_not_found() {
    let (addr, _) = serve_backend().await;
    let api = ComfyUIApi::new(format!("http://{addr}"));

    let err = api.fetch_image("a.png", "previews", "output").await.unwrap_err();
    assert_matches!(err, ComfyUIApiError::NotFound(msg) if msg.contains("a.png"));
}

// ---------------------------------------------------------------------------
// Test: system_stats probe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn system_stats_returns_json() {
    let (addr, _) = serve_backend().await;
    let api = ComfyUIApi::new(format!("http://{addr}"));

    let stats = api.system_stats().await.unwrap();
    assert_eq!(stats["system"]["os"], "posix");
}

#[tokio::test]
async fn unknown_endpoint_is_unavailable_not_missing() {
    let (addr, _) = serve_backend().await;
    // Pointing at a sub-path makes every endpoint 404.
    let api = ComfyUIApi::new(format!("http://{addr}/nowhere"));

    assert_matches!(
        api.system_stats().await,
        Err(ComfyUIApiError::BackendUnavailable(_))
    );
}
