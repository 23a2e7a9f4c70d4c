use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use genrelay_api::config::{LogFormat, ServerConfig};
use genrelay_api::router::build_app_router;
use genrelay_api::state::AppState;
use genrelay_api::ws;
use genrelay_comfyui::api::{BackendGateway, ComfyUIApi};
use genrelay_comfyui::client::{BackendConnector, ComfyUIClient};
use genrelay_core::workflow::WorkflowStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;

    // --- Tracing ---
    init_tracing(config.log_format);
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Workflow templates ---
    let workflows = WorkflowStore::new(config.workflow_dir.clone(), config.workflow_bindings());
    workflows.ensure_dir().await.with_context(|| {
        format!(
            "Failed to create workflow directory {}",
            config.workflow_dir.display()
        )
    })?;
    tracing::info!(dir = %config.workflow_dir.display(), "Workflow directory ready");

    // --- ComfyUI ---
    let gateway: Arc<dyn BackendGateway> = Arc::new(ComfyUIApi::new(config.comfyui_api_url.clone()));
    let connector: Arc<dyn BackendConnector> =
        Arc::new(ComfyUIClient::new(config.comfyui_ws_url.clone()));
    tracing::info!(
        api_url = %config.comfyui_api_url,
        ws_url = %config.comfyui_ws_url,
        "ComfyUI endpoints configured",
    );

    // --- App state ---
    let state = AppState::new(config.clone(), connector, gateway, workflows);

    // --- Heartbeat ---
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&state.sessions),
        Duration::from_secs(config.heartbeat_interval_secs),
    );

    // --- Router ---
    let app = build_app_router(state.clone(), &config);

    // --- Start server ---
    let ip = config
        .host
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(ip, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let count = state.sessions.session_count().await;
    tracing::info!(count, "Closing remaining sessions");
    state.sessions.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Heartbeat task stopped");

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "genrelay_api=debug,genrelay_comfyui=debug,tower_http=debug".into()
    });

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix). If a handler cannot
/// be installed, that signal is simply never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
