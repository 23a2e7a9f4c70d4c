use std::sync::Arc;

use genrelay_comfyui::api::BackendGateway;
use genrelay_comfyui::client::BackendConnector;
use genrelay_core::workflow::WorkflowStore;

use crate::config::ServerConfig;
use crate::ws::{ProgressMonitor, SessionRegistry};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Live client sessions and their backend connections.
    pub sessions: Arc<SessionRegistry>,
    /// ComfyUI REST API.
    pub gateway: Arc<dyn BackendGateway>,
    /// Workflow templates on disk.
    pub workflows: Arc<WorkflowStore>,
    /// Starts one progress monitor per submitted job.
    pub monitor: ProgressMonitor,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        connector: Arc<dyn BackendConnector>,
        gateway: Arc<dyn BackendGateway>,
        workflows: WorkflowStore,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new(connector));
        let monitor = ProgressMonitor::new(
            Arc::clone(&sessions),
            Arc::clone(&gateway),
            config.monitor_settings(),
        );

        Self {
            config: Arc::new(config),
            sessions,
            gateway,
            workflows: Arc::new(workflows),
            monitor,
        }
    }
}
