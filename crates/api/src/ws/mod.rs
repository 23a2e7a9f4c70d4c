//! WebSocket relay: client sessions, progress monitoring and the
//! client-facing protocol.
//!
//! Provides the session registry, per-job progress monitors, heartbeat
//! pings, and the HTTP upgrade handler used by Axum routes.

mod handler;
mod heartbeat;
pub mod monitor;
pub mod protocol;
pub mod registry;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use monitor::{MonitorOutcome, MonitorSettings, ProgressMonitor};
pub use registry::{SessionRegistry, SessionState};
