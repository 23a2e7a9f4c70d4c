use std::sync::Arc;
use std::time::Duration;

use crate::ws::registry::SessionRegistry;

/// Spawn a background task that sends periodic Ping frames to every
/// connected client.
///
/// The task runs until aborted through the returned `JoinHandle`, which
/// happens during shutdown.
pub fn start_heartbeat(
    sessions: Arc<SessionRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;
            let count = sessions.session_count().await;
            tracing::debug!(count, "WebSocket heartbeat ping");
            sessions.ping_all().await;
        }
    })
}
