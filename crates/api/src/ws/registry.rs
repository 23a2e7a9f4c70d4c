//! Session registry: one entry per connected browser client.
//!
//! Each session couples the client's outbound queue with the client's own
//! ComfyUI WebSocket. The map is guarded by a single `RwLock`; backend
//! connects and closes always happen outside the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use genrelay_comfyui::channel::{BackendChannel, FrameReader};
use genrelay_comfyui::client::{BackendConnector, ComfyUIClientError};
use genrelay_core::error::CoreError;
use tokio::sync::{mpsc, RwLock};

use crate::ws::protocol::ClientMessage;

/// One unit of outbound traffic for a client connection.
///
/// A batch is written back-to-back by the connection's sender task, so
/// nothing else queued for the same client can land between its frames.
#[derive(Debug)]
pub enum Outbound {
    One(Message),
    Batch(Vec<Message>),
}

/// Sender half of a client connection's outbound queue.
pub type ClientSender = mpsc::UnboundedSender<Outbound>;

/// Receiver half, drained by the connection's sender task.
pub type ClientReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Create the outbound queue for a new client connection.
pub fn client_channel() -> (ClientSender, ClientReceiver) {
    mpsc::unbounded_channel()
}

/// Lifecycle of a session.
///
/// `Connecting` and `Closed` are never stored in the registry; they are
/// what [`SessionRegistry::open`] starts from and what
/// [`SessionRegistry::close`] leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Monitoring,
    Done,
    Failed,
    Closed,
}

/// Identifies one particular session registered under a client id.
///
/// A client id may be reopened; tickets let the owner of an older session
/// tear down only what it opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    client_id: String,
    epoch: u64,
}

impl SessionTicket {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

/// Exclusive right to read a session's backend frames for one job.
pub struct JobSlot {
    pub ticket: SessionTicket,
    pub reader: FrameReader,
    /// State to restore if the job never starts.
    pub previous: SessionState,
}

impl std::fmt::Debug for JobSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSlot")
            .field("ticket", &self.ticket)
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}

/// Backend connection could not be opened; nothing was registered.
#[derive(Debug, thiserror::Error)]
#[error("Failed to open backend connection for '{client_id}': {source}")]
pub struct SessionOpenError {
    pub client_id: String,
    #[source]
    pub source: ComfyUIClientError,
    /// The client queue handed to `open`, returned so the caller can still
    /// report the failure.
    pub client: ClientSender,
}

struct Session {
    epoch: u64,
    client: ClientSender,
    backend: BackendChannel,
    state: SessionState,
    connected_at: DateTime<Utc>,
}

/// Thread-safe table of live sessions.
///
/// Designed to be wrapped in `Arc` and shared by the WebSocket handler,
/// HTTP handlers and progress monitors.
pub struct SessionRegistry {
    connector: Arc<dyn BackendConnector>,
    sessions: RwLock<HashMap<String, Session>>,
    next_epoch: AtomicU64,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn BackendConnector>) -> Self {
        Self {
            connector,
            sessions: RwLock::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Open the backend connection for `client_id` and register the session.
    ///
    /// On failure nothing is registered and `client` is handed back inside
    /// the error. An existing session under the same id is replaced and
    /// torn down.
    pub async fn open(
        &self,
        client_id: &str,
        client: ClientSender,
    ) -> Result<SessionTicket, SessionOpenError> {
        tracing::debug!(client_id = %client_id, "Opening backend connection");

        let backend = match self.connector.connect(client_id).await {
            Ok(backend) => backend,
            Err(source) => {
                tracing::warn!(client_id = %client_id, error = %source, "Backend connection failed");
                return Err(SessionOpenError {
                    client_id: client_id.to_string(),
                    source,
                    client,
                });
            }
        };

        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let session = Session {
            epoch,
            client,
            backend,
            state: SessionState::Connected,
            connected_at: Utc::now(),
        };

        let replaced = self
            .sessions
            .write()
            .await
            .insert(client_id.to_string(), session);

        if let Some(old) = replaced {
            tracing::info!(client_id = %client_id, "Replacing existing session");
            Self::teardown(client_id, old).await;
        }

        tracing::info!(client_id = %client_id, "Session registered");
        Ok(SessionTicket {
            client_id: client_id.to_string(),
            epoch,
        })
    }

    /// Tear down the session for `client_id`, if any.
    ///
    /// Idempotent. Backend close failures are logged and swallowed. Returns
    /// whether a session was removed.
    pub async fn close(&self, client_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(client_id);
        match removed {
            Some(session) => {
                Self::teardown(client_id, session).await;
                true
            }
            None => false,
        }
    }

    /// Tear down the session identified by `ticket`, leaving any newer
    /// session under the same client id untouched.
    pub async fn release(&self, ticket: &SessionTicket) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let current = sessions
                .get(&ticket.client_id)
                .is_some_and(|s| s.epoch == ticket.epoch);
            if current {
                sessions.remove(&ticket.client_id)
            } else {
                None
            }
        };
        match removed {
            Some(session) => {
                Self::teardown(&ticket.client_id, session).await;
                true
            }
            None => false,
        }
    }

    /// Queue a protocol message for the client.
    ///
    /// Returns `false` when the session is gone (or was just torn down
    /// because its client connection had closed).
    pub async fn send(&self, client_id: &str, message: &ClientMessage) -> bool {
        match message.encode() {
            Ok(text) => self.send_text(client_id, text).await,
            Err(e) => {
                tracing::error!(client_id = %client_id, error = %e, "Failed to encode client message");
                self.contains(client_id).await
            }
        }
    }

    pub async fn send_text(&self, client_id: &str, text: String) -> bool {
        self.deliver(client_id, Outbound::One(Message::Text(text.into())))
            .await
    }

    pub async fn send_binary(&self, client_id: &str, bytes: impl Into<Bytes>) -> bool {
        self.deliver(client_id, Outbound::One(Message::Binary(bytes.into())))
            .await
    }

    /// Queue several frames to be written back-to-back.
    pub async fn send_batch(&self, client_id: &str, messages: Vec<Message>) -> bool {
        self.deliver(client_id, Outbound::Batch(messages)).await
    }

    /// The backend channel of `client_id`'s session.
    pub async fn backend_channel_of(&self, client_id: &str) -> Option<BackendChannel> {
        self.sessions
            .read()
            .await
            .get(client_id)
            .map(|s| s.backend.clone())
    }

    /// Reserve the session's backend frames for a new job.
    ///
    /// Returns `Ok(None)` when no session exists for `client_id`, and
    /// [`CoreError::Conflict`] while another job holds the frames. The
    /// reservation ends when the returned slot's reader is dropped.
    pub async fn begin_job(&self, client_id: &str) -> Result<Option<JobSlot>, CoreError> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(client_id) else {
            return Ok(None);
        };

        let Some(reader) = session.backend.try_attach() else {
            return Err(CoreError::Conflict(format!(
                "Session '{client_id}' is already monitoring a job"
            )));
        };

        let previous = session.state;
        session.state = SessionState::Monitoring;
        Ok(Some(JobSlot {
            ticket: SessionTicket {
                client_id: client_id.to_string(),
                epoch: session.epoch,
            },
            reader,
            previous,
        }))
    }

    /// Set the state of the session identified by `ticket`.
    pub async fn set_state(&self, ticket: &SessionTicket, state: SessionState) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&ticket.client_id) {
            Some(session) if session.epoch == ticket.epoch => {
                session.state = state;
                true
            }
            _ => false,
        }
    }

    /// Current state of `client_id`'s session; `Closed` when there is none.
    pub async fn state_of(&self, client_id: &str) -> SessionState {
        self.sessions
            .read()
            .await
            .get(client_id)
            .map_or(SessionState::Closed, |s| s.state)
    }

    pub async fn contains(&self, client_id: &str) -> bool {
        self.sessions.read().await.contains_key(client_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Send a Ping frame to every client.
    pub async fn ping_all(&self) {
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            let _ = session
                .client
                .send(Outbound::One(Message::Ping(Bytes::new())));
        }
    }

    /// Send a Close frame to every client, close every backend channel and
    /// clear the table.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, Session)> = self.sessions.write().await.drain().collect();
        let count = drained.len();

        for (client_id, session) in drained {
            let _ = session.client.send(Outbound::One(Message::Close(None)));
            Self::teardown(&client_id, session).await;
        }
        tracing::info!(count, "Closed all sessions");
    }

    // ---- private helpers ----

    async fn deliver(&self, client_id: &str, outbound: Outbound) -> bool {
        let failed = {
            let sessions = self.sessions.read().await;
            let Some(session) = sessions.get(client_id) else {
                tracing::trace!(client_id = %client_id, "Dropping message for unknown session");
                return false;
            };
            session.client.send(outbound).is_err()
        };

        if failed {
            tracing::debug!(client_id = %client_id, "Client connection gone, closing session");
            self.close(client_id).await;
            return false;
        }
        true
    }

    async fn teardown(client_id: &str, session: Session) {
        let Session {
            client,
            backend,
            connected_at,
            ..
        } = session;
        drop(client);

        if let Err(e) = backend.close().await {
            tracing::debug!(client_id = %client_id, error = %e, "Backend close failed");
        }

        let connected_secs = (Utc::now() - connected_at).num_seconds();
        tracing::info!(client_id = %client_id, connected_secs, "Session closed");
    }
}
