//! Backend-facing WebSocket channel for one relay session.
//!
//! A [`BackendChannel`] is the split halves of one ComfyUI WebSocket. The
//! read half can be attached by exactly one [`FrameReader`] at a time (the
//! progress monitor of the session's active job); the write half is only
//! used to close the connection on teardown. Closing the channel also wakes
//! any attached reader so it can stop.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

/// Upper bound on the close handshake during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// One inbound frame, or the transport error that replaced it.
pub type BackendFrame = Result<Message, WsError>;

type FrameStream = Pin<Box<dyn Stream<Item = BackendFrame> + Send>>;
type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Shared handle to a session's backend connection.
///
/// Cloning is cheap; all clones refer to the same connection.
#[derive(Clone)]
pub struct BackendChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    client_id: String,
    frames: Arc<Mutex<FrameStream>>,
    sink: Mutex<FrameSink>,
    closed: CancellationToken,
}

impl BackendChannel {
    /// Build a channel from any frame stream and sink.
    pub fn new<St, Si>(client_id: impl Into<String>, frames: St, sink: Si) -> Self
    where
        St: Stream<Item = BackendFrame> + Send + 'static,
        Si: Sink<Message, Error = WsError> + Send + 'static,
    {
        Self {
            inner: Arc::new(ChannelInner {
                client_id: client_id.into(),
                frames: Arc::new(Mutex::new(Box::pin(frames))),
                sink: Mutex::new(Box::pin(sink)),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Split a connected WebSocket into a channel.
    pub fn from_websocket<S>(client_id: impl Into<String>, ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, frames) = ws_stream.split();
        Self::new(client_id, frames, sink)
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Take exclusive read access to the frame stream.
    ///
    /// Returns `None` while another reader is attached or after the
    /// channel has been closed.
    pub fn try_attach(&self) -> Option<FrameReader> {
        if self.is_closed() {
            return None;
        }
        let frames = Arc::clone(&self.inner.frames).try_lock_owned().ok()?;
        Some(FrameReader {
            frames,
            closed: self.inner.closed.clone(),
        })
    }

    /// Whether a reader is currently attached.
    pub fn is_attached(&self) -> bool {
        self.inner.frames.try_lock().is_err()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Close the connection.
    ///
    /// Attached readers observe end-of-stream immediately; the close
    /// handshake itself is bounded by a short timeout. Calling this more
    /// than once is harmless but later calls may report the transport as
    /// already closed.
    pub async fn close(&self) -> Result<(), WsError> {
        self.inner.closed.cancel();

        let mut sink = self.inner.sink.lock().await;
        match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(result) => result,
            Err(_) => Err(WsError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out closing ComfyUI WebSocket",
            ))),
        }
    }
}

impl std::fmt::Debug for BackendChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendChannel")
            .field("client_id", &self.inner.client_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Exclusive reader of a [`BackendChannel`]'s frames.
///
/// Dropping the reader releases the attachment.
pub struct FrameReader {
    frames: OwnedMutexGuard<FrameStream>,
    closed: CancellationToken,
}

impl FrameReader {
    /// Wait for the next frame.
    ///
    /// Returns `None` when the peer ends the stream or the channel is
    /// closed locally.
    pub async fn next(&mut self) -> Option<BackendFrame> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            frame = self.frames.next() => frame,
        }
    }
}
