//! Session context: one endpoint of an IPC connection.
//!
//! A context owns the write half of its socket behind a mutex (at most one
//! writer at any instant) and hands the read half to exactly one reader loop
//! at construction. Closing is idempotent; a closed context reports
//! [`IpcError::SessionClosed`] on send and fires a cancellation token that
//! the reader loop observes, so a forced close unblocks a pending read.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use std::sync::Arc;

use crate::error::IpcError;
use crate::message::Message;

static SERVER_SESSION_SEQ: AtomicI64 = AtomicI64::new(0);

/// Which side of the connection a context represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Server,
    Client,
}

/// One endpoint of an IPC connection.
///
/// The string form (`[S:<id>]` / `[C:<id>]`) is stable for the lifetime of
/// the session and is used as the key in listener-side maps.
pub struct SessionContext {
    role: SessionRole,
    id: i64,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: CancellationToken,
}

impl SessionContext {
    /// Wrap an accepted connection. Ids come from a per-process counter.
    pub fn server(stream: UnixStream) -> (Arc<Self>, OwnedReadHalf) {
        let id = SERVER_SESSION_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
        Self::with_id(SessionRole::Server, id, stream)
    }

    /// Wrap an outbound connection. Ids seed from wall-clock millis so
    /// server and client sessions stay distinguishable in logs.
    pub fn client(stream: UnixStream) -> (Arc<Self>, OwnedReadHalf) {
        let id = chrono::Utc::now().timestamp_millis();
        Self::with_id(SessionRole::Client, id, stream)
    }

    fn with_id(role: SessionRole, id: i64, stream: UnixStream) -> (Arc<Self>, OwnedReadHalf) {
        let (read_half, write_half) = stream.into_split();
        let ctx = Arc::new(Self {
            role,
            id,
            writer: Mutex::new(Some(write_half)),
            closed: CancellationToken::new(),
        });
        (ctx, read_half)
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Serialize `message` and write the frame under the write mutex.
    ///
    /// Partial writes are completed before returning.
    ///
    /// # Errors
    ///
    /// [`IpcError::SessionClosed`] when the socket has been released;
    /// [`IpcError::FrameWrite`] when the write itself fails.
    pub async fn send(&self, message: &Message) -> Result<(), IpcError> {
        let payload = message.encode_frame()?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(IpcError::SessionClosed)?;
        writer
            .write_all(&payload)
            .await
            .map_err(IpcError::FrameWrite)?;
        writer.flush().await.map_err(IpcError::FrameWrite)
    }

    /// Close the session. Idempotent.
    ///
    /// Shuts down and releases the write half, then cancels the token the
    /// reader loop selects on.
    pub async fn close(&self) {
        {
            let mut guard = self.writer.lock().await;
            if let Some(mut writer) = guard.take() {
                let _ = writer.shutdown().await;
            }
        }
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token fired by [`close`](Self::close); the reader loop observes it so
    /// a forced close unblocks a pending read.
    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl fmt::Display for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            SessionRole::Server => write!(f, "[S:{}]", self.id),
            SessionRole::Client => write!(f, "[C:{}]", self.id),
        }
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("role", &self.role)
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
