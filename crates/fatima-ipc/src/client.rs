//! Client session: dial a peer process's IPC socket by name.
//!
//! The peer is located through the environment provider (PID file → canonical
//! socket path), never through an address carried in a message. Decoded
//! inbound frames land on a bounded channel; [`ClientSession::read_command`]
//! awaits it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::net::unix::OwnedReadHalf;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace, warn};

use fatima_core::env::{ProcessEnv, socket_path};
use fatima_core::platform::PlatformSupport;

use crate::error::IpcError;
use crate::message::{Message, read_frame_line};
use crate::session::SessionContext;

/// Depth of the inbound message queue.
const INBOX_DEPTH: usize = 16;

/// An outbound connection to a peer process's IPC server.
pub struct ClientSession {
    ctx: Arc<SessionContext>,
    inbox: Mutex<mpsc::Receiver<Message>>,
    connected: Arc<AtomicBool>,
}

impl ClientSession {
    /// Dial `proc`'s canonical socket.
    ///
    /// # Errors
    ///
    /// [`IpcError::Env`] when the peer's PID file is unavailable;
    /// [`IpcError::PeerUnreachable`] when the peer is not running or the
    /// dial fails.
    pub async fn connect(
        env: &dyn ProcessEnv,
        platform: &dyn PlatformSupport,
        proc: &str,
    ) -> Result<Self, IpcError> {
        let pid = env.pid_of(proc)?;
        if !platform.is_process_running(proc, pid) {
            return Err(IpcError::PeerUnreachable {
                proc: proc.to_string(),
                reason: format!("process not running (pid {pid})"),
            });
        }

        let address = socket_path(&env.sock_dir_of(proc), proc, pid);
        let stream = UnixStream::connect(&address).await.map_err(|e| {
            IpcError::PeerUnreachable {
                proc: proc.to_string(),
                reason: format!("{}: {e}", address.display()),
            }
        })?;

        let (ctx, read_half) = SessionContext::client(stream);
        let (tx, rx) = mpsc::channel(INBOX_DEPTH);
        let connected = Arc::new(AtomicBool::new(true));

        debug!("[{ctx}] connection established, start reading");
        tokio::spawn(read_loop(ctx.clone(), read_half, tx, connected.clone()));

        Ok(Self {
            ctx,
            inbox: Mutex::new(rx),
            connected,
        })
    }

    /// Send one frame to the peer.
    ///
    /// # Errors
    ///
    /// [`IpcError::SessionClosed`] after a disconnect; write failures as in
    /// [`SessionContext::send`].
    pub async fn send(&self, message: &Message) -> Result<(), IpcError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(IpcError::SessionClosed);
        }
        self.ctx.send(message).await?;
        debug!("[{}] sent command: {message}", self.ctx);
        Ok(())
    }

    /// Await the next decoded frame from the peer.
    ///
    /// # Errors
    ///
    /// [`IpcError::SessionClosed`] once the session is disconnected and the
    /// queue has drained.
    pub async fn read_command(&self) -> Result<Message, IpcError> {
        let mut inbox = self.inbox.lock().await;
        inbox.recv().await.ok_or(IpcError::SessionClosed)
    }

    /// Close the session. Idempotent.
    ///
    /// The connected flag is cleared before the socket closes so the reader
    /// drops a final partial frame instead of delivering it.
    pub async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!("[{}] disconnecting", self.ctx);
            self.ctx.close().await;
        }
    }

    /// The underlying session context (stable log identity).
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }
}

async fn read_loop(
    ctx: Arc<SessionContext>,
    read_half: OwnedReadHalf,
    tx: mpsc::Sender<Message>,
    connected: Arc<AtomicBool>,
) {
    let closed = ctx.closed_token();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = closed.cancelled() => break,
            read = read_frame_line(&mut reader, &mut line) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                let frame = line.trim();
                if frame.is_empty() {
                    continue;
                }
                let message = match Message::parse(frame) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("[{ctx}] failed to parse frame: {e}");
                        continue;
                    }
                };
                if !connected.load(Ordering::SeqCst) {
                    break;
                }
                trace!("[{ctx}] recv from peer: {message}");
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("[{ctx}] failed to read socket: {e}");
                break;
            }
        }
    }
}
