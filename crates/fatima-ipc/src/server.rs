//! Per-process IPC server.
//!
//! Binds the canonical Unix-domain socket for `(program, pid)`, accepts
//! connections, and runs one reader task per session. Every reader publishes
//! `Started`, one `Command` per decoded frame, and `Closed` through the
//! listener hub. Because the bind address is a filesystem name, only one
//! server per `(program, pid)` can exist; leftovers from prior crashes are
//! removed by the startup sweep.

use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use fatima_core::env::{ProcessEnv, SOCK_FILE_PREFIX};

use crate::error::IpcError;
use crate::fanout::{ListenerHub, SessionEvent};
use crate::message::{Message, read_frame_line};
use crate::session::SessionContext;

/// The per-process IPC listening socket plus its accept loop.
pub struct IpcServer {
    env: Arc<dyn ProcessEnv>,
    hub: Arc<ListenerHub>,
    state: Mutex<Option<ServerState>>,
}

struct ServerState {
    cancel: CancellationToken,
    socket_path: PathBuf,
}

impl IpcServer {
    pub fn new(env: Arc<dyn ProcessEnv>, hub: Arc<ListenerHub>) -> Arc<Self> {
        Arc::new(Self {
            env,
            hub,
            state: Mutex::new(None),
        })
    }

    /// Bind the canonical socket and spawn the accept loop.
    ///
    /// No-op when the server is already running. Stale `fatima.*` socket
    /// files in the socket directory are removed first; plain files are left
    /// alone.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the socket directory cannot be created or
    /// the address cannot be bound.
    pub async fn start(&self) -> Result<(), IpcError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }

        debug!("start ipc listen");
        let sock_dir = self.env.sock_dir();
        std::fs::create_dir_all(&sock_dir)?;
        sweep_stale_sockets(&sock_dir);

        let address = self.env.address();
        debug!("using ipc address: {}", address.display());
        let listener = UnixListener::bind(&address)?;

        let cancel = CancellationToken::new();
        tokio::spawn(accept_loop(
            listener,
            self.hub.clone(),
            cancel.clone(),
            address.clone(),
        ));

        *state = Some(ServerState {
            cancel,
            socket_path: address,
        });
        Ok(())
    }

    /// Cancel the accept loop and remove the socket file. Idempotent.
    ///
    /// In-flight sessions drain naturally on EOF.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if let Some(st) = state.take() {
            debug!("stop ipc listen");
            st.cancel.cancel();
            debug!("removing ipc socket file: {}", st.socket_path.display());
            let _ = std::fs::remove_file(&st.socket_path);
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }
}

async fn accept_loop(
    listener: UnixListener,
    hub: Arc<ListenerHub>,
    cancel: CancellationToken,
    address: PathBuf,
) {
    debug!("ipc accept loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, _addr)) => {
                    spawn_session(stream, hub.clone());
                }
                Err(e) => {
                    error!("failed to accept on {}: {e}", address.display());
                    // Brief pause before retrying to avoid a tight error loop.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    debug!("ipc accept loop stopped");
}

fn spawn_session(stream: UnixStream, hub: Arc<ListenerHub>) {
    let (ctx, read_half) = SessionContext::server(stream);
    tokio::spawn(run_session(ctx, read_half, hub));
}

/// Reader loop for one accepted session.
///
/// Parse errors are logged and skipped without closing; oversize frames and
/// read errors end the session.
async fn run_session(ctx: Arc<SessionContext>, read_half: OwnedReadHalf, hub: Arc<ListenerHub>) {
    debug!("[{ctx}] new ipc session started");
    hub.publish(SessionEvent::Started(ctx.clone())).await;

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
                match Message::parse(frame) {
                    Ok(message) => {
                        hub.publish(SessionEvent::Command(ctx.clone(), message)).await;
                    }
                    Err(e) => warn!("[{ctx}] failed to parse frame: {e}"),
                }
            }
            Err(e) => {
                warn!("[{ctx}] failed to read socket: {e}");
                break;
            }
        }
    }

    debug!("[{ctx}] client disconnected");
    ctx.close().await;
    hub.publish(SessionEvent::Closed(ctx)).await;
}

/// Remove leftover `fatima.*` socket files from a prior crash.
///
/// Only entries whose file type is socket are touched.
fn sweep_stale_sockets(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("failed to read socket dir {}: {e}", dir.display());
            return;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(SOCK_FILE_PREFIX) {
            continue;
        }
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_socket() {
            continue;
        }
        let path = entry.path();
        debug!("removing stale ipc socket file: {}", path.display());
        let _ = std::fs::remove_file(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sweep_removes_sockets_and_keeps_plain_files() {
        let dir = TempDir::new().unwrap();

        // A stale socket-type file with the fatima prefix.
        let stale = dir.path().join("fatima.old.1.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&stale).unwrap();
        // A plain file that happens to share the prefix.
        let plain = dir.path().join("fatima.old.notes");
        std::fs::write(&plain, "keep me").unwrap();
        // A socket-type file without the prefix.
        let other = dir.path().join("other.sock");
        let _other_listener = std::os::unix::net::UnixListener::bind(&other).unwrap();

        sweep_stale_sockets(dir.path());

        assert!(!stale.exists());
        assert!(plain.exists());
        assert!(other.exists());
    }
}
