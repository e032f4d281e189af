//! Service assembly and process-wide entry points.
//!
//! [`IpcService`] wires the listener hub, the built-in listeners, and the
//! server into one unit; tests construct as many instances as they need with
//! fixture environments. The free functions below manage the single
//! process-wide instance that embedding applications use, with reset
//! semantics so one process can run repeated start/stop cycles.

use std::os::unix::fs::FileTypeExt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use fatima_core::env::{ProcessEnv, socket_path};
use fatima_core::platform::PlatformSupport;
use fatima_core::runtime::{CronRunner, GoawayRunner};

use crate::client::ClientSession;
use crate::error::IpcError;
use crate::fanout::{ListenerHub, SessionListener};
use crate::listener::{
    ConnectionListener, CronListener, GoawayListener, SUPERVISOR_NAME, TransactionVerifyListener,
};
use crate::message::{Message, command};
use crate::server::IpcServer;
use crate::transaction::TransactionStore;

static SERVICE: Mutex<Option<Arc<IpcService>>> = Mutex::const_new(None);

/// How long a goaway request watches for the target's start/done frames.
const GOAWAY_OBSERVE_TIMEOUT: Duration = Duration::from_secs(10);

/// One assembled IPC service: hub, built-in listeners, and server.
pub struct IpcService {
    env: Arc<dyn ProcessEnv>,
    platform: Arc<dyn PlatformSupport>,
    hub: Arc<ListenerHub>,
    server: Arc<IpcServer>,
    transactions: Option<Arc<TransactionStore>>,
    cancel: CancellationToken,
}

impl IpcService {
    /// Assemble and start a service instance.
    ///
    /// Registers the connection, goaway, and cron listeners; inside the
    /// supervisor process also creates the transaction registry and its
    /// verify responder. The server is bound before this returns.
    ///
    /// # Errors
    ///
    /// Propagates the server bind failure.
    pub async fn start(
        env: Arc<dyn ProcessEnv>,
        platform: Arc<dyn PlatformSupport>,
        goaway_runner: Arc<dyn GoawayRunner>,
        cron_runner: Arc<dyn CronRunner>,
    ) -> Result<Arc<Self>, IpcError> {
        let hub = ListenerHub::new();
        let cancel = CancellationToken::new();

        hub.register(ConnectionListener::new(cancel.clone())).await;
        hub.register(Arc::new(GoawayListener::new(
            env.clone(),
            platform.clone(),
            goaway_runner,
        )))
        .await;
        hub.register(Arc::new(CronListener::new(cron_runner))).await;

        let transactions = if env.program_name() == SUPERVISOR_NAME {
            let store = TransactionStore::new();
            hub.register(Arc::new(TransactionVerifyListener::new(
                env.clone(),
                store.clone(),
            )))
            .await;
            Some(store)
        } else {
            None
        };

        let server = IpcServer::new(env.clone(), hub.clone());
        server.start().await?;

        Ok(Arc::new(Self {
            env,
            platform,
            hub,
            server,
            transactions,
            cancel,
        }))
    }

    /// Stop the server and the background sweepers.
    pub async fn stop(&self) {
        self.server.stop().await;
        self.cancel.cancel();
    }

    /// Append a listener to the running service.
    pub async fn register_listener(&self, listener: Arc<dyn SessionListener>) {
        self.hub.register(listener).await;
    }

    /// Whether `proc` currently exposes a reachable IPC socket.
    ///
    /// Requires a readable PID file, a live process, and a socket-type file
    /// at the canonical path.
    pub fn is_peer_available(&self, proc: &str) -> bool {
        let Ok(pid) = self.env.pid_of(proc) else {
            return false;
        };
        if !self.platform.is_process_running(proc, pid) {
            warn!("process {proc} [{pid}] is not running");
            return false;
        }
        let sock = socket_path(&self.env.sock_dir_of(proc), proc, pid);
        match std::fs::metadata(&sock) {
            Ok(meta) => meta.file_type().is_socket(),
            Err(_) => false,
        }
    }

    /// Open a client session to `proc`.
    pub async fn client_session(&self, proc: &str) -> Result<ClientSession, IpcError> {
        ClientSession::connect(self.env.as_ref(), self.platform.as_ref(), proc).await
    }

    /// The transaction registry; present only inside the supervisor.
    pub fn transactions(&self) -> Option<&Arc<TransactionStore>> {
        self.transactions.as_ref()
    }

    /// Request a verified shutdown of `proc` (supervisor only).
    ///
    /// Mints a transaction id, sends `GOAWAY`, then observes the target's
    /// start/done frames for logging until the peer closes or a bounded
    /// wait elapses. The verification dialog itself arrives on a separate
    /// inbound session and is answered by the verify responder.
    ///
    /// Returns the minted transaction id.
    ///
    /// # Errors
    ///
    /// [`IpcError::NotSupervisor`] outside the supervisor process;
    /// connect/send failures as in [`ClientSession`].
    pub async fn request_goaway(&self, proc: &str) -> Result<String, IpcError> {
        let store = self.transactions.as_ref().ok_or(IpcError::NotSupervisor)?;
        let transaction = store.generate();

        let target = self.client_session(proc).await?;
        let sent = target
            .send(&Message::goaway(self.env.as_ref(), &transaction))
            .await;
        if let Err(e) = sent {
            target.disconnect().await;
            return Err(e);
        }
        info!("sent goaway to {proc}: {transaction}");

        self.observe_goaway(&target, proc).await;
        target.disconnect().await;
        Ok(transaction)
    }

    async fn observe_goaway(&self, target: &ClientSession, proc: &str) {
        let deadline = tokio::time::Instant::now() + GOAWAY_OBSERVE_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!("gave up waiting for goaway done from {proc}");
                break;
            }
            match tokio::time::timeout(remaining, target.read_command()).await {
                Ok(Ok(message)) if message.is(command::GOAWAY_START) => {
                    info!("{proc} started goaway");
                }
                Ok(Ok(message)) if message.is(command::GOAWAY_DONE) => {
                    info!("{proc} completed goaway");
                    break;
                }
                Ok(Ok(message)) => {
                    trace!("ignoring {} from {proc}", message.initiator.command);
                }
                Ok(Err(_)) => break, // peer closed
                Err(_) => {
                    warn!("gave up waiting for goaway done from {proc}");
                    break;
                }
            }
        }
    }
}

// ── Process-wide entry points ────────────────────────────────────────────────

/// Start the process-wide IPC service.
///
/// No-op when already running: the installed instance is returned. The
/// returned handle doubles as the closer; [`IpcService::stop`] or
/// [`stop_ipc_service`] shuts it down.
///
/// # Errors
///
/// Propagates the server bind failure.
pub async fn start_ipc_service(
    env: Arc<dyn ProcessEnv>,
    platform: Arc<dyn PlatformSupport>,
    goaway_runner: Arc<dyn GoawayRunner>,
    cron_runner: Arc<dyn CronRunner>,
) -> Result<Arc<IpcService>, IpcError> {
    let mut slot = SERVICE.lock().await;
    if let Some(service) = slot.as_ref() {
        return Ok(service.clone());
    }
    let service = IpcService::start(env, platform, goaway_runner, cron_runner).await?;
    *slot = Some(service.clone());
    Ok(service)
}

/// Stop and uninstall the process-wide IPC service. Idempotent.
pub async fn stop_ipc_service() {
    let service = SERVICE.lock().await.take();
    if let Some(service) = service {
        service.stop().await;
    }
}

/// Register a listener on the process-wide service.
///
/// Dropped with a warning when the service is not running.
pub async fn register_ipc_session_listener(listener: Arc<dyn SessionListener>) {
    let slot = SERVICE.lock().await;
    match slot.as_ref() {
        Some(service) => service.register_listener(listener).await,
        None => warn!("ipc service is not running; listener dropped"),
    }
}

/// Whether `proc` currently exposes a reachable IPC socket.
pub async fn is_fatima_ipc_available(proc: &str) -> bool {
    let slot = SERVICE.lock().await;
    match slot.as_ref() {
        Some(service) => service.is_peer_available(proc),
        None => false,
    }
}

/// Open a client session to `proc` through the process-wide service.
///
/// # Errors
///
/// [`IpcError::ServiceNotRunning`] before [`start_ipc_service`]; otherwise
/// as [`ClientSession::connect`].
pub async fn new_fatima_ipc_client_session(proc: &str) -> Result<ClientSession, IpcError> {
    let service = SERVICE
        .lock()
        .await
        .as_ref()
        .cloned()
        .ok_or(IpcError::ServiceNotRunning)?;
    service.client_session(proc).await
}
