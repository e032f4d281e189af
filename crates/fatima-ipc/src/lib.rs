//! Inter-process communication and coordinated shutdown for fatima processes.
//!
//! Every managed process publishes a Unix-domain stream socket at its
//! canonical path (`$FATIMA_HOME/app/<name>/proc/fatima.<name>.<pid>.sock`)
//! and exchanges newline-delimited JSON frames with its peers. On top of
//! that wire sit three coordinated behaviors:
//!
//! - **Goaway** — a graceful-shutdown request that the target verifies with
//!   the supervisor (`juno`) through a challenge-response dialog before
//!   honoring it. A spoofed or stale request is refused and the session
//!   closed.
//! - **Cron execute** — on-demand invocation of a named scheduled job.
//! - **Session fan-out** — registered listeners observe every session's
//!   lifecycle (`on_start` / `on_command` / `on_close`) through per-listener
//!   bounded channels that preserve per-session ordering.
//!
//! Embedding applications call [`service::start_ipc_service`] with their
//! environment, platform support, and runner implementations; tests wire
//! [`service::IpcService`] instances directly.

pub mod client;
pub mod error;
pub mod fanout;
pub mod listener;
pub mod message;
pub mod server;
pub mod service;
pub mod session;
pub mod transaction;

pub use client::ClientSession;
pub use error::IpcError;
pub use fanout::{ListenerHub, SessionEvent, SessionListener};
pub use listener::SUPERVISOR_NAME;
pub use message::{Message, as_bool, as_string};
pub use server::IpcServer;
pub use service::{
    IpcService, is_fatima_ipc_available, new_fatima_ipc_client_session,
    register_ipc_session_listener, start_ipc_service, stop_ipc_service,
};
pub use session::{SessionContext, SessionRole};
pub use transaction::TransactionStore;
