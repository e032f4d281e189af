//! Error types for the IPC subsystem.

use fatima_core::env::EnvError;
use thiserror::Error;

/// Errors that can occur in the IPC layer.
///
/// Listener tasks convert every recoverable error into a log line plus a
/// session close; these variants surface only through the client-facing API
/// (connect, send, read, goaway request).
#[derive(Error, Debug)]
pub enum IpcError {
    /// Environment lookup failed (missing or malformed PID file).
    #[error(transparent)]
    Env(#[from] EnvError),

    /// The peer process is not running or its socket cannot be dialed.
    #[error("peer {proc} is unreachable: {reason}")]
    PeerUnreachable { proc: String, reason: String },

    /// Operation against a session whose socket has been released.
    #[error("session is closed")]
    SessionClosed,

    /// Malformed JSON on the wire; the session continues.
    #[error("failed to decode frame: {0}")]
    FrameDecode(#[source] serde_json::Error),

    /// A message could not be serialized for sending.
    #[error("failed to encode frame: {0}")]
    FrameEncode(#[source] serde_json::Error),

    /// Writing a frame to the socket failed; the session is terminated.
    #[error("failed to write frame: {0}")]
    FrameWrite(#[source] std::io::Error),

    /// The supervisor did not answer a verification query in time.
    #[error("timeout waiting for verification of transaction {transaction}")]
    VerifyTimeout { transaction: String },

    /// The supervisor answered with a different transaction id.
    #[error("transaction id mismatch: requested {requested}, received {received}")]
    VerifyMismatch { requested: String, received: String },

    /// The supervisor refused the transaction.
    #[error("transaction verification refused: {transaction}")]
    VerifyRefused { transaction: String },

    /// A dialog peer answered with a command the protocol does not expect.
    #[error("unexpected response command: {command}")]
    UnexpectedResponse { command: String },

    /// Goaway requests can only be issued by the supervisor process.
    #[error("only the supervisor can issue goaway requests")]
    NotSupervisor,

    /// The process-wide IPC service has not been started.
    #[error("ipc service is not running")]
    ServiceNotRunning,

    /// Raw I/O failure with no more specific shape.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
