//! Built-in session listeners.
//!
//! Every fatima process registers the connection, goaway, and cron listeners
//! at service start; the supervisor additionally registers the
//! transaction-verify responder.

mod connection;
mod cron;
mod goaway;
mod verify;

pub use connection::ConnectionListener;
pub use cron::CronListener;
pub use goaway::{GoawayListener, SUPERVISOR_NAME};
pub use verify::TransactionVerifyListener;
