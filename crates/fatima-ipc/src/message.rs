//! Wire message codec.
//!
//! Every frame on a fatima IPC socket is a single JSON object followed by
//! `\n`:
//!
//! ```json
//! { "initiator": { "process": "mypgm", "command": "TRANSACTION_VERIFY",
//!                  "sock": "/tmp/fatima.mypgm.312.sock" },
//!   "data": { "transaction": "1234567890" } }
//! ```
//!
//! The decoder is tolerant: unknown fields are preserved through a decode →
//! encode round trip so newer peers can extend the envelope without breaking
//! older ones.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use fatima_core::env::ProcessEnv;

use crate::error::IpcError;

/// Commands understood by the built-in listeners. Case-sensitive.
pub mod command {
    pub const GOAWAY: &str = "GOAWAY";
    pub const TRANSACTION_VERIFY: &str = "TRANSACTION_VERIFY";
    pub const TRANSACTION_VERIFY_DONE: &str = "TRANSACTION_VERIFY_DONE";
    pub const GOAWAY_START: &str = "GOAWAY_START";
    pub const GOAWAY_DONE: &str = "GOAWAY_DONE";
    pub const CRON_EXECUTE: &str = "CRON_EXECUTE";
}

/// Well-known keys of the `data` map.
pub mod key {
    pub const TRANSACTION: &str = "transaction";
    pub const VERIFY: &str = "verify";
    pub const JOB: &str = "job";
    pub const SAMPLE: &str = "sample";
}

/// Frames larger than this are treated as read errors.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Read one newline-terminated frame into `line`.
///
/// The scanner itself is bounded: reading stops once `MAX_FRAME_LEN` is
/// exceeded and an `InvalidData` error is returned without buffering the
/// rest of the oversize line. Returns `Ok(0)` at EOF; a final unterminated
/// line is returned as a frame.
pub(crate) async fn read_frame_line<R>(reader: &mut R, line: &mut String) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = reader
        .take((MAX_FRAME_LEN + 1) as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame exceeds the {MAX_FRAME_LEN} byte line limit"),
        ));
    }
    let text = std::str::from_utf8(&buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    line.push_str(text);
    Ok(n)
}

/// Identity of the frame's sender.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Initiator {
    /// Sender program name.
    pub process: String,
    /// Command string; see [`command`].
    pub command: String,
    /// Sender socket path.
    pub sock: String,
    /// Unknown fields, preserved for forward compatibility.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P:{}|C:{}|S:{}", self.process, self.command, self.sock)
    }
}

/// The sole wire datum: an initiator plus a dynamically typed data map.
///
/// Messages are immutable after construction; build them with the
/// command-specific constructors below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub initiator: Initiator,
    #[serde(default, skip_serializing_if = "JsonBody::is_empty")]
    pub data: JsonBody,
    /// Unknown fields, preserved for forward compatibility.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    fn base(env: &dyn ProcessEnv, command: &str) -> Self {
        Self {
            initiator: Initiator {
                process: env.program_name().to_string(),
                command: command.to_string(),
                sock: env.address().to_string_lossy().into_owned(),
                extra: Map::new(),
            },
            data: JsonBody::default(),
            extra: Map::new(),
        }
    }

    fn with_transaction(env: &dyn ProcessEnv, command: &str, transaction: &str) -> Self {
        let mut message = Self::base(env, command);
        message
            .data
            .0
            .insert(key::TRANSACTION.to_string(), Value::from(transaction));
        message
    }

    /// A shutdown request carrying the supervisor-minted transaction id.
    pub fn goaway(env: &dyn ProcessEnv, transaction: &str) -> Self {
        Self::with_transaction(env, command::GOAWAY, transaction)
    }

    /// Announces that the verified shutdown is about to run.
    pub fn goaway_start(env: &dyn ProcessEnv, transaction: &str) -> Self {
        Self::with_transaction(env, command::GOAWAY_START, transaction)
    }

    /// Announces that the verified shutdown has completed.
    pub fn goaway_done(env: &dyn ProcessEnv, transaction: &str) -> Self {
        Self::with_transaction(env, command::GOAWAY_DONE, transaction)
    }

    /// Asks the supervisor whether `transaction` is one it issued.
    pub fn transaction_verify(env: &dyn ProcessEnv, transaction: &str) -> Self {
        Self::with_transaction(env, command::TRANSACTION_VERIFY, transaction)
    }

    /// The supervisor's answer to a verification query.
    pub fn transaction_verify_done(
        env: &dyn ProcessEnv,
        transaction: &str,
        verified: bool,
    ) -> Self {
        let mut message = Self::with_transaction(env, command::TRANSACTION_VERIFY_DONE, transaction);
        message
            .data
            .0
            .insert(key::VERIFY.to_string(), Value::from(verified));
        message
    }

    /// Requests on-demand execution of a scheduled job.
    pub fn cron_execute(env: &dyn ProcessEnv, job: &str, sample: &str) -> Self {
        let mut message = Self::base(env, command::CRON_EXECUTE);
        message.data.0.insert(key::JOB.to_string(), Value::from(job));
        message
            .data
            .0
            .insert(key::SAMPLE.to_string(), Value::from(sample));
        message
    }

    /// Return `true` when this frame carries the given command.
    pub fn is(&self, command: &str) -> bool {
        self.initiator.command == command
    }

    /// Parse one frame line.
    ///
    /// # Errors
    ///
    /// [`IpcError::FrameDecode`] on malformed JSON.
    pub fn parse(line: &str) -> Result<Self, IpcError> {
        serde_json::from_str(line).map_err(IpcError::FrameDecode)
    }

    /// Serialize this message as a newline-terminated frame.
    ///
    /// # Errors
    ///
    /// [`IpcError::FrameEncode`] when serialization fails.
    pub fn encode_frame(&self) -> Result<Vec<u8>, IpcError> {
        let mut payload = serde_json::to_vec(self).map_err(IpcError::FrameEncode)?;
        payload.push(b'\n');
        Ok(payload)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = serde_json::to_string(&self.data).unwrap_or_default();
        write!(f, "initiator=[{}], data={data}", self.initiator)
    }
}

/// String-keyed, JSON-valued payload of a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonBody(pub Map<String, Value>);

impl JsonBody {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Walk a dotted path into the body.
    ///
    /// Path segments index objects by key; a numeric segment indexes the
    /// current array. `None` when any segment is missing or the shapes do
    /// not line up.
    ///
    /// ```
    /// # use fatima_ipc::message::JsonBody;
    /// let body: JsonBody =
    ///     serde_json::from_str(r#"{"jobs":[{"name":"batch"}]}"#).unwrap();
    /// assert_eq!(
    ///     body.get_value("jobs.0.name").and_then(|v| v.as_str()),
    ///     Some("batch")
    /// );
    /// ```
    pub fn get_value(&self, path: &str) -> Option<&Value> {
        let mut current: Option<&Value> = None;
        for segment in path.split('.') {
            current = match current {
                None => self.0.get(segment),
                Some(Value::Object(map)) => map.get(segment),
                Some(Value::Array(list)) => {
                    let index: usize = segment.parse().ok()?;
                    if index >= list.len() {
                        tracing::debug!(
                            "[{path}] list index out of range (index:{index}, len:{})",
                            list.len()
                        );
                        return None;
                    }
                    Some(&list[index])
                }
                Some(_) => {
                    tracing::debug!("[{path}] path reached a scalar before segment {segment}");
                    return None;
                }
            };
            current?;
        }
        current
    }
}

/// Normalize a dynamically typed data value to a string.
///
/// Numbers render with integer precision when whole; booleans render as
/// `true`/`false`; missing values and nulls render empty.
pub fn as_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 {
                    format!("{}", f as i64)
                } else {
                    f.to_string()
                }
            } else {
                n.to_string()
            }
        }
        Some(other) => other.to_string(),
    }
}

/// Normalize a dynamically typed data value to a boolean.
///
/// Accepts JSON booleans and the strings `true|1|yes|y|t` case-insensitively;
/// everything else is false.
pub fn as_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => {
            matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "y" | "t")
        }
        _ => false,
    }
}
