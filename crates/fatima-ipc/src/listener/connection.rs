//! Inbound-session bookkeeping.
//!
//! Tracks every live inbound session and evicts idle ones on a timer. This
//! is the only backstop against clients that opened a connection and never
//! closed it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::fanout::SessionListener;
use crate::message::Message;
use crate::session::SessionContext;

const DEFAULT_CLEAN_TICK: Duration = Duration::from_secs(60);
const DEFAULT_EXPIRE_DURATION: Duration = Duration::from_secs(120);

struct SessionRecord {
    ctx: Arc<SessionContext>,
    epoch: Instant,
}

impl SessionRecord {
    fn is_expired(&self, now: Instant, expire: Duration) -> bool {
        now > self.epoch + expire
    }
}

/// Tracks live inbound sessions; force-closes ones that idle past the
/// expiry duration.
pub struct ConnectionListener {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    expire: Duration,
}

impl ConnectionListener {
    /// Create the listener and start its sweeper, stopped via `cancel`.
    pub fn new(cancel: CancellationToken) -> Arc<Self> {
        Self::with_durations(cancel, DEFAULT_CLEAN_TICK, DEFAULT_EXPIRE_DURATION)
    }

    /// Explicit durations, used by tests.
    pub fn with_durations(
        cancel: CancellationToken,
        clean_tick: Duration,
        expire: Duration,
    ) -> Arc<Self> {
        let listener = Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            expire,
        });
        tokio::spawn(sweep_loop(listener.clone(), cancel, clean_tick));
        listener
    }

    /// Number of sessions currently tracked.
    pub fn tracked(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn sweep(&self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.sessions.lock().unwrap().retain(|id, record| {
            if record.is_expired(now, self.expire) {
                expired.push((id.clone(), record.ctx.clone()));
                false
            } else {
                true
            }
        });

        for (id, ctx) in expired {
            warn!("idle session {id} evicted");
            tokio::spawn(async move { ctx.close().await });
        }
    }
}

async fn sweep_loop(listener: Arc<ConnectionListener>, cancel: CancellationToken, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => listener.sweep(),
        }
    }
}

#[async_trait]
impl SessionListener for ConnectionListener {
    async fn on_start(&self, ctx: &Arc<SessionContext>) {
        self.sessions.lock().unwrap().insert(
            ctx.to_string(),
            SessionRecord {
                ctx: ctx.clone(),
                epoch: Instant::now(),
            },
        );
    }

    async fn on_command(&self, _ctx: &Arc<SessionContext>, _message: &Message) {}

    async fn on_close(&self, ctx: &Arc<SessionContext>) {
        self.sessions.lock().unwrap().remove(&ctx.to_string());
    }
}
