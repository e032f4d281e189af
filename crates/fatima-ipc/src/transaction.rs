//! Transaction registry.
//!
//! The supervisor mints a short-lived transaction id for every goaway request
//! and consults the registry when the target calls back to verify it. Ids are
//! created only here and never mutated; deletion (lazy on read, or by the
//! periodic sweeper) is the only state change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::trace;

/// How long a minted transaction stays alive.
pub const DEFAULT_ALIVE_DURATION: Duration = Duration::from_secs(60);

/// How often the sweeper removes expired transactions.
pub const DEFAULT_SWEEP_TICK: Duration = Duration::from_secs(1);

const MIN_DURATION: Duration = Duration::from_secs(1);

/// Issues opaque transaction ids and tracks their expiry.
///
/// A transaction is alive iff it is present in the map and `now` is before
/// its expiry. The map is guarded by a single mutex covering both the
/// sweeper and callers.
pub struct TransactionStore {
    entries: Mutex<HashMap<String, Instant>>,
    alive: Duration,
    tick: Duration,
    counter: AtomicI64,
    sweeper: OnceLock<()>,
}

impl TransactionStore {
    /// A store with the default durations (60 s alive, 1 s sweep tick).
    pub fn new() -> Arc<Self> {
        Self::with_durations(DEFAULT_ALIVE_DURATION, DEFAULT_SWEEP_TICK)
    }

    /// A store with explicit durations, each clamped to at least one second.
    pub fn with_durations(alive: Duration, tick: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            alive: alive.max(MIN_DURATION),
            tick: tick.max(MIN_DURATION),
            counter: AtomicI64::new(0),
            sweeper: OnceLock::new(),
        })
    }

    /// Mint a new transaction id and register it.
    ///
    /// The id is 8 random alphanumeric characters followed by a two-digit
    /// monotonic counter. The first call also starts the sweeper task.
    pub fn generate(self: &Arc<Self>) -> String {
        self.ensure_sweeper();

        let id = self.build_id();
        let expires_at = Instant::now() + self.alive;
        self.entries.lock().unwrap().insert(id.clone(), expires_at);
        id
    }

    fn build_id(&self) -> String {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let prefix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        format!("{prefix}{:02}", counter % 100)
    }

    /// Return `true` iff `id` exists and has not expired.
    ///
    /// An expired id encountered here is deleted on the spot.
    pub fn is_alive(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(id) {
            Some(expires_at) if Instant::now() < *expires_at => true,
            Some(_) => {
                entries.remove(id);
                false
            }
            None => false,
        }
    }

    /// Number of registered transactions, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Drop every registered transaction.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    fn ensure_sweeper(self: &Arc<Self>) {
        self.sweeper.get_or_init(|| {
            let store = Arc::downgrade(self);
            let tick = self.tick;
            tokio::spawn(sweep_loop(store, tick));
            trace!("transaction sweeper started, tick={}s", tick.as_secs());
        });
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.entries.lock().unwrap().retain(|id, expires_at| {
            let keep = now < *expires_at;
            if !keep {
                trace!("transaction {id} removed");
            }
            keep
        });
    }
}

async fn sweep_loop(store: Weak<TransactionStore>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(store) = store.upgrade() else { break };
        store.sweep();
    }
}
