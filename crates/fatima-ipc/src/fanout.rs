//! Session-event fan-out.
//!
//! Each registered listener owns a dedicated bounded channel plus a
//! long-lived task that applies incoming events in FIFO order. This gives:
//!
//! - per-listener ordering (events arrive in the order the server observed
//!   them);
//! - cross-listener independence (a slow listener cannot stall another);
//! - bounded back-pressure on the server reader when a channel fills.
//!
//! A panicking listener is caught per event and logged; the listener keeps
//! serving subsequent events.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, trace};

use crate::message::Message;
use crate::session::SessionContext;

/// Depth of each listener's event queue.
const LISTENER_QUEUE_DEPTH: usize = 8;

/// Observes every session's lifecycle and decoded messages.
///
/// Listeners see sessions through method arguments only and must not retain
/// the context beyond bookkeeping keyed on its string form.
#[async_trait]
pub trait SessionListener: Send + Sync {
    /// A new session was accepted. Precedes any `on_command` for the session.
    async fn on_start(&self, ctx: &Arc<SessionContext>) {
        trace!("[{ctx}] session started");
    }

    /// A frame was decoded on the session.
    async fn on_command(&self, ctx: &Arc<SessionContext>, message: &Message);

    /// The session ended. Follows every `on_command` for the session.
    async fn on_close(&self, ctx: &Arc<SessionContext>) {
        trace!("[{ctx}] session closed");
    }
}

/// One session lifecycle event, as fanned out to listeners.
#[derive(Clone)]
pub enum SessionEvent {
    Started(Arc<SessionContext>),
    Command(Arc<SessionContext>, Message),
    Closed(Arc<SessionContext>),
}

/// Registry of listener channels.
///
/// Registration is append-only during normal operation; the whole hub is
/// dropped at service shutdown.
#[derive(Default)]
pub struct ListenerHub {
    channels: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
}

impl ListenerHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `listener` and spawn its delivery task.
    pub async fn register(&self, listener: Arc<dyn SessionListener>) {
        let (tx, rx) = mpsc::channel(LISTENER_QUEUE_DEPTH);
        tokio::spawn(drive_listener(listener, rx));
        self.channels.lock().await.push(tx);
    }

    /// Fan `event` out to every registered listener in registration order.
    pub async fn publish(&self, event: SessionEvent) {
        let channels = self.channels.lock().await;
        for tx in channels.iter() {
            // A send only fails when the listener task is gone.
            let _ = tx.send(event.clone()).await;
        }
    }

    /// Number of registered listeners.
    pub async fn listener_count(&self) -> usize {
        self.channels.lock().await.len()
    }
}

async fn drive_listener(
    listener: Arc<dyn SessionListener>,
    mut events: mpsc::Receiver<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        let applied = std::panic::AssertUnwindSafe(apply(listener.as_ref(), &event))
            .catch_unwind()
            .await;
        if let Err(panic) = applied {
            error!("session listener panicked: {}", panic_message(panic.as_ref()));
        }
    }
}

async fn apply(listener: &dyn SessionListener, event: &SessionEvent) {
    match event {
        SessionEvent::Started(ctx) => listener.on_start(ctx).await,
        SessionEvent::Command(ctx, message) => listener.on_command(ctx, message).await,
        SessionEvent::Closed(ctx) => listener.on_close(ctx).await,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::net::UnixStream;

    struct RecordingListener {
        events: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl SessionListener for RecordingListener {
        async fn on_start(&self, ctx: &Arc<SessionContext>) {
            self.events.lock().unwrap().push(format!("{ctx}:start"));
        }

        async fn on_command(&self, ctx: &Arc<SessionContext>, message: &Message) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{ctx}:{}", message.initiator.command));
        }

        async fn on_close(&self, ctx: &Arc<SessionContext>) {
            self.events.lock().unwrap().push(format!("{ctx}:close"));
        }
    }

    struct PanickingListener;

    #[async_trait]
    impl SessionListener for PanickingListener {
        async fn on_command(&self, _ctx: &Arc<SessionContext>, _message: &Message) {
            panic!("listener exploded");
        }
    }

    fn fixture_ctx() -> Arc<SessionContext> {
        let (local, _remote) = UnixStream::pair().unwrap();
        let (ctx, _read_half) = SessionContext::server(local);
        ctx
    }

    fn fixture_message(command: &str) -> Message {
        Message::parse(&format!(
            r#"{{"initiator":{{"process":"p","command":"{command}","sock":"/s"}}}}"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let hub = ListenerHub::new();
        let events = Arc::new(StdMutex::new(Vec::new()));
        hub.register(Arc::new(RecordingListener {
            events: events.clone(),
        }))
        .await;

        let ctx = fixture_ctx();
        hub.publish(SessionEvent::Started(ctx.clone())).await;
        hub.publish(SessionEvent::Command(ctx.clone(), fixture_message("A")))
            .await;
        hub.publish(SessionEvent::Command(ctx.clone(), fixture_message("B")))
            .await;
        hub.publish(SessionEvent::Closed(ctx.clone())).await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let recorded = events.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![
                format!("{ctx}:start"),
                format!("{ctx}:A"),
                format!("{ctx}:B"),
                format!("{ctx}:close"),
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_listener_keeps_serving() {
        let hub = ListenerHub::new();
        hub.register(Arc::new(PanickingListener)).await;

        let events = Arc::new(StdMutex::new(Vec::new()));
        hub.register(Arc::new(RecordingListener {
            events: events.clone(),
        }))
        .await;

        let ctx = fixture_ctx();
        hub.publish(SessionEvent::Command(ctx.clone(), fixture_message("A")))
            .await;
        hub.publish(SessionEvent::Command(ctx.clone(), fixture_message("B")))
            .await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // The healthy listener saw both events despite the sibling panicking.
        assert_eq!(events.lock().unwrap().len(), 2);
        assert_eq!(hub.listener_count().await, 2);
    }
}
