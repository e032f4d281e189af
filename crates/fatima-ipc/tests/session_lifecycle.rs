//! Session lifecycle invariants over a live server.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use fatima_ipc::fanout::SessionListener;
use fatima_ipc::session::SessionContext;
use fatima_ipc::{
    ClientSession, IpcService, Message, is_fatima_ipc_available, start_ipc_service,
    stop_ipc_service,
};

use common::{AlwaysRunning, RecordingCronRunner, RecordingGoawayRunner, TestEnv, raw_message};

/// Records `<session>:<event>` strings in arrival order.
struct CountingListener {
    events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SessionListener for CountingListener {
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

async fn connect(root: &std::path::Path, proc: &str) -> ClientSession {
    common::init_logging();
    let env = TestEnv::new("cli", root);
    ClientSession::connect(env.as_ref(), &AlwaysRunning, proc)
        .await
        .unwrap()
}

/// Every accepted connection produces exactly one start and one close, and
/// frames on one session are observed in send order.
#[tokio::test]
async fn test_one_start_one_close_per_session_in_order() {
    let root = TempDir::new().unwrap();
    let service = IpcService::start(
        TestEnv::new("lifecycled", root.path()),
        Arc::new(AlwaysRunning),
        RecordingGoawayRunner::new(),
        RecordingCronRunner::new(),
    )
    .await
    .unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    service
        .register_listener(Arc::new(CountingListener {
            events: events.clone(),
        }))
        .await;

    let first = connect(root.path(), "lifecycled").await;
    first.send(&raw_message("ALPHA")).await.unwrap();
    first.send(&raw_message("BETA")).await.unwrap();

    let second = connect(root.path(), "lifecycled").await;
    second.send(&raw_message("GAMMA")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    first.disconnect().await;
    second.disconnect().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let recorded = events.lock().unwrap().clone();

    let starts = recorded.iter().filter(|e| e.ends_with(":start")).count();
    let closes = recorded.iter().filter(|e| e.ends_with(":close")).count();
    assert_eq!(starts, 2, "one start per accepted connection: {recorded:?}");
    assert_eq!(closes, 2, "one close per accepted connection: {recorded:?}");

    // Recover the first session's key from its ALPHA event and check
    // per-session ordering: start, ALPHA, BETA, close.
    let alpha = recorded.iter().find(|e| e.ends_with(":ALPHA")).unwrap();
    let session = alpha.rsplit_once(':').unwrap().0.to_string();
    let session_events: Vec<&String> = recorded
        .iter()
        .filter(|e| e.starts_with(&format!("{session}:")))
        .collect();
    assert_eq!(
        session_events,
        vec![
            &format!("{session}:start"),
            &format!("{session}:ALPHA"),
            &format!("{session}:BETA"),
            &format!("{session}:close"),
        ]
    );

    service.stop().await;
}

/// Malformed frames are logged and skipped; the session keeps going.
#[tokio::test]
async fn test_malformed_frame_does_not_end_session() {
    let root = TempDir::new().unwrap();
    let service = IpcService::start(
        TestEnv::new("tolerant", root.path()),
        Arc::new(AlwaysRunning),
        RecordingGoawayRunner::new(),
        RecordingCronRunner::new(),
    )
    .await
    .unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    service
        .register_listener(Arc::new(CountingListener {
            events: events.clone(),
        }))
        .await;

    // A raw socket lets the test write bytes the typed client never would.
    let address = {
        use fatima_core::env::ProcessEnv;
        TestEnv::new("tolerant", root.path()).address()
    };
    let mut stream = tokio::net::UnixStream::connect(&address).await.unwrap();

    use tokio::io::AsyncWriteExt;
    stream
        .write_all(&raw_message("BEFORE").encode_frame().unwrap())
        .await
        .unwrap();
    stream.write_all(b"{this is not json\n").await.unwrap();
    stream
        .write_all(&raw_message("AFTER").encode_frame().unwrap())
        .await
        .unwrap();
    stream.flush().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(stream);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let recorded = events.lock().unwrap().clone();
    assert!(recorded.iter().any(|e| e.ends_with(":BEFORE")));
    assert!(recorded.iter().any(|e| e.ends_with(":AFTER")));
    assert_eq!(recorded.iter().filter(|e| e.ends_with(":close")).count(), 1);

    service.stop().await;
}

/// Socket file exists while the process-wide service runs and is gone after
/// stop; repeated start/stop cycles work in one process.
#[tokio::test]
async fn test_process_wide_service_lifecycle() {
    let root = TempDir::new().unwrap();
    let env = TestEnv::new("facaded", root.path());
    let address = {
        use fatima_core::env::ProcessEnv;
        env.address()
    };

    let service = start_ipc_service(
        env.clone(),
        Arc::new(AlwaysRunning),
        RecordingGoawayRunner::new(),
        RecordingCronRunner::new(),
    )
    .await
    .unwrap();

    assert!(address.exists());
    assert!(is_fatima_ipc_available("facaded").await);

    // Starting again while running returns the installed instance.
    let again = start_ipc_service(
        env.clone(),
        Arc::new(AlwaysRunning),
        RecordingGoawayRunner::new(),
        RecordingCronRunner::new(),
    )
    .await
    .unwrap();
    assert!(Arc::ptr_eq(&service, &again));

    stop_ipc_service().await;
    assert!(!address.exists());
    assert!(!is_fatima_ipc_available("facaded").await);

    // A fresh cycle after the reset.
    start_ipc_service(
        env.clone(),
        Arc::new(AlwaysRunning),
        RecordingGoawayRunner::new(),
        RecordingCronRunner::new(),
    )
    .await
    .unwrap();
    assert!(address.exists());
    stop_ipc_service().await;
    assert!(!address.exists());
}
