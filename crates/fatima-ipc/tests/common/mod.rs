//! Shared fixtures for the IPC integration tests.
//!
//! Every simulated process lives inside the test process: `TestEnv` mirrors
//! the production directory layout under a temp root and resolves every
//! peer's PID to the test process itself.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use fatima_core::env::{EnvError, ProcessEnv};
use fatima_core::platform::PlatformSupport;
use fatima_core::runtime::{CronRunner, GoawayRunner};
use fatima_ipc::Message;

/// Initialize tracing output once per test binary; `FATIMA_LOG=debug` makes
/// the dialogs visible.
pub fn init_logging() {
    fatima_core::logging::init();
}

/// Environment fixture rooted at a temp directory.
pub struct TestEnv {
    program: String,
    root: PathBuf,
    pid: u32,
}

impl TestEnv {
    pub fn new(program: &str, root: &Path) -> Arc<Self> {
        Arc::new(Self {
            program: program.to_string(),
            root: root.to_path_buf(),
            pid: std::process::id(),
        })
    }
}

impl ProcessEnv for TestEnv {
    fn program_name(&self) -> &str {
        &self.program
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn sock_dir(&self) -> PathBuf {
        self.sock_dir_of(&self.program)
    }

    fn sock_dir_of(&self, proc: &str) -> PathBuf {
        self.root.join("app").join(proc).join("proc")
    }

    fn pid_of(&self, _proc: &str) -> Result<u32, EnvError> {
        Ok(self.pid)
    }
}

/// Platform fixture that reports every peer as running.
pub struct AlwaysRunning;

impl PlatformSupport for AlwaysRunning {
    fn is_process_running(&self, _proc: &str, _pid: u32) -> bool {
        true
    }
}

/// Records how many times the shutdown entry point fired.
#[derive(Default)]
pub struct RecordingGoawayRunner {
    calls: AtomicUsize,
}

impl RecordingGoawayRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GoawayRunner for RecordingGoawayRunner {
    async fn goaway(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records every job invocation.
#[derive(Default)]
pub struct RecordingCronRunner {
    invocations: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingCronRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn invocations(&self) -> Vec<(String, Vec<String>)> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl CronRunner for RecordingCronRunner {
    async fn run_job(&self, job: &str, args: Vec<String>) {
        self.invocations
            .lock()
            .unwrap()
            .push((job.to_string(), args));
    }
}

/// Build a frame with an arbitrary command, bypassing the typed constructors.
pub fn raw_message(command: &str) -> Message {
    Message::parse(&format!(
        r#"{{"initiator":{{"process":"tester","command":"{command}","sock":"/dev/null"}}}}"#
    ))
    .unwrap()
}

/// Build an inbound `GOAWAY` frame carrying `transaction`, as a supervisor
/// would send it.
pub fn goaway_message(transaction: &str) -> Message {
    Message::parse(&format!(
        r#"{{"initiator":{{"process":"juno","command":"GOAWAY","sock":"/dev/null"}},"data":{{"transaction":"{transaction}"}}}}"#
    ))
    .unwrap()
}
