//! Platform liveness support.
//!
//! Liveness is checked with `kill(pid, 0)`, which probes whether the process
//! exists without sending an actual signal.

/// Answers whether a peer process is currently running.
///
/// The IPC layer consults this before dialing a peer socket; a dead peer is
/// reported as unreachable without touching the filesystem.
pub trait PlatformSupport: Send + Sync {
    /// Return `true` if `proc` with the given PID is alive.
    fn is_process_running(&self, proc: &str, pid: u32) -> bool;
}

/// Default Unix implementation backed by `kill(pid, 0)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixPlatform;

impl PlatformSupport for UnixPlatform {
    fn is_process_running(&self, _proc: &str, pid: u32) -> bool {
        // SAFETY: kill with sig=0 never sends a signal; it only checks PID
        // existence.
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }
}
