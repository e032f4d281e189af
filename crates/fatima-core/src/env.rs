//! Per-process environment provider.
//!
//! A fatima process announces itself through two filesystem artifacts under
//! its proc folder:
//!
//! ```text
//! $FATIMA_HOME/app/<name>/proc/<name>.pid
//! $FATIMA_HOME/app/<name>/proc/fatima.<name>.<pid>.sock
//! ```
//!
//! The [`ProcessEnv`] trait is the seam between the IPC layer and the real
//! filesystem: production code uses [`FatimaEnv`], tests substitute a fixture
//! implementation that points at a temp directory.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::home;

/// Filename prefix shared by every fatima IPC socket.
pub const SOCK_FILE_PREFIX: &str = "fatima.";

/// Errors surfaced while resolving the process environment.
#[derive(Error, Debug)]
pub enum EnvError {
    /// `FATIMA_HOME` is unset and no platform home directory exists.
    #[error("cannot determine fatima home directory")]
    HomeUnavailable,

    /// The PID file for a process is missing or unreadable.
    #[error("pid file unavailable for {proc}: {reason}")]
    PidUnavailable { proc: String, reason: String },
}

/// Resolves names, paths, and PIDs for the local process and its peers.
///
/// Implementations must be cheap to call; the IPC layer consults them on
/// every outbound connection.
pub trait ProcessEnv: Send + Sync {
    /// Program name of the local process.
    fn program_name(&self) -> &str;

    /// PID of the local process.
    fn pid(&self) -> u32;

    /// Directory holding the local process's socket and PID files.
    fn sock_dir(&self) -> PathBuf;

    /// Canonical socket path of the local process.
    fn address(&self) -> PathBuf {
        socket_path(&self.sock_dir(), self.program_name(), self.pid())
    }

    /// Directory holding `proc`'s socket and PID files.
    fn sock_dir_of(&self, proc: &str) -> PathBuf;

    /// Read and parse `proc`'s PID file.
    ///
    /// # Errors
    ///
    /// [`EnvError::PidUnavailable`] when the file is missing, unreadable, or
    /// does not contain an integer.
    fn pid_of(&self, proc: &str) -> Result<u32, EnvError>;
}

/// Build the canonical socket path `<dir>/fatima.<proc>.<pid>.sock`.
pub fn socket_path(dir: &Path, proc: &str, pid: u32) -> PathBuf {
    dir.join(format!("{SOCK_FILE_PREFIX}{proc}.{pid}.sock"))
}

/// Production [`ProcessEnv`] rooted at `FATIMA_HOME`.
#[derive(Debug, Clone)]
pub struct FatimaEnv {
    home: PathBuf,
    program: String,
    pid: u32,
    profile: Option<String>,
}

impl FatimaEnv {
    /// Resolve the environment for the current process.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::HomeUnavailable`] when no home directory can be
    /// determined.
    pub fn resolve(program: impl Into<String>) -> Result<Self, EnvError> {
        Ok(Self {
            home: home::fatima_home()?,
            program: program.into(),
            pid: std::process::id(),
            profile: home::fatima_profile(),
        })
    }

    /// The resolved fatima root directory.
    pub fn fatima_home(&self) -> &Path {
        &self.home
    }

    /// Deployment profile tag, when one is configured.
    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }
}

impl ProcessEnv for FatimaEnv {
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
        self.home.join("app").join(proc).join("proc")
    }

    fn pid_of(&self, proc: &str) -> Result<u32, EnvError> {
        let pid_file = self.sock_dir_of(proc).join(format!("{proc}.pid"));

        let content = std::fs::read_to_string(&pid_file).map_err(|e| EnvError::PidUnavailable {
            proc: proc.to_string(),
            reason: format!("{}: {e}", pid_file.display()),
        })?;

        let trimmed = content.trim();
        trimmed.parse::<u32>().map_err(|_| EnvError::PidUnavailable {
            proc: proc.to_string(),
            reason: format!("invalid pid content: [{trimmed}]"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env_at(home: &Path) -> FatimaEnv {
        FatimaEnv {
            home: home.to_path_buf(),
            program: "app1".to_string(),
            pid: 77,
            profile: None,
        }
    }

    #[test]
    fn test_socket_path_format() {
        let path = socket_path(Path::new("/tmp/proc"), "app1", 312);
        assert_eq!(path, PathBuf::from("/tmp/proc/fatima.app1.312.sock"));
    }

    #[test]
    fn test_address_uses_own_sock_dir() {
        let env = env_at(Path::new("/opt/fatima"));
        assert_eq!(
            env.address(),
            PathBuf::from("/opt/fatima/app/app1/proc/fatima.app1.77.sock")
        );
    }

    #[test]
    fn test_pid_of_reads_trimmed_integer() {
        let dir = TempDir::new().unwrap();
        let env = env_at(dir.path());
        let proc_dir = env.sock_dir_of("peer");
        std::fs::create_dir_all(&proc_dir).unwrap();
        std::fs::write(proc_dir.join("peer.pid"), "  4312\r\n").unwrap();

        assert_eq!(env.pid_of("peer").unwrap(), 4312);
    }

    #[test]
    fn test_pid_of_missing_file() {
        let dir = TempDir::new().unwrap();
        let env = env_at(dir.path());

        let err = env.pid_of("ghost").unwrap_err();
        assert!(matches!(err, EnvError::PidUnavailable { .. }));
    }

    #[test]
    fn test_pid_of_malformed_content() {
        let dir = TempDir::new().unwrap();
        let env = env_at(dir.path());
        let proc_dir = env.sock_dir_of("peer");
        std::fs::create_dir_all(&proc_dir).unwrap();
        std::fs::write(proc_dir.join("peer.pid"), "not-a-pid\n").unwrap();

        let err = env.pid_of("peer").unwrap_err();
        assert!(matches!(err, EnvError::PidUnavailable { .. }));
    }
}
