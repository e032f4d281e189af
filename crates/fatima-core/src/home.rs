//! Canonical `FATIMA_HOME` resolution.
//!
//! Every fatima process lives under a single root directory:
//!
//! ```text
//! $FATIMA_HOME/app/<name>/proc/...
//! ```
//!
//! # Precedence
//!
//! 1. `FATIMA_HOME` environment variable (if set and non-empty, trimmed)
//! 2. `<platform home>/fatima`
//!
//! Integration tests override the root by setting `FATIMA_HOME` to a
//! `tempfile::TempDir` path.

use std::path::PathBuf;

use crate::env::EnvError;

/// Resolve the fatima root directory.
///
/// # Errors
///
/// Returns [`EnvError::HomeUnavailable`] when `FATIMA_HOME` is unset and the
/// platform home directory cannot be determined.
pub fn fatima_home() -> Result<PathBuf, EnvError> {
    if let Ok(home) = std::env::var("FATIMA_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir()
        .map(|h| h.join("fatima"))
        .ok_or(EnvError::HomeUnavailable)
}

/// Optional deployment profile tag from `FATIMA_PROFILE`.
///
/// Consumed by collaborators (config layering, reporting); the IPC layer
/// itself only carries it.
pub fn fatima_profile() -> Option<String> {
    match std::env::var("FATIMA_PROFILE") {
        Ok(profile) => {
            let trimmed = profile.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}
