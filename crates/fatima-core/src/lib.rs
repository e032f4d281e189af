//! Core contracts for the fatima process-supervisor framework.
//!
//! This crate holds everything a fatima-managed process needs before any IPC
//! happens: resolution of the `FATIMA_HOME` tree, the per-process environment
//! provider (program name, PID, canonical socket path), the platform liveness
//! probe, logging initialization, and the runtime contracts (`GoawayRunner`,
//! `CronRunner`) that the IPC layer invokes on behalf of the supervisor.

pub mod env;
pub mod home;
pub mod logging;
pub mod platform;
pub mod runtime;

pub use env::{EnvError, FatimaEnv, ProcessEnv};
pub use platform::{PlatformSupport, UnixPlatform};
pub use runtime::{CronRunner, GoawayRunner};
