//! Runtime contracts invoked by the IPC layer.
//!
//! Both traits are object-safe via [`async_trait`] so the service can hold
//! `Arc<dyn ...>` handles supplied by the embedding application.

use async_trait::async_trait;

/// The application's graceful-shutdown entry point.
///
/// Invoked exactly once per honored goaway request. Implementations should
/// stop accepting work, flush state, and arrange for the process to exit;
/// they must not block forever.
#[async_trait]
pub trait GoawayRunner: Send + Sync {
    async fn goaway(&self);
}

/// On-demand execution of a named scheduled job.
///
/// The IPC layer fires this on its own task and does not await completion;
/// the runner reports its outcome through the notification subsystem.
#[async_trait]
pub trait CronRunner: Send + Sync {
    async fn run_job(&self, job: &str, args: Vec<String>);
}
