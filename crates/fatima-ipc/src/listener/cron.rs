//! On-demand cron dispatch.
//!
//! Translates an inbound `CRON_EXECUTE` into a supervised job invocation on
//! its own task. The listener deliberately does not await the job; the
//! runner reports its own outcome through the notification subsystem.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, trace, warn};

use fatima_core::runtime::CronRunner;

use crate::fanout::SessionListener;
use crate::message::{Message, as_string, command, key};
use crate::session::SessionContext;

pub struct CronListener {
    runner: Arc<dyn CronRunner>,
}

impl CronListener {
    pub fn new(runner: Arc<dyn CronRunner>) -> Self {
        Self { runner }
    }
}

/// Split a sample line into job arguments.
///
/// Surrounding whitespace is trimmed first; the remainder splits on single
/// spaces. An empty sample yields no arguments.
fn split_sample(sample: &str) -> Vec<String> {
    let line = sample.trim();
    if line.is_empty() {
        Vec::new()
    } else {
        line.split(' ').map(str::to_string).collect()
    }
}

#[async_trait]
impl SessionListener for CronListener {
    async fn on_command(&self, ctx: &Arc<SessionContext>, message: &Message) {
        trace!("ipc command incoming: {message}");

        if !message.is(command::CRON_EXECUTE) {
            return;
        }

        warn!("processing cron execute: {message}");
        let job = as_string(message.data.get_value(key::JOB));
        if job.is_empty() {
            warn!("[{ctx}] received empty job name");
            ctx.close().await;
            return;
        }

        let sample = as_string(message.data.get_value(key::SAMPLE));
        info!("[{ctx}] job: {job}, sample: {sample}");

        let args = split_sample(&sample);
        trace!("[{ctx}] executing job {job} with {} arg(s)", args.len());

        let runner = self.runner.clone();
        tokio::spawn(async move { runner.run_job(&job, args).await });

        ctx.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sample_words() {
        assert_eq!(split_sample("hello world"), vec!["hello", "world"]);
    }

    #[test]
    fn test_split_sample_trims_surrounding_whitespace() {
        assert_eq!(split_sample("  one two  "), vec!["one", "two"]);
    }

    #[test]
    fn test_split_sample_empty() {
        assert!(split_sample("").is_empty());
        assert!(split_sample("   ").is_empty());
    }
}
