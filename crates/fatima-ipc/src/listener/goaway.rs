//! Goaway: cooperative, authorized graceful shutdown.
//!
//! An inbound `GOAWAY` is never trusted on its own. The target re-contacts
//! the supervisor by its well-known name — not by any address carried in the
//! message — and presents the proposed transaction id. Only the supervisor,
//! which minted the transaction moments earlier, can confirm it. Every
//! failure along the verification path refuses the goaway and closes the
//! session; there is no path that runs the shutdown on an unverified
//! request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{trace, warn};

use fatima_core::env::ProcessEnv;
use fatima_core::platform::PlatformSupport;
use fatima_core::runtime::GoawayRunner;

use crate::client::ClientSession;
use crate::error::IpcError;
use crate::fanout::SessionListener;
use crate::message::{Message, as_bool, as_string, command, key};
use crate::session::SessionContext;

/// Reserved program name of the supervisor process.
pub const SUPERVISOR_NAME: &str = "juno";

/// Bounds the verification dialog so a stalled verifier cannot wedge the
/// target.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(1);

/// Handles inbound `GOAWAY` commands on the target side.
pub struct GoawayListener {
    env: Arc<dyn ProcessEnv>,
    platform: Arc<dyn PlatformSupport>,
    runner: Arc<dyn GoawayRunner>,
}

impl GoawayListener {
    pub fn new(
        env: Arc<dyn ProcessEnv>,
        platform: Arc<dyn PlatformSupport>,
        runner: Arc<dyn GoawayRunner>,
    ) -> Self {
        Self {
            env,
            platform,
            runner,
        }
    }

    fn is_supervisor(&self) -> bool {
        self.env.program_name() == SUPERVISOR_NAME
    }

    /// Ask the supervisor whether `transaction` is one it issued.
    ///
    /// The response's transaction id is authoritative: a reply carrying a
    /// different id refuses the goaway even when `verify` is true.
    async fn validate_transaction(&self, transaction: &str) -> Result<(), IpcError> {
        let supervisor =
            ClientSession::connect(self.env.as_ref(), self.platform.as_ref(), SUPERVISOR_NAME)
                .await?;
        let verdict = self.verify_with(&supervisor, transaction).await;
        supervisor.disconnect().await;
        verdict
    }

    async fn verify_with(
        &self,
        supervisor: &ClientSession,
        transaction: &str,
    ) -> Result<(), IpcError> {
        supervisor
            .send(&Message::transaction_verify(self.env.as_ref(), transaction))
            .await?;

        let response = tokio::time::timeout(VERIFY_TIMEOUT, supervisor.read_command())
            .await
            .map_err(|_| IpcError::VerifyTimeout {
                transaction: transaction.to_string(),
            })??;

        if !response.is(command::TRANSACTION_VERIFY_DONE) {
            return Err(IpcError::UnexpectedResponse {
                command: response.initiator.command.clone(),
            });
        }
        let received = as_string(response.data.get_value(key::TRANSACTION));
        if received != transaction {
            return Err(IpcError::VerifyMismatch {
                requested: transaction.to_string(),
                received,
            });
        }
        if !as_bool(response.data.get_value(key::VERIFY)) {
            return Err(IpcError::VerifyRefused {
                transaction: transaction.to_string(),
            });
        }

        trace!("transaction verify success: {transaction}");
        Ok(())
    }

    /// Run the verified shutdown, bracketing it with start/done frames on
    /// the inbound session.
    async fn run_goaway(&self, ctx: &Arc<SessionContext>, transaction: &str) {
        let started = ctx
            .send(&Message::goaway_start(self.env.as_ref(), transaction))
            .await;
        match &started {
            Ok(()) => warn!("[{ctx}] sent goaway start: {transaction}"),
            Err(e) => warn!("[{ctx}] failed to send goaway start: {transaction}, {e}"),
        }

        self.runner.goaway().await;

        if started.is_ok() {
            match ctx
                .send(&Message::goaway_done(self.env.as_ref(), transaction))
                .await
            {
                Ok(()) => warn!("[{ctx}] sent goaway done: {transaction}"),
                Err(e) => warn!("[{ctx}] failed to send goaway done: {transaction}, {e}"),
            }
        }
    }
}

#[async_trait]
impl SessionListener for GoawayListener {
    async fn on_command(&self, ctx: &Arc<SessionContext>, message: &Message) {
        trace!("ipc command incoming: {message}");

        if !message.is(command::GOAWAY) {
            return;
        }

        warn!("processing goaway: {message}");
        let transaction = as_string(message.data.get_value(key::TRANSACTION));
        if transaction.is_empty() {
            warn!("[{ctx}] received empty transaction id");
            ctx.close().await;
            return;
        }

        if self.is_supervisor() {
            // Self-initiated shutdown: no one to verify against.
            trace!("[{ctx}] supervisor shutting itself down");
            self.runner.goaway().await;
            ctx.close().await;
            return;
        }

        match self.validate_transaction(&transaction).await {
            Ok(()) => self.run_goaway(ctx, &transaction).await,
            Err(e) => warn!("[{ctx}] failed to validate transaction: {e}"),
        }
        ctx.close().await;
    }
}
