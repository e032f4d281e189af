//! Supervisor-side verification responder.
//!
//! Registered only inside the supervisor process. Answers each
//! `TRANSACTION_VERIFY` query on the same session by consulting the
//! transaction registry. The session stays open; the querying target
//! disconnects its side once it has the answer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use fatima_core::env::ProcessEnv;

use crate::fanout::SessionListener;
use crate::message::{Message, as_string, command, key};
use crate::session::SessionContext;
use crate::transaction::TransactionStore;

pub struct TransactionVerifyListener {
    env: Arc<dyn ProcessEnv>,
    transactions: Arc<TransactionStore>,
}

impl TransactionVerifyListener {
    pub fn new(env: Arc<dyn ProcessEnv>, transactions: Arc<TransactionStore>) -> Self {
        Self { env, transactions }
    }
}

#[async_trait]
impl SessionListener for TransactionVerifyListener {
    async fn on_command(&self, ctx: &Arc<SessionContext>, message: &Message) {
        if !message.is(command::TRANSACTION_VERIFY) {
            return;
        }

        let transaction = as_string(message.data.get_value(key::TRANSACTION));
        if transaction.is_empty() {
            warn!("[{ctx}] received empty transaction id");
            return;
        }

        let verified = self.transactions.is_alive(&transaction);
        let reply = Message::transaction_verify_done(self.env.as_ref(), &transaction, verified);
        match ctx.send(&reply).await {
            Ok(()) => debug!("[{ctx}] sent transaction verify {verified}: {transaction}"),
            Err(e) => warn!("[{ctx}] failed to send transaction verify done: {e}"),
        }
    }
}
