//! Scoped update transactions.
//!
//! A [`Transaction`] is opened when an update attempt starts and closed when
//! the guard is dropped, so every attempt closes exactly once whether it
//! succeeds, fails or returns early.

use std::sync::Arc;

use tracing::debug;

use crate::context::LogContext;

/// Receives transaction lifecycle events.
pub trait TransactionSink: Send + Sync {
    fn open(&self, ctx: &LogContext) {}

    fn close(&self, ctx: &LogContext);
}

/// Sink that only logs transaction boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTransactions;

impl TransactionSink for LoggingTransactions {
    fn open(&self, ctx: &LogContext) {
        debug!(trans = %ctx.trans_id, "Transaction started");
    }

    fn close(&self, ctx: &LogContext) {
        debug!(trans = %ctx.trans_id, "Transaction finished");
    }
}

/// Guard for one logical update attempt.
pub struct Transaction {
    ctx: LogContext,
    sink: Arc<dyn TransactionSink>,
}

impl Transaction {
    pub fn begin(sink: Arc<dyn TransactionSink>, ctx: LogContext) -> Self {
        sink.open(&ctx);
        Self { ctx, sink }
    }

    pub fn context(&self) -> &LogContext {
        &self.ctx
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.sink.close(&self.ctx);
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("trans_id", &self.ctx.trans_id)
            .finish()
    }
}
