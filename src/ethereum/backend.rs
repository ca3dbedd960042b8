//! Backend capability set the bindings dispatch to
//!
//! A backend executes calls, submits transactions and serves event logs. The
//! bindings never retry; whatever policy a deployment needs lives behind this
//! trait.

use std::fmt;

use alloy::primitives::{Address, Bytes, B256};
use tokio::sync::mpsc;

use super::{CallOptions, LogRecord, TransactOptions, TxHandle};
use crate::error::BackendError;

#[async_trait::async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Execute `input` against `address` without creating a transaction (eth_call)
    async fn call(
        &self,
        address: Address,
        input: Bytes,
        opts: &CallOptions,
    ) -> Result<Bytes, BackendError>;

    /// Sign and submit a transaction
    async fn transact(
        &self,
        to: Option<Address>,
        input: Bytes,
        opts: &TransactOptions,
    ) -> Result<TxHandle, BackendError>;

    /// Number of the latest block
    async fn block_number(&self) -> Result<u64, BackendError>;

    /// Bounded historical log query
    async fn filter_logs(&self, query: &LogQuery) -> Result<Vec<LogRecord>, BackendError>;

    /// Open a live feed of logs matching `query`
    async fn watch_logs(&self, query: &LogQuery) -> Result<LogFeed, BackendError>;
}

/// Log filter as handed to the backend.
///
/// `topics[i]` is the OR-set of accepted values for topic slot `i`; an empty
/// set matches anything in that slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub topics: Vec<Vec<B256>>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl LogQuery {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    pub fn with_range(mut self, from_block: Option<u64>, to_block: Option<u64>) -> Self {
        self.from_block = from_block;
        self.to_block = to_block;
        self
    }

    /// Whether `log` satisfies the address and topic constraints
    pub fn matches_topics(&self, log: &LogRecord) -> bool {
        if log.address != self.address {
            return false;
        }

        self.topics.iter().enumerate().all(|(slot, accepted)| {
            accepted.is_empty()
                || log
                    .topics
                    .get(slot)
                    .is_some_and(|topic| accepted.contains(topic))
        })
    }

    /// Whether `log` satisfies the full query, block range included
    pub fn matches(&self, log: &LogRecord) -> bool {
        if !self.matches_topics(log) {
            return false;
        }

        match log.block_number {
            Some(number) => {
                self.from_block.map_or(true, |from| number >= from)
                    && self.to_block.map_or(true, |to| number <= to)
            }
            None => self.from_block.is_none() && self.to_block.is_none(),
        }
    }
}

/// Live log feed returned by [`Backend::watch_logs`].
///
/// The backend pushes matching logs into `logs` and a terminal failure into
/// `errors`. Dropping the feed runs the unsubscribe hook.
pub struct LogFeed {
    pub logs: mpsc::Receiver<LogRecord>,
    pub errors: mpsc::Receiver<BackendError>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl LogFeed {
    pub fn new(
        logs: mpsc::Receiver<LogRecord>,
        errors: mpsc::Receiver<BackendError>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            logs,
            errors,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Release the backend side of the feed. Only the first call has an effect.
    pub fn unsubscribe(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
        self.logs.close();
        self.errors.close();
    }

    pub fn is_subscribed(&self) -> bool {
        self.unsubscribe.is_some()
    }
}

impl fmt::Debug for LogFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogFeed")
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

impl Drop for LogFeed {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
