//! In-memory backend and fixtures for binding tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolEvent;
use tokio::sync::mpsc;

use super::backend::{Backend, LogFeed, LogQuery};
use super::{CallOptions, LogRecord, TransactOptions, TxHandle};
use crate::error::BackendError;

pub(crate) const TOKEN: Address = Address::repeat_byte(0x70);

pub(crate) const ERC20_ABI: &str = r#"[
    {"type":"function","name":"name","stateMutability":"view","inputs":[],
     "outputs":[{"name":"","type":"string","internalType":"string"}]},
    {"type":"function","name":"decimals","stateMutability":"view","inputs":[],
     "outputs":[{"name":"","type":"uint8","internalType":"uint8"}]},
    {"type":"function","name":"balanceOf","stateMutability":"view",
     "inputs":[{"name":"owner","type":"address","internalType":"address"}],
     "outputs":[{"name":"","type":"uint256","internalType":"uint256"}]},
    {"type":"function","name":"transfer","stateMutability":"nonpayable",
     "inputs":[{"name":"to","type":"address","internalType":"address"},
               {"name":"value","type":"uint256","internalType":"uint256"}],
     "outputs":[{"name":"","type":"bool","internalType":"bool"}]},
    {"type":"function","name":"deposit","stateMutability":"payable","inputs":[],"outputs":[]},
    {"type":"function","name":"safeTransfer","stateMutability":"nonpayable",
     "inputs":[{"name":"to","type":"address","internalType":"address"},
               {"name":"value","type":"uint256","internalType":"uint256"}],
     "outputs":[]},
    {"type":"function","name":"safeTransfer","stateMutability":"nonpayable",
     "inputs":[{"name":"to","type":"address","internalType":"address"},
               {"name":"value","type":"uint256","internalType":"uint256"},
               {"name":"data","type":"bytes","internalType":"bytes"}],
     "outputs":[]},
    {"type":"event","name":"Transfer","anonymous":false,"inputs":[
        {"name":"from","type":"address","indexed":true,"internalType":"address"},
        {"name":"to","type":"address","indexed":true,"internalType":"address"},
        {"name":"value","type":"uint256","indexed":false,"internalType":"uint256"}]},
    {"type":"event","name":"Approval","anonymous":false,"inputs":[
        {"name":"owner","type":"address","indexed":true,"internalType":"address"},
        {"name":"spender","type":"address","indexed":true,"internalType":"address"},
        {"name":"value","type":"uint256","indexed":false,"internalType":"uint256"}]},
    {"type":"event","name":"Tagged","anonymous":false,"inputs":[
        {"name":"tag","type":"string","indexed":true,"internalType":"string"},
        {"name":"amount","type":"uint256","indexed":false,"internalType":"uint256"}]},
    {"type":"error","name":"InsufficientAllowance","inputs":[
        {"name":"spender","type":"address","internalType":"address"},
        {"name":"allowance","type":"uint256","internalType":"uint256"},
        {"name":"needed","type":"uint256","internalType":"uint256"}]}
]"#;

alloy::sol! {
    #[derive(Debug, PartialEq)]
    event Transfer(address indexed from, address indexed to, uint256 value);
    #[derive(Debug, PartialEq)]
    event Approval(address indexed owner, address indexed spender, uint256 value);

    function name() external view returns (string);
    function balanceOf(address owner) external view returns (uint256);
    function transfer(address to, uint256 value) external returns (bool);
    function mint(address to, uint256 amount) external;

    #[derive(Debug, PartialEq)]
    error InsufficientAllowance(address spender, uint256 allowance, uint256 needed);
}

fn value_log(signature: B256, a: Address, b: Address, value: U256, block: u64, index: u64) -> LogRecord {
    LogRecord {
        address: TOKEN,
        topics: vec![signature, a.into_word(), b.into_word()],
        data: Bytes::from(value.to_be_bytes::<32>().to_vec()),
        block_number: Some(block),
        block_hash: Some(keccak256(block.to_be_bytes())),
        transaction_hash: Some(keccak256([block.to_be_bytes(), index.to_be_bytes()].concat())),
        transaction_index: Some(0),
        log_index: Some(index),
        removed: false,
    }
}

pub(crate) fn transfer_log(from: Address, to: Address, value: U256, block: u64, index: u64) -> LogRecord {
    value_log(Transfer::SIGNATURE_HASH, from, to, value, block, index)
}

pub(crate) fn approval_log(owner: Address, spender: Address, value: U256, block: u64, index: u64) -> LogRecord {
    value_log(Approval::SIGNATURE_HASH, owner, spender, value, block, index)
}

/// Sending side of a live feed handed out by [`MockBackend::watch_logs`]
#[derive(Debug, Clone)]
pub(crate) struct FeedHandle {
    pub logs: mpsc::Sender<LogRecord>,
    pub errors: mpsc::Sender<BackendError>,
}

#[derive(Default)]
struct State {
    calls: Vec<(Address, Bytes, CallOptions)>,
    call_responses: VecDeque<Result<Bytes, BackendError>>,
    transactions: Vec<(Option<Address>, Bytes, TransactOptions)>,
    logs: Vec<LogRecord>,
    queries: Vec<LogQuery>,
    filter_error: Option<BackendError>,
    filter_delays: VecDeque<Duration>,
    head: u64,
    watched: Vec<LogQuery>,
    feeds: Vec<FeedHandle>,
}

/// Backend that records every request and answers from scripted state
#[derive(Default)]
pub(crate) struct MockBackend {
    state: Mutex<State>,
    unsubscribed: Arc<AtomicUsize>,
    ignore_filters: bool,
    call_delay: Option<Duration>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Return every stored log regardless of the query, like a sloppy node
    pub(crate) fn ignoring_filters(mut self) -> Self {
        self.ignore_filters = true;
        self
    }

    pub(crate) fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    pub(crate) fn push_call_response(&self, response: Result<Bytes, BackendError>) {
        self.lock().call_responses.push_back(response);
    }

    pub(crate) fn push_logs(&self, logs: impl IntoIterator<Item = LogRecord>) {
        self.lock().logs.extend(logs);
    }

    pub(crate) fn set_head(&self, head: u64) {
        self.lock().head = head;
    }

    /// Make the next `filter_logs` call take `delay` before answering
    pub(crate) fn delay_next_filter(&self, delay: Duration) {
        self.lock().filter_delays.push_back(delay);
    }

    pub(crate) fn fail_filters(&self, err: BackendError) {
        self.lock().filter_error = Some(err);
    }

    pub(crate) fn calls(&self) -> Vec<(Address, Bytes, CallOptions)> {
        self.lock().calls.clone()
    }

    pub(crate) fn transactions(&self) -> Vec<(Option<Address>, Bytes, TransactOptions)> {
        self.lock().transactions.clone()
    }

    pub(crate) fn queries(&self) -> Vec<LogQuery> {
        self.lock().queries.clone()
    }

    pub(crate) fn watched(&self) -> Vec<LogQuery> {
        self.lock().watched.clone()
    }

    pub(crate) fn last_feed(&self) -> FeedHandle {
        self.lock().feeds.last().cloned().expect("no live feed opened")
    }

    /// Hand over the backend's own senders; dropping them closes the feeds
    pub(crate) fn take_feeds(&self) -> Vec<FeedHandle> {
        std::mem::take(&mut self.lock().feeds)
    }

    pub(crate) fn unsubscribed(&self) -> usize {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("mock state poisoned")
    }
}

#[async_trait::async_trait]
impl Backend for MockBackend {
    async fn call(
        &self,
        address: Address,
        input: Bytes,
        opts: &CallOptions,
    ) -> Result<Bytes, BackendError> {
        let response = {
            let mut state = self.lock();
            state.calls.push((address, input, opts.clone()));
            state.call_responses.pop_front()
        };

        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }

        response.unwrap_or_else(|| Ok(Bytes::new()))
    }

    async fn transact(
        &self,
        to: Option<Address>,
        input: Bytes,
        opts: &TransactOptions,
    ) -> Result<TxHandle, BackendError> {
        let mut state = self.lock();
        let nonce = state.transactions.len() as u64;
        state.transactions.push((to, input.clone(), opts.clone()));

        Ok(TxHandle {
            hash: keccak256([&input[..], &nonce.to_be_bytes()[..]].concat()),
            from: opts.from,
            to,
            input,
            value: opts.value.unwrap_or_default(),
        })
    }

    async fn block_number(&self) -> Result<u64, BackendError> {
        Ok(self.lock().head)
    }

    async fn filter_logs(&self, query: &LogQuery) -> Result<Vec<LogRecord>, BackendError> {
        let (result, delay) = {
            let mut state = self.lock();
            state.queries.push(query.clone());
            let delay = state.filter_delays.pop_front();

            let result = match state.filter_error.clone() {
                Some(err) => Err(err),
                None => Ok(state
                    .logs
                    .iter()
                    .filter(|log| self.ignore_filters || query.matches(log))
                    .cloned()
                    .collect()),
            };
            (result, delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        result
    }

    async fn watch_logs(&self, query: &LogQuery) -> Result<LogFeed, BackendError> {
        let (log_tx, logs) = mpsc::channel(16);
        let (err_tx, errors) = mpsc::channel(1);

        let mut state = self.lock();
        state.watched.push(query.clone());
        state.feeds.push(FeedHandle {
            logs: log_tx,
            errors: err_tx,
        });

        let counter = self.unsubscribed.clone();
        Ok(LogFeed::new(logs, errors, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }
}
