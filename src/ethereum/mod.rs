pub mod abi;
pub mod backend;
pub mod contract;
pub mod events;
pub mod iterator;
pub mod provider;
pub mod revert;
pub mod subscription;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::BlockId;
use serde::{Deserialize, Serialize};

/// Per-call configuration for read-only calls
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Caller identity the node should execute the call as
    pub from: Option<Address>,
    /// Block to execute against; latest when unset
    pub block: Option<BlockId>,
    /// Execute against the pending state, overrides `block`
    pub pending: bool,
    /// Give up on the call after this long
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn at_block(number: u64) -> Self {
        Self {
            block: Some(BlockId::number(number)),
            ..Default::default()
        }
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Block the call should run against, folding in `pending`
    pub fn block_id(&self) -> Option<BlockId> {
        if self.pending {
            Some(BlockId::pending())
        } else {
            self.block
        }
    }
}

/// Per-transaction configuration. Signing is done by the backend.
#[derive(Debug, Clone, Default)]
pub struct TransactOptions {
    pub from: Option<Address>,
    /// Wei to send along with the transaction
    pub value: Option<U256>,
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    /// Legacy gas price
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub timeout: Option<Duration>,
}

impl TransactOptions {
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub(crate) fn sends_value(&self) -> bool {
        self.value.is_some_and(|v| !v.is_zero())
    }
}

/// Handle to a submitted, signed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHandle {
    pub hash: B256,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub input: Bytes,
    pub value: U256,
}

/// Raw event log as reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    pub transaction_hash: Option<B256>,
    pub transaction_index: Option<u64>,
    pub log_index: Option<u64>,
    /// Set when the log was dropped by a reorg
    pub removed: bool,
}

/// Transaction (or block) hash, block number and log index of a log
pub(crate) type Position = (Option<B256>, Option<u64>, u64);

impl LogRecord {
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }

    /// Identity of the log within the chain, when the backend reported enough metadata
    pub(crate) fn position(&self) -> Option<Position> {
        let log_index = self.log_index?;
        Some((self.transaction_hash.or(self.block_hash), self.block_number, log_index))
    }
}

/// A log decoded against one event of the ABI
#[derive(Debug, Clone, PartialEq)]
pub struct TypedEvent {
    pub name: String,
    /// Decoded parameters in declaration order
    pub fields: Vec<(String, DynSolValue)>,
    pub raw: LogRecord,
}

impl TypedEvent {
    pub fn field(&self, name: &str) -> Option<&DynSolValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn values(&self) -> impl Iterator<Item = &DynSolValue> {
        self.fields.iter().map(|(_, value)| value)
    }
}

/// Block range of a historical log query
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterOptions {
    pub start: u64,
    /// Last block to include; latest when unset
    pub end: Option<u64>,
    /// Query the range in windows of this many blocks. An open range is
    /// pinned to the head block when the query starts.
    pub page_size: Option<u64>,
}

impl FilterOptions {
    pub fn range(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
            page_size: None,
        }
    }

    pub fn paged(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// Start point of a live log feed
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    pub start: Option<u64>,
}
