//! ABI-driven client bindings for deployed Ethereum contracts.
//!
//! A [`ContractBinding`] is built from an address, an ABI and a [`Backend`].
//! It encodes calls and transactions against the ABI, decodes their results,
//! and serves the contract's events either as a pull cursor over a block range
//! ([`LogIterator`]) or as a live push feed ([`LogSubscription`]).
//!
//! [`Backend`]: ethereum::backend::Backend
//! [`LogIterator`]: ethereum::iterator::LogIterator
//! [`LogSubscription`]: ethereum::subscription::LogSubscription

pub mod config;
pub mod error;
pub mod ethereum;

pub use error::{BackendError, Error, Result};
pub use ethereum::abi::{parse_abi, AbiRegistry, AbiSource};
pub use ethereum::backend::{Backend, LogFeed, LogQuery};
pub use ethereum::contract::{CallerSession, ContractBinding, TransactorSession};
pub use ethereum::events::{decode_log_as, parse_log, EventStream, FilterCriteria};
pub use ethereum::iterator::LogIterator;
pub use ethereum::provider::{AlloyBackend, ProviderManager};
pub use ethereum::revert::RevertReason;
pub use ethereum::subscription::LogSubscription;
pub use ethereum::{
    CallOptions, FilterOptions, LogRecord, TransactOptions, TxHandle, TypedEvent, WatchOptions,
};
