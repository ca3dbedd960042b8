use crate::config::{Config, LogsConfig, NetworkConfig};
use crate::error::BackendError;
use alloy::{
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Filter, Log, TransactionRequest},
    signers::local::PrivateKeySigner,
    transports::{
        http::{reqwest::Url, Client, Http},
        TransportError,
    },
};
use anyhow::{anyhow, Result};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::{Backend, LogFeed, LogQuery};
use super::{utils, CallOptions, LogRecord, Position, TransactOptions, TxHandle};

/// [`Backend`] over a JSON-RPC node reached through HTTP
pub struct AlloyBackend {
    provider: RootProvider<Http<Client>>,
    rpc_url: Url,
    network: NetworkConfig,
    logs: LogsConfig,
    signer: Option<PrivateKeySigner>,
}

impl std::fmt::Debug for AlloyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyBackend")
            .field("rpc_url", &self.network.rpc_url)
            .field("chain_id", &self.network.chain_id)
            .field("signer", &self.signer.as_ref().map(|s| s.address()))
            .finish()
    }
}

impl AlloyBackend {
    pub fn new(network: NetworkConfig, logs: LogsConfig) -> Result<Self> {
        let rpc_url: Url = network
            .rpc_url
            .parse()
            .map_err(|e| anyhow!("Invalid RPC URL '{}': {}", network.rpc_url, e))?;
        let provider = ProviderBuilder::new().on_http(rpc_url.clone());

        Ok(Self {
            provider,
            rpc_url,
            network,
            logs,
            signer: None,
        })
    }

    /// Sign transactions with the given hex private key
    pub fn with_private_key(mut self, private_key: &str) -> Result<Self> {
        let private_key = private_key.trim();
        let private_key = private_key.strip_prefix("0x").unwrap_or(private_key);

        let signer = PrivateKeySigner::from_str(private_key)
            .map_err(|e| anyhow!("Invalid private key: {}", e))?;
        info!("Transactions will be signed by {:?}", signer.address());

        self.signer = Some(signer);
        Ok(self)
    }

    pub fn provider(&self) -> &RootProvider<Http<Client>> {
        &self.provider
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|signer| signer.address())
    }

    fn filter(query: &LogQuery) -> Filter {
        let mut filter = Filter::new().address(query.address);
        if let Some(from) = query.from_block {
            filter = filter.from_block(from);
        }
        if let Some(to) = query.to_block {
            filter = filter.to_block(to);
        }

        for (slot, accepted) in query.topics.iter().take(4).enumerate() {
            if !accepted.is_empty() {
                filter.topics[slot] = accepted.clone().into();
            }
        }

        filter
    }
}

fn backend_error(err: TransportError) -> BackendError {
    let revert_data = err
        .as_error_resp()
        .and_then(|payload| payload.as_revert_data());
    let message = utils::interpret_rpc_error(&err.to_string());

    BackendError {
        message,
        revert_data,
    }
}

fn to_record(log: Log) -> LogRecord {
    LogRecord {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        block_number: log.block_number,
        block_hash: log.block_hash,
        transaction_hash: log.transaction_hash,
        transaction_index: log.transaction_index,
        log_index: log.log_index,
        removed: log.removed,
    }
}

#[async_trait::async_trait]
impl Backend for AlloyBackend {
    async fn call(
        &self,
        address: Address,
        input: Bytes,
        opts: &CallOptions,
    ) -> Result<Bytes, BackendError> {
        let mut request = TransactionRequest::default().to(address).input(input.into());
        if let Some(from) = opts.from {
            request = request.from(from);
        }

        let call = self.provider.call(&request);
        let result = match opts.block_id() {
            Some(block) => call.block(block).await,
            None => call.await,
        };

        result.map_err(|e| {
            debug!("eth_call to {:?} failed: {}", address, e);
            backend_error(e)
        })
    }

    async fn transact(
        &self,
        to: Option<Address>,
        input: Bytes,
        opts: &TransactOptions,
    ) -> Result<TxHandle, BackendError> {
        let signer = self
            .signer
            .clone()
            .ok_or_else(|| BackendError::new("No signing key configured, set CONTRACT_BIND_PRIVATE_KEY"))?;
        let from = signer.address();

        if let Some(requested) = opts.from {
            if requested != from {
                return Err(BackendError::new(format!(
                    "Transaction requested sender {:?} but the configured key signs as {:?}",
                    requested, from
                )));
            }
        }

        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.clone());

        let mut tx_request = TransactionRequest::default().with_from(from);
        tx_request = match to {
            Some(to) => tx_request.with_to(to).with_input(input.clone()),
            None => tx_request.with_deploy_code(input.clone()),
        };

        let value = opts.value.unwrap_or_default();
        if !value.is_zero() {
            tx_request = tx_request.with_value(value);
        }

        if let Some(nonce) = opts.nonce {
            tx_request = tx_request.with_nonce(nonce);
        }

        if let Some(gas) = opts.gas_limit {
            tx_request = tx_request.with_gas_limit(gas);
        } else {
            match self.provider.estimate_gas(&tx_request).await {
                Ok(estimated_gas) => {
                    tx_request = tx_request.with_gas_limit(estimated_gas);
                }
                Err(e) => {
                    warn!("Gas estimation failed, using default: {}", e);
                    tx_request = tx_request.with_gas_limit(self.network.gas.default_gas_limit);
                }
            }
        }

        if let Some(gas_price) = opts.gas_price {
            tx_request = tx_request.with_gas_price(gas_price);
        } else if opts.max_fee_per_gas.is_some() || opts.max_priority_fee_per_gas.is_some() {
            if let Some(max_fee) = opts.max_fee_per_gas {
                tx_request = tx_request.with_max_fee_per_gas(max_fee);
            }
            if let Some(priority_fee) = opts
                .max_priority_fee_per_gas
                .or(self.network.gas.priority_fee.map(u128::from))
            {
                tx_request = tx_request.with_max_priority_fee_per_gas(priority_fee);
            }
        } else if let Some(max_gas_price) = self.network.gas.max_gas_price {
            tx_request = tx_request.with_gas_price(max_gas_price as u128);
        }

        let pending = provider
            .send_transaction(tx_request)
            .await
            .map_err(backend_error)?;
        let hash = *pending.tx_hash();
        info!("Transaction sent with hash: {:?}", hash);

        Ok(TxHandle {
            hash,
            from: Some(from),
            to,
            input,
            value,
        })
    }

    async fn block_number(&self) -> Result<u64, BackendError> {
        self.provider.get_block_number().await.map_err(backend_error)
    }

    async fn filter_logs(&self, query: &LogQuery) -> Result<Vec<LogRecord>, BackendError> {
        let logs = self
            .provider
            .get_logs(&Self::filter(query))
            .await
            .map_err(backend_error)?;

        Ok(logs.into_iter().map(to_record).collect())
    }

    async fn watch_logs(&self, query: &LogQuery) -> Result<LogFeed, BackendError> {
        // The node filter is installed before the head is read, so a block
        // mined in between shows up in the backlog, the filter, or both.
        let poller = self
            .provider
            .watch_logs(&Self::filter(query))
            .await
            .map_err(backend_error)?;

        let mut backlog = Vec::new();
        if let Some(start) = query.from_block {
            let head = self.block_number().await?;
            if start <= head {
                let past = query.clone().with_range(Some(start), Some(head));
                backlog = self.filter_logs(&past).await?;
            }
        }
        let replayed = Replayed::new(&backlog);

        let mut batches = Box::pin(
            poller
                .with_poll_interval(self.logs.poll_interval())
                .into_stream(),
        );

        let (log_tx, logs) = mpsc::channel(self.logs.channel_capacity.max(1));
        let (err_tx, errors) = mpsc::channel(1);
        let address = query.address;

        let task = tokio::spawn(async move {
            for record in backlog {
                if log_tx.send(record).await.is_err() {
                    return;
                }
            }

            while let Some(batch) = batches.next().await {
                for record in batch.into_iter().map(to_record) {
                    if replayed.contains(&record) {
                        continue;
                    }
                    if log_tx.send(record).await.is_err() {
                        return;
                    }
                }
            }

            warn!("Log filter for {:?} stopped polling", address);
            let _ = err_tx
                .send(BackendError::new(format!(
                    "Log filter for {:?} stopped polling",
                    address
                )))
                .await;
        });

        debug!("Watching logs of {:?}", address);
        Ok(LogFeed::new(logs, errors, move || task.abort()))
    }
}

/// Positions of the backlog replayed ahead of a live filter
struct Replayed(HashSet<Position>);

impl Replayed {
    fn new(backlog: &[LogRecord]) -> Self {
        Self(backlog.iter().filter_map(LogRecord::position).collect())
    }

    fn contains(&self, record: &LogRecord) -> bool {
        record
            .position()
            .is_some_and(|position| self.0.contains(&position))
    }
}

/// One [`AlloyBackend`] per configured network
#[derive(Debug)]
pub struct ProviderManager {
    backends: HashMap<String, Arc<AlloyBackend>>,
    config: Config,
}

impl ProviderManager {
    pub fn new(config: Config) -> Result<Self> {
        let mut backends = HashMap::new();

        for (network_name, network_config) in &config.networks {
            let mut backend = AlloyBackend::new(network_config.clone(), config.logs.clone())
                .map_err(|e| anyhow!("Network '{}': {}", network_name, e))?;
            if let Some(key) = &config.private_key {
                backend = backend.with_private_key(key)?;
            }
            backends.insert(network_name.clone(), Arc::new(backend));
        }

        Ok(Self { backends, config })
    }

    pub fn get_backend(&self, network: Option<&str>) -> Result<Arc<AlloyBackend>> {
        let network_name = network.unwrap_or(&self.config.default_network);
        utils::validate_network(network_name, &self.get_available_networks())?;

        self.backends
            .get(network_name)
            .cloned()
            .ok_or_else(|| anyhow!("Network '{}' not found", network_name))
    }

    pub fn get_network_config(&self, network: Option<&str>) -> Result<&NetworkConfig> {
        let network_name = network.unwrap_or(&self.config.default_network);
        self.config
            .networks
            .get(network_name)
            .ok_or_else(|| anyhow!("Network '{}' not configured", network_name))
    }

    pub fn get_available_networks(&self) -> Vec<String> {
        let mut networks: Vec<String> = self.config.networks.keys().cloned().collect();
        networks.sort();
        networks
    }

    /// Validates network connectivity and that the node serves the configured chain
    pub async fn validate_network_connection(&self, network: Option<&str>) -> Result<()> {
        let network_name = network.unwrap_or(&self.config.default_network);
        let backend = self
            .get_backend(network)
            .map_err(|e| anyhow!("Network '{}' is not configured: {}", network_name, e))?;

        let chain_id = backend.provider().get_chain_id().await.map_err(|e| {
            anyhow!(
                "Cannot connect to network '{}': {}. Please check your RPC endpoint configuration and network connectivity.",
                network_name,
                utils::interpret_rpc_error(&e.to_string())
            )
        })?;

        let expected = self.get_network_config(network)?.chain_id;
        if chain_id != expected {
            return Err(anyhow!(
                "Network '{}' is configured for chain {} but the RPC endpoint serves chain {}",
                network_name,
                expected,
                chain_id
            ));
        }

        Ok(())
    }
}
