use alloy::primitives::B256;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub networks: HashMap<String, NetworkConfig>,
    pub default_network: String,
    #[serde(default)]
    pub logs: LogsConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub abi: AbiConfig,
    /// Signing key, only ever taken from the environment
    #[serde(skip)]
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub explorer_url: Option<String>,
    pub gas: GasConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    pub default_gas_limit: u64,
    pub max_gas_price: Option<u64>,
    pub priority_fee: Option<u64>,
}

/// Log retrieval tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Blocks per eth_getLogs window for bounded queries
    pub page_size: Option<u64>,
    pub poll_interval_ms: u64,
    /// Logs buffered between the node poller and a subscription
    pub channel_capacity: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            page_size: Some(10_000),
            poll_interval_ms: 4_000,
            channel_capacity: 256,
        }
    }
}

impl LogsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub allow_write_operations: bool,
    pub max_transaction_value: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AbiConfig {
    /// Directory of `<name>.json` ABI files
    pub abi_dir: Option<PathBuf>,
    /// Where loaded ABIs are cached; the user cache directory when unset
    pub cache_dir: Option<PathBuf>,
}

impl NetworkConfig {
    /// Block explorer page of a transaction, when an explorer is configured
    pub fn tx_url(&self, hash: &B256) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), hash))
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut networks = HashMap::new();

        networks.insert(
            "ethereum".to_string(),
            NetworkConfig {
                rpc_url: "https://eth-mainnet.g.alchemy.com/v2/demo".to_string(),
                chain_id: 1,
                explorer_url: Some("https://etherscan.io".to_string()),
                gas: GasConfig {
                    default_gas_limit: 100000,
                    max_gas_price: Some(50_000_000_000), // 50 Gwei
                    priority_fee: Some(2_000_000_000),   // 2 Gwei
                },
            },
        );

        networks.insert(
            "sepolia".to_string(),
            NetworkConfig {
                rpc_url: "https://eth-sepolia.g.alchemy.com/v2/demo".to_string(),
                chain_id: 11155111,
                explorer_url: Some("https://sepolia.etherscan.io".to_string()),
                gas: GasConfig {
                    default_gas_limit: 100000,
                    max_gas_price: Some(20_000_000_000), // 20 Gwei
                    priority_fee: Some(1_000_000_000),   // 1 Gwei
                },
            },
        );

        networks.insert(
            "local".to_string(),
            NetworkConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                chain_id: 31337,
                explorer_url: None,
                gas: GasConfig {
                    default_gas_limit: 3_000_000,
                    max_gas_price: None,
                    priority_fee: None,
                },
            },
        );

        Self {
            networks,
            default_network: "ethereum".to_string(),
            logs: LogsConfig::default(),
            security: SecurityConfig {
                allow_write_operations: false,
                max_transaction_value: None,
            },
            abi: AbiConfig::default(),
            private_key: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {:?}: {}", path, e))?;

        if !config.networks.contains_key(&config.default_network) {
            return Err(anyhow!(
                "Default network '{}' is not configured in {:?}",
                config.default_network,
                path
            ));
        }

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow!("Failed to create config directory {:?}: {}", parent, e)
                })?;
            }
        }

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {:?}: {}", path, e))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub async fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Self {
        let mut config = match path {
            Some(path) => match Self::load_from_file(path).await {
                Ok(config) => {
                    tracing::info!("Loaded configuration from file");
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to load config file, using defaults: {}", e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env_vars();
        config
    }

    /// Apply environment variable substitutions to configuration
    fn apply_env_vars(&mut self) {
        self.apply_api_key(std::env::var("ALCHEMY_API_KEY").ok());

        if let Ok(key) = std::env::var("CONTRACT_BIND_PRIVATE_KEY") {
            tracing::debug!("Signing key provided through CONTRACT_BIND_PRIVATE_KEY");
            self.private_key = Some(key);
        }
    }

    fn apply_api_key(&mut self, api_key: Option<String>) {
        let Some(api_key) = api_key else {
            for (network_name, network_config) in &self.networks {
                if network_config.rpc_url.contains("/demo") {
                    tracing::warn!("Using demo RPC endpoint for {}, set ALCHEMY_API_KEY environment variable for better reliability", network_name);
                }
            }
            return;
        };

        tracing::info!("Using ALCHEMY_API_KEY environment variable for RPC URLs");
        for (network_name, network_config) in &mut self.networks {
            if network_config.rpc_url.contains("alchemy.com/v2/demo") {
                network_config.rpc_url = network_config
                    .rpc_url
                    .replace("/demo", &format!("/{}", api_key));
                tracing::debug!("Updated {} RPC URL with API key", network_name);
            } else if network_config.rpc_url.contains("YOUR_API_KEY_HERE") {
                network_config.rpc_url = network_config
                    .rpc_url
                    .replace("YOUR_API_KEY_HERE", &api_key);
                tracing::debug!("Updated {} RPC URL with API key", network_name);
            }
        }
    }

    /// Get default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("contract-bind").join("config.toml"))
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let sample_config = r#"# contract-bind configuration file
# Networks, log retrieval and write permissions

# Network used when none is given on the command line
default_network = "ethereum"

[networks.ethereum]
rpc_url = "https://eth-mainnet.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 1
explorer_url = "https://etherscan.io"

[networks.ethereum.gas]
default_gas_limit = 100000
max_gas_price = 50_000_000_000  # 50 Gwei
priority_fee = 2_000_000_000    # 2 Gwei

[networks.sepolia]
rpc_url = "https://eth-sepolia.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 11155111
explorer_url = "https://sepolia.etherscan.io"

[networks.sepolia.gas]
default_gas_limit = 100000
max_gas_price = 20_000_000_000  # 20 Gwei
priority_fee = 1_000_000_000    # 1 Gwei

[networks.local]
rpc_url = "http://127.0.0.1:8545"
chain_id = 31337

[networks.local.gas]
default_gas_limit = 3000000

# Log queries and subscriptions
[logs]
page_size = 10000          # blocks per eth_getLogs window
poll_interval_ms = 4000    # eth_getFilterChanges interval for watch
channel_capacity = 256

# Security settings
[security]
allow_write_operations = false
# max_transaction_value = "1000000000000000000"  # 1 ETH in wei

[abi]
# abi_dir = "./abis"        # <name>.json files, used with --abi-name
# cache_dir = "/tmp/contract-bind-abis"

# Environment variables that can be used:
# ALCHEMY_API_KEY - Your Alchemy API key (replaces YOUR_API_KEY_HERE above)
# CONTRACT_BIND_PRIVATE_KEY - Hex private key used to sign transactions
"#;
        sample_config.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sample_parses() {
        let config: Config = toml::from_str(&Config::generate_sample()).unwrap();
        assert_eq!(config.default_network, "ethereum");
        assert_eq!(config.networks["sepolia"].chain_id, 11155111);
        assert_eq!(config.networks["local"].gas.max_gas_price, None);
        assert_eq!(config.logs.page_size, Some(10_000));
        assert!(!config.security.allow_write_operations);
        assert!(config.private_key.is_none());
    }

    #[test]
    fn test_explorer_tx_url() {
        let config = Config::default();
        let hash = B256::repeat_byte(0xab);

        assert_eq!(
            config.networks["sepolia"].tx_url(&hash),
            Some(format!("https://sepolia.etherscan.io/tx/{}", hash))
        );
        assert_eq!(config.networks["local"].tx_url(&hash), None);

        let mut trailing = config.networks["ethereum"].clone();
        trailing.explorer_url = Some("https://etherscan.io/".to_string());
        assert_eq!(
            trailing.tx_url(&hash),
            Some(format!("https://etherscan.io/tx/{}", hash))
        );
    }

    #[test]
    fn test_api_key_substitution() {
        let mut config = Config::default();
        config.apply_api_key(Some("secret".to_string()));

        assert_eq!(
            config.networks["ethereum"].rpc_url,
            "https://eth-mainnet.g.alchemy.com/v2/secret"
        );
        assert_eq!(config.networks["local"].rpc_url, "http://127.0.0.1:8545");
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.default_network = "local".to_string();
        config.logs.poll_interval_ms = 250;
        config.private_key = Some("0x01".to_string());
        config.save_to_file(&path).await.unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(!saved.contains("private_key"));

        let loaded = Config::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.default_network, "local");
        assert_eq!(loaded.logs.poll_interval(), Duration::from_millis(250));
        assert!(loaded.private_key.is_none());
    }

    #[tokio::test]
    async fn test_unknown_default_network_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_network = "mainnet"

[networks.local]
rpc_url = "http://127.0.0.1:8545"
chain_id = 31337

[networks.local.gas]
default_gas_limit = 21000

[security]
allow_write_operations = false
"#,
        )
        .unwrap();

        assert!(Config::load_from_file(&path).await.is_err());

        let fallback = Config::load_or_default(Some(&path)).await;
        assert_eq!(fallback.default_network, "ethereum");
    }
}
