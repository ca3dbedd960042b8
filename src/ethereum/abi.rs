use alloy::json_abi::JsonAbi;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use super::revert::{self, RevertReason};
use crate::error::{Error, Result};

/// Parse an ABI from JSON.
///
/// Accepts either a bare ABI array or a compiler artifact object carrying the
/// ABI under an `abi` key (as an array or as a JSON-encoded string).
pub fn parse_abi(json: &str) -> Result<JsonAbi> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| Error::Abi(format!("Invalid ABI JSON: {}", e)))?;

    let abi_value = match value {
        Value::Object(mut artifact) => artifact
            .remove("abi")
            .ok_or_else(|| Error::Abi("JSON object has no 'abi' field".to_string()))?,
        other => other,
    };

    let abi_value = match abi_value {
        Value::String(inner) => serde_json::from_str(&inner)
            .map_err(|e| Error::Abi(format!("Invalid embedded ABI JSON: {}", e)))?,
        other => other,
    };

    serde_json::from_value(abi_value).map_err(|e| Error::Abi(format!("Malformed ABI: {}", e)))
}

/// Read and parse an ABI file
pub async fn load_abi_file(path: impl AsRef<Path>) -> Result<JsonAbi> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| Error::Abi(format!("Failed to read ABI file {:?}: {}", path, e)))?;
    parse_abi(&content)
}

/// Where the registry looks for ABIs
#[derive(Debug, Clone)]
pub struct AbiSource {
    /// Directory of `<name>.json` ABI files or artifacts
    pub abi_dir: Option<PathBuf>,
    /// Normalised copies of every loaded ABI
    pub cache_dir: PathBuf,
}

impl Default for AbiSource {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("contract-bind")
            .join("abi-cache");

        Self {
            abi_dir: None,
            cache_dir,
        }
    }
}

/// Named table of contract ABIs with a memory and disk cache.
///
/// Besides serving bindings, the registry decodes revert data against the
/// custom errors of every ABI it holds, which is how a failure raised by a
/// library contract gets a name even when the call went through another one.
#[derive(Debug)]
pub struct AbiRegistry {
    config: AbiSource,
    memory_cache: HashMap<String, Arc<JsonAbi>>,
}

impl AbiRegistry {
    pub fn new(config: AbiSource) -> Self {
        Self {
            config,
            memory_cache: HashMap::new(),
        }
    }

    /// Get an ABI by name, trying memory, then the ABI directory, then the disk cache.
    /// A file in the ABI directory always refreshes the cached copy.
    pub async fn get_abi(&mut self, name: &str) -> Result<Arc<JsonAbi>> {
        let key = cache_key(name);

        if let Some(abi) = self.memory_cache.get(&key) {
            debug!("ABI cache hit for {}", name);
            return Ok(abi.clone());
        }

        let source = self
            .config
            .abi_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", name)))
            .filter(|path| path.exists());

        let abi = match source {
            Some(path) => {
                info!("Loading ABI {} from {:?}", name, path);
                let abi = load_abi_file(&path).await?;
                if let Err(e) = self.cache_abi(&key, &abi).await {
                    warn!("Failed to cache ABI for {}: {}", name, e);
                }
                abi
            }
            None => match self.load_cached_abi(&key).await {
                Ok(abi) => {
                    debug!("ABI disk cache hit for {}", name);
                    abi
                }
                Err(_) => return Err(Error::Abi(format!("ABI '{}' is not registered", name))),
            },
        };

        let abi = Arc::new(abi);
        self.memory_cache.insert(key, abi.clone());
        Ok(abi)
    }

    /// Load ABI from disk cache
    async fn load_cached_abi(&self, key: &str) -> Result<JsonAbi> {
        let cache_path = self.config.cache_dir.join(format!("{}.json", key));

        if !cache_path.exists() {
            return Err(Error::Abi("Cache file does not exist".to_string()));
        }

        load_abi_file(&cache_path).await
    }

    /// Save ABI to disk cache
    async fn cache_abi(&self, key: &str, abi: &JsonAbi) -> Result<()> {
        if !self.config.cache_dir.exists() {
            fs::create_dir_all(&self.config.cache_dir)
                .await
                .map_err(|e| Error::Abi(format!("Failed to create cache directory: {}", e)))?;
        }

        let cache_path = self.config.cache_dir.join(format!("{}.json", key));
        let content = serde_json::to_string_pretty(abi)
            .map_err(|e| Error::Abi(format!("Failed to serialize ABI: {}", e)))?;

        fs::write(&cache_path, content)
            .await
            .map_err(|e| Error::Abi(format!("Failed to write cache file: {}", e)))?;

        debug!("Cached ABI to {:?}", cache_path);
        Ok(())
    }

    /// Register an ABI directly, e.g. one embedded in the calling program
    pub fn add_abi(&mut self, name: &str, abi: JsonAbi) -> Arc<JsonAbi> {
        let abi = Arc::new(abi);
        self.memory_cache.insert(cache_key(name), abi.clone());
        info!("Registered ABI {}", name);
        abi
    }

    /// Check if an ABI is available without loading it
    pub fn has_abi(&self, name: &str) -> bool {
        let key = cache_key(name);

        if self.memory_cache.contains_key(&key) {
            return true;
        }

        let cached = self.config.cache_dir.join(format!("{}.json", key));
        let source = self
            .config
            .abi_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", name)));

        cached.exists() || source.is_some_and(|path| path.exists())
    }

    /// Decode revert data against the custom errors of every loaded ABI,
    /// falling back to the builtin `Error(string)` and `Panic(uint256)`
    pub fn decode_revert(&self, data: &[u8]) -> Option<RevertReason> {
        let mut names: Vec<&String> = self.memory_cache.keys().collect();
        names.sort();

        names
            .into_iter()
            .find_map(|name| revert::decode_custom_error(&self.memory_cache[name], data))
            .or_else(|| revert::decode_builtin(data))
    }

    /// Clear all cached ABIs
    pub async fn clear_cache(&mut self) -> Result<()> {
        self.memory_cache.clear();

        if self.config.cache_dir.exists() {
            fs::remove_dir_all(&self.config.cache_dir)
                .await
                .map_err(|e| Error::Abi(format!("Failed to clear cache directory: {}", e)))?;
        }

        info!("Cleared ABI cache");
        Ok(())
    }
}

fn cache_key(name: &str) -> String {
    name.to_lowercase()
}
