//! Configuration module for the indexer.
///
/// Layered loading:
///
/// 1. compiled defaults
/// 2. optional file (YAML/TOML/JSON, inferred from extension)
/// 3. environment variables under the `SYNC__` prefix (double underscore
///    nests, e.g. `SYNC__SYNC_CFG__START_BLOCK=100`)
use crate::retry::RetryConfig;
use crate::types::ContractAddress;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub sync_cfg: SyncConfig,

    /// Seed tracked addresses, keyed by contract name.
    #[serde(default)]
    pub contracts: HashMap<String, String>,

    /// Directory of `*.json` ABI files, one per contract name.
    pub abi_dir: String,

    /// Raw Store connection string (SQLite path or `postgres://...`).
    pub raw_store_url: String,

    /// Derived Store connection string (SQLite path or `postgres://...`).
    pub derived_store_url: String,

    /// Snapshot file path for the persisted scanner cursor.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// The core's tuning knobs for chunked scanning and RPC throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Ordered pool of RPC endpoint URLs; failover walks this list.
    pub chain_api: Vec<String>,

    pub start_block: u64,

    /// Blocks below chain head considered too young to scan.
    pub chain_reorg_safety_blocks: u64,

    pub max_chunk_scan_size: u32,
    pub request_interval_sec: f32,
    pub request_retry_seconds: f32,
    pub realtime_scan_interval_sec: f32,

    /// Page size used when replaying from the Raw Store.
    pub scan_database_step_size: u32,
}

fn default_snapshot_path() -> String {
    "cache-state.json".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sync_cfg: SyncConfig {
                chain_api: vec!["https://rpc.gnosis.gateway.fm".to_string()],
                start_block: 1,
                chain_reorg_safety_blocks: 12,
                max_chunk_scan_size: 50,
                request_interval_sec: 0.2,
                request_retry_seconds: 5.0,
                realtime_scan_interval_sec: 15.0,
                scan_database_step_size: 1000,
            },
            contracts: HashMap::new(),
            abi_dir: "./abi".to_string(),
            raw_store_url: "./raw-store.db".to_string(),
            derived_store_url: "./derived-store.db".to_string(),
            snapshot_path: default_snapshot_path(),
            retry: RetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load with default search paths: `./config.{yaml,toml,json}`, then
    /// `SYNC__`-prefixed environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_optional_file(None)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_from_optional_file(Some(path.as_ref()))
    }

    fn load_from_optional_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(config_path) = path {
            builder = builder.add_source(File::from(config_path).required(true));
        } else {
            builder = builder.add_source(File::with_name("config").required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("SYNC")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Manual sanity checks beyond what `serde`/`config` enforce.
    pub fn validate(&self) -> Result<(), String> {
        if self.sync_cfg.chain_api.is_empty() {
            return Err("sync_cfg.chain_api must list at least one endpoint".to_string());
        }
        for url in &self.sync_cfg.chain_api {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!(
                    "invalid sync_cfg.chain_api entry '{url}': must start with http:// or https://"
                ));
            }
        }

        if self.sync_cfg.max_chunk_scan_size == 0 {
            return Err("sync_cfg.max_chunk_scan_size must be greater than 0".to_string());
        }
        if self.sync_cfg.scan_database_step_size == 0 {
            return Err("sync_cfg.scan_database_step_size must be greater than 0".to_string());
        }
        if self.sync_cfg.request_interval_sec < 0.0 {
            return Err("sync_cfg.request_interval_sec must be non-negative".to_string());
        }
        if self.sync_cfg.request_retry_seconds < 0.0 {
            return Err("sync_cfg.request_retry_seconds must be non-negative".to_string());
        }

        if self.abi_dir.is_empty() {
            return Err("abi_dir cannot be empty".to_string());
        }
        if self.raw_store_url.is_empty() {
            return Err("raw_store_url cannot be empty".to_string());
        }
        if self.derived_store_url.is_empty() {
            return Err("derived_store_url cannot be empty".to_string());
        }

        for (name, addr) in &self.contracts {
            if !addr.starts_with("0x") || addr.len() != 42 {
                return Err(format!(
                    "seed address '{addr}' for contract '{name}' must be a 42-character 0x-prefixed hex string"
                ));
            }
        }

        Ok(())
    }

    /// Seed addresses grouped strictly per contract name, fed to
    /// `ScannerState::new` at startup. Malformed addresses are dropped with
    /// a warning rather than failing startup, matching the Raw/Derived
    /// store reset policy of staying operable on partial bad input.
    pub fn seed_addresses(&self) -> HashMap<String, HashSet<ContractAddress>> {
        let mut seeds: HashMap<String, HashSet<ContractAddress>> = HashMap::new();
        for (name, addr) in &self.contracts {
            match ContractAddress::new(addr.clone()) {
                Ok(address) => {
                    seeds.entry(name.clone()).or_default().insert(address);
                }
                Err(e) => tracing::warn!(contract = name, address = addr, error = %e, "ignoring malformed seed address"),
            }
        }
        seeds
    }
}
