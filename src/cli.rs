//! Command-line front end. Not part of the core scanning/dispatch engine,
//! but the surface that drives it: a single `sync` subcommand selecting
//! fresh / replay / incremental mode, plus the ambient flags (`-c/--config`,
//! `-v/--verbose`, `--rpc-url`).

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::derived_store::DerivedStore;
use crate::monitor::NullSink;
use crate::provider::Pool;
use crate::raw_store::RawStore;
use crate::registry::EventRegistry;
use crate::scanner_state::ScannerState;
use crate::supervisor::{Supervisor, SyncMode};
use tokio::sync::Mutex;

#[derive(Parser, Debug)]
#[command(name = "evm-chain-indexer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML, TOML, or JSON).
    #[arg(long, short = 'c', env = "SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Comma-separated RPC endpoint pool, overrides `sync_cfg.chain_api`.
    #[arg(long, env = "RPC_URL", value_delimiter = ',')]
    pub rpc_url: Option<Vec<String>>,

    /// Enable verbose (debug-level) logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Fresh sync: wipe all persisted state and rebuild from genesis.
    #[arg(long, conflicts_with = "local")]
    pub init: bool,

    /// Replay sync: rebuild the derived store from already-cached raw data.
    #[arg(long, conflicts_with = "init")]
    pub local: bool,
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load_from_file(path).context("loading configuration file")?,
            None => AppConfig::load().context("loading configuration")?,
        };

        if let Some(urls) = &self.rpc_url {
            config.sync_cfg.chain_api = urls.clone();
        }

        config.validate().map_err(anyhow::Error::msg)?;

        let mode = if self.init {
            SyncMode::Fresh
        } else if self.local {
            SyncMode::Replay
        } else {
            SyncMode::Incremental
        };

        let monitor = Arc::new(NullSink);
        let provider = Arc::new(Pool::new(config.sync_cfg.chain_api.clone(), monitor.clone()).await?);
        let registry = Arc::new(EventRegistry::load(
            std::path::Path::new(&config.abi_dir),
            monitor.clone(),
        )?);
        let raw_store = Arc::new(RawStore::connect(&config.raw_store_url).await?);
        let derived_store = Arc::new(DerivedStore::connect(&config.derived_store_url).await?);

        let seeds = config.seed_addresses();
        let state = Arc::new(Mutex::new(ScannerState::new(
            config.snapshot_path.clone(),
            config.sync_cfg.start_block,
            seeds,
        )));

        let supervisor = Supervisor::new(
            config,
            provider,
            registry,
            raw_store,
            derived_store,
            state,
            monitor,
        );
        supervisor.install_signal_handler();
        supervisor.run(mode).await?;

        Ok(())
    }
}
