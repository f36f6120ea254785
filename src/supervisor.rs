//! Sync Supervisor: the top-level loop. Selects a mode (fresh / replay /
//! incremental), wires the Scanner's failover and progress reporting, and
//! drains cleanly on SIGINT.

use crate::config::AppConfig;
use crate::derived_store::DerivedStore;
use crate::error::Result;
use crate::monitor::MonitorSink;
use crate::provider::Pool;
use crate::raw_store::RawStore;
use crate::registry::EventRegistry;
use crate::scanner::{BlockScanner, ScannerConfig};
use crate::scanner_state::ScannerState;
use crate::types::ContractAddress;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

/// Which top-level mode the supervisor runs, mirroring the CLI's
/// `sync [--init | --local]` surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// `--init`: wipe everything and rebuild from genesis.
    Fresh,
    /// `--local`: wipe the derived store only, then replay raw data.
    Replay,
    /// Default: resume from the persisted cursor and live-scan to head.
    Incremental,
}

pub struct Supervisor {
    config: AppConfig,
    provider: Arc<Pool>,
    registry: Arc<EventRegistry>,
    raw_store: Arc<RawStore>,
    derived_store: Arc<DerivedStore>,
    state: Arc<Mutex<ScannerState>>,
    monitor: Arc<dyn MonitorSink>,
    stop_flag: Arc<AtomicBool>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        provider: Arc<Pool>,
        registry: Arc<EventRegistry>,
        raw_store: Arc<RawStore>,
        derived_store: Arc<DerivedStore>,
        state: Arc<Mutex<ScannerState>>,
        monitor: Arc<dyn MonitorSink>,
    ) -> Self {
        Self {
            config,
            provider,
            registry,
            raw_store,
            derived_store,
            state,
            monitor,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    fn fixed_contracts(&self) -> HashMap<String, ContractAddress> {
        self.config
            .contracts
            .iter()
            .filter_map(|(name, addr)| {
                ContractAddress::new(addr.clone())
                    .ok()
                    .map(|a| (name.clone(), a))
            })
            .collect()
    }

    fn scanner(&self) -> BlockScanner {
        BlockScanner::new(
            self.provider.clone(),
            self.registry.clone(),
            self.raw_store.clone(),
            self.derived_store.clone(),
            self.state.clone(),
            self.fixed_contracts(),
            self.monitor.clone(),
            ScannerConfig {
                max_chunk_scan_size: self.config.sync_cfg.max_chunk_scan_size,
                request_interval_sec: self.config.sync_cfg.request_interval_sec,
                request_retry_seconds: self.config.sync_cfg.request_retry_seconds,
            },
            // Shared, not a fresh flag: a SIGINT observed between Supervisor
            // passes must also interrupt a scan already in progress.
            self.stop_flag.clone(),
        )
    }

    /// Installs a SIGINT handler that flips the shared stop flag. A clean
    /// exit happens after the current chunk finalizes and the cursor is
    /// persisted, per the graceful-drain policy in §7.
    pub fn install_signal_handler(&self) {
        let stop_flag = self.stop_flag.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("SIGINT received, draining current chunk before exit");
                stop_flag.store(true, Ordering::SeqCst);
            }
        });
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// Runs the supervisor to completion (or until stopped) in `mode`.
    pub async fn run(&self, mode: SyncMode) -> Result<()> {
        match mode {
            SyncMode::Fresh => self.run_fresh().await,
            SyncMode::Replay => self.run_replay().await,
            SyncMode::Incremental => self.run_incremental().await,
        }
    }

    async fn run_fresh(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.reset();
        }
        let _ = std::fs::remove_file(self.config.snapshot_path.clone());
        self.derived_store.drop_all().await?;
        self.raw_store.drop_all().await?;

        self.live_scan_to_head().await?;
        self.run_incremental().await
    }

    async fn run_replay(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.reset();
        }
        let _ = std::fs::remove_file(self.config.snapshot_path.clone());
        self.derived_store.drop_all().await?;

        let scanner = self.scanner();
        let total = self.raw_store.count_blocks().await?.max(0) as u64;
        scanner
            .replay(total, self.config.sync_cfg.scan_database_step_size as u64, |(blocks, events)| {
                tracing::info!(blocks, events, "replay progress");
            })
            .await?;

        self.run_incremental().await
    }

    async fn run_incremental(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.restore();
        }

        loop {
            if self.should_stop() {
                break;
            }
            self.live_scan_to_head().await?;
            if self.should_stop() {
                break;
            }
            sleep(Duration::from_secs_f32(self.config.sync_cfg.realtime_scan_interval_sec)).await;
        }
        Ok(())
    }

    async fn live_scan_to_head(&self) -> Result<()> {
        let scanner = self.scanner();
        let head = self.provider.block_number().await?;
        let last_scanned = {
            let state = self.state.lock().await;
            state.last_scanned_block()
        };

        let start = scanner.suggested_start(last_scanned);
        let end = scanner.suggested_end(head, self.config.sync_cfg.chain_reorg_safety_blocks);

        if start > end {
            return Ok(());
        }

        scanner
            .scan(start, end, |(blocks, events)| {
                tracing::info!(blocks, events, "live scan progress");
            })
            .await?;
        Ok(())
    }
}
