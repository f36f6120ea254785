//! Scanner State: the persisted cursor (`last_scanned_block` plus per-
//! contract tracked-address sets) that lets a run resume after a restart.
//!
//! Store/Derived-store admin resets (`drop_raw`, `drop_derived`,
//! `delete_raw_above`) are *not* methods on this type — per the design
//! notes on global state, `RawStore`/`DerivedStore` are explicit components
//! the Supervisor holds directly rather than something the cursor reaches
//! into, so those resets live on the Supervisor instead (see `supervisor.rs`).

use crate::error::{IndexerError, Result};
use crate::types::ContractAddress;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// On-disk snapshot shape: `{ "last_scanned_block": i64, "address": { contract_name: [addr] } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    last_scanned_block: i64,
    address: HashMap<String, Vec<String>>,
}

const SAVE_INTERVAL: Duration = Duration::from_secs(60);

pub struct ScannerState {
    snapshot_path: PathBuf,
    configured_start: u64,
    seed_addresses: HashMap<String, HashSet<ContractAddress>>,
    last_scanned_block: i64,
    tracked_addresses: HashMap<String, HashSet<ContractAddress>>,
    last_saved_at: Option<Instant>,
}

impl ScannerState {
    pub fn new(
        snapshot_path: impl Into<PathBuf>,
        configured_start: u64,
        seed_addresses: HashMap<String, HashSet<ContractAddress>>,
    ) -> Self {
        let mut state = Self {
            snapshot_path: snapshot_path.into(),
            configured_start,
            seed_addresses,
            last_scanned_block: 0,
            tracked_addresses: HashMap::new(),
            last_saved_at: None,
        };
        state.reset();
        state
    }

    /// Sets the cursor to `(configured_start - 1, seed_addresses)`.
    pub fn reset(&mut self) {
        self.last_scanned_block = self.configured_start as i64 - 1;
        self.tracked_addresses = self.seed_addresses.clone();
        self.last_saved_at = None;
    }

    /// Loads the snapshot; falls back to `reset()` on any read/parse failure.
    pub fn restore(&mut self) {
        match self.try_restore() {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(error = %e, path = %self.snapshot_path.display(), "snapshot read failed, resetting cursor");
                self.reset();
            }
        }
    }

    fn try_restore(&mut self) -> Result<()> {
        let raw = std::fs::read_to_string(&self.snapshot_path)?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;

        self.last_scanned_block = snapshot.last_scanned_block;
        self.tracked_addresses = HashMap::new();
        for (contract, addrs) in snapshot.address {
            let set = addrs
                .into_iter()
                .filter_map(|a| ContractAddress::new(a).ok())
                .collect();
            self.tracked_addresses.insert(contract, set);
        }
        Ok(())
    }

    /// Writes the snapshot atomically: write to a temp file, then rename
    /// over the target, so a crash mid-write never leaves a truncated
    /// snapshot on disk.
    pub fn save(&mut self) -> Result<()> {
        let snapshot = Snapshot {
            last_scanned_block: self.last_scanned_block,
            address: self
                .tracked_addresses
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().map(|a| a.to_string()).collect()))
                .collect(),
        };

        let body = serde_json::to_string_pretty(&snapshot)?;
        let tmp_path = self.snapshot_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &self.snapshot_path)?;
        self.last_saved_at = Some(Instant::now());
        Ok(())
    }

    pub fn start_chunk(&mut self, _start: u64) {
        // No-op placeholder for symmetry with end_chunk; kept as its own
        // method because the Scanner calls it at a distinct point in the
        // loop and future bookkeeping (e.g. chunk-start timestamps) may want
        // the hook.
    }

    /// Advances `last_scanned_block` to `min(end, end_of_range)` and, when at
    /// least 60s have elapsed since the last snapshot, persists.
    pub fn end_chunk(&mut self, end: u64) -> Result<()> {
        self.last_scanned_block = self.last_scanned_block.max(end as i64);

        let due = match self.last_saved_at {
            None => true,
            Some(t) => t.elapsed() >= SAVE_INTERVAL,
        };
        if due {
            self.save()?;
        }
        Ok(())
    }

    pub fn last_scanned_block(&self) -> i64 {
        self.last_scanned_block
    }

    /// Strictly per-contract: there is no shared/global seed key, so
    /// addresses never leak across contract names.
    pub fn add_address(&mut self, contract_name: &str, address: &str) {
        let Ok(address) = ContractAddress::new(address) else {
            tracing::warn!(contract = contract_name, address, "ignoring malformed tracked address");
            return;
        };
        self.tracked_addresses
            .entry(contract_name.to_string())
            .or_default()
            .insert(address);
    }

    pub fn get_addresses(&self, contract_name: &str) -> Vec<ContractAddress> {
        self.tracked_addresses
            .get(contract_name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }
}
