//! Block Scanner: the orchestrator. Drives the RPC fetch pipeline, decodes
//! logs via the Event Registry, and dispatches decoded events to handlers in
//! strict `(block_number, log_index)` order — both in the live path (RPC ->
//! Raw + Derived) and the replay path (Raw -> Derived only).

use crate::codec::{ByteString, HexBytesString};
use crate::derived_store::DerivedStore;
use crate::error::{IndexerError, Result};
use crate::monitor::MonitorSink;
use crate::provider::{self, Pool};
use crate::raw_store::{RawBlockRecord, RawReceiptRecord, RawStore};
use crate::registry::{DecodedEvent, EventInfo, EventRegistry, HandlerContext, NATIVE_TRANSFER_EVENT};
use crate::scanner_state::ScannerState;
use crate::types::ContractAddress;
use alloy::primitives::TxHash;
use alloy::rpc::types::{Block, Transaction, TransactionReceipt};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

/// Tuning knobs the Supervisor threads through from `sync_cfg`.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub max_chunk_scan_size: u32,
    pub request_interval_sec: f32,
    pub request_retry_seconds: f32,
}

pub struct BlockScanner {
    provider: Arc<Pool>,
    registry: Arc<EventRegistry>,
    raw_store: Arc<RawStore>,
    derived_store: Arc<DerivedStore>,
    state: Arc<Mutex<ScannerState>>,
    fixed_contracts: HashMap<String, ContractAddress>,
    monitor: Arc<dyn MonitorSink>,
    config: ScannerConfig,
    stop_flag: Arc<AtomicBool>,
}

/// Progress reported after each chunk: `(blocks_scanned, events_dispatched)`.
pub type Progress = (u64, u64);

impl BlockScanner {
    /// `stop_flag` is shared with whatever drives this scanner (the
    /// Supervisor's SIGINT handler sets the same `Arc<AtomicBool>`) so a
    /// signal observed between Supervisor passes also interrupts an
    /// in-progress multi-chunk `scan()`/`replay()`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<Pool>,
        registry: Arc<EventRegistry>,
        raw_store: Arc<RawStore>,
        derived_store: Arc<DerivedStore>,
        state: Arc<Mutex<ScannerState>>,
        fixed_contracts: HashMap<String, ContractAddress>,
        monitor: Arc<dyn MonitorSink>,
        config: ScannerConfig,
        stop_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            provider,
            registry,
            raw_store,
            derived_store,
            state,
            fixed_contracts,
            monitor,
            config,
            stop_flag,
        }
    }

    /// Cooperative stop: checked before each chunk begins.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub fn suggested_start(&self, last_scanned_block: i64) -> u64 {
        last_scanned_block.max(1) as u64
    }

    pub fn suggested_end(&self, chain_head: u64, safety: u64) -> u64 {
        chain_head.saturating_sub(safety)
    }

    /// Live scan `[start, end]`: RPC -> Raw Store -> decode -> dispatch.
    pub async fn scan(
        &self,
        start: u64,
        end: u64,
        on_progress: impl Fn(Progress),
    ) -> Result<Progress> {
        if start > end {
            return Ok((0, 0));
        }

        let chunk_size = self.config.max_chunk_scan_size.max(1) as u64;
        let mut blocks_scanned = 0u64;
        let mut events_dispatched = 0u64;
        let mut cs = start;

        while cs <= end {
            if self.stop_flag.load(Ordering::SeqCst) {
                break;
            }
            let ce = (cs + chunk_size - 1).min(end);

            {
                let mut state = self.state.lock().await;
                state.start_chunk(cs);
            }

            let blocks = self.fetch_blocks(cs, ce).await?;
            for block in &blocks {
                self.raw_store.put_block(&to_raw_block(block)).await?;
            }

            let tx_hashes: Vec<TxHash> = blocks
                .iter()
                .flat_map(|b| b.transactions.as_transactions().unwrap_or_default())
                .map(|tx| tx.info().hash.unwrap_or_default())
                .collect();

            let receipts = self.fetch_receipts(&tx_hashes).await?;
            for (hash, receipt) in &receipts {
                self.raw_store
                    .put_receipt(&to_raw_receipt(*hash, receipt))
                    .await?;
            }

            let tx_by_hash: HashMap<TxHash, Transaction> = blocks
                .iter()
                .flat_map(|b| b.transactions.as_transactions().unwrap_or_default())
                .filter_map(|tx| tx.info().hash.map(|h| (h, tx.clone())))
                .collect();
            let timestamp_by_block: HashMap<u64, u64> =
                blocks.iter().map(|b| (b.header.number, b.header.timestamp)).collect();

            let dispatched = self
                .decode_and_dispatch(&receipts, &tx_by_hash, &timestamp_by_block)
                .await?;
            events_dispatched += dispatched;
            blocks_scanned += blocks.len() as u64;

            {
                let mut state = self.state.lock().await;
                state.end_chunk(ce)?;
            }

            on_progress((blocks_scanned, events_dispatched));
            sleep(Duration::from_secs_f32(self.config.request_interval_sec)).await;
            cs = ce + 1;
        }

        Ok((blocks_scanned, events_dispatched))
    }

    /// Replay scan: identical decode/dispatch pipeline, but sourced entirely
    /// from the Raw Store — no RPC calls.
    pub async fn replay(
        &self,
        total_end: u64,
        page_size: u64,
        on_progress: impl Fn(Progress),
    ) -> Result<Progress> {
        let page_size = page_size.max(1);
        let mut blocks_scanned = 0u64;
        let mut events_dispatched = 0u64;
        let mut cs = 1u64;

        while cs <= total_end {
            if self.stop_flag.load(Ordering::SeqCst) {
                break;
            }
            let ce = (cs + page_size - 1).min(total_end);

            let raw_blocks = self.raw_store.blocks_in_range(cs, ce).await?;
            let mut tx_by_hash: HashMap<TxHash, Transaction> = HashMap::new();
            let mut timestamp_by_block = HashMap::new();
            let mut tx_hashes = Vec::new();

            for raw in &raw_blocks {
                timestamp_by_block.insert(raw.number, raw.timestamp);
                if let Ok(block) = serde_json::from_value::<Block>(raw.payload.clone()) {
                    for tx in block.transactions.as_transactions().unwrap_or_default() {
                        if let Some(hash) = tx.info().hash {
                            tx_hashes.push(hash);
                            tx_by_hash.insert(hash, tx.clone());
                        }
                    }
                }
            }

            let mut receipts = Vec::new();
            for hash in &tx_hashes {
                if let Some(raw) = self.raw_store.get_receipt(*hash).await? {
                    if !raw.status {
                        continue; // failed txs carry no decodable logs worth replaying
                    }
                    if let Ok(receipt) = serde_json::from_value::<TransactionReceipt>(raw.payload) {
                        receipts.push((*hash, receipt));
                    }
                }
            }

            let dispatched = self
                .decode_and_dispatch(&receipts, &tx_by_hash, &timestamp_by_block)
                .await?;
            events_dispatched += dispatched;
            blocks_scanned += raw_blocks.len() as u64;

            {
                let mut state = self.state.lock().await;
                state.end_chunk(ce)?;
            }

            on_progress((blocks_scanned, events_dispatched));
            cs = ce + 1;
        }

        Ok((blocks_scanned, events_dispatched))
    }

    async fn fetch_blocks(&self, start: u64, end: u64) -> Result<Vec<Block>> {
        let numbers: Vec<u64> = (start..=end).collect();
        let fetched = self.fetch_batch(numbers, |provider, n| async move { provider.get_block(n).await }).await?;
        let mut blocks: Vec<Block> = fetched.into_iter().map(|(_, b)| b).collect();
        blocks.sort_by_key(|b| b.header.number);
        Ok(blocks)
    }

    async fn fetch_receipts(&self, hashes: &[TxHash]) -> Result<Vec<(TxHash, TransactionReceipt)>> {
        let groups = hashes.chunks(self.config.max_chunk_scan_size.max(1) as usize);
        let mut all = Vec::new();
        for group in groups {
            let fetched = self
                .fetch_batch(group.to_vec(), |provider, h| async move {
                    provider.get_transaction_receipt(h).await
                })
                .await?;
            all.extend(fetched);
            sleep(Duration::from_secs_f32(self.config.request_interval_sec)).await;
        }
        Ok(all)
    }

    /// Shared bounded-concurrency fetch-with-failover loop used by both the
    /// block and receipt fetch phases. `None` results (not yet mined / not
    /// yet indexed) are retried alongside hard errors; a rate-limit error
    /// triggers provider failover instead of counting against the retry
    /// budget.
    async fn fetch_batch<Id, T, F, Fut>(&self, mut ids: Vec<Id>, fetch_one: F) -> Result<Vec<(Id, T)>>
    where
        Id: Clone + Send + Sync + 'static,
        F: Fn(Arc<Pool>, Id) -> Fut + Send + Sync + Copy + 'static,
        Fut: std::future::Future<Output = Result<Option<T>>> + Send,
        T: Send + 'static,
    {
        let max_concurrency = self.config.max_chunk_scan_size.max(1) as usize;
        let mut results = Vec::new();

        loop {
            if ids.is_empty() {
                break;
            }
            let provider = self.provider.clone();
            let outcomes: Vec<(Id, Result<Option<T>>)> = stream::iter(ids.clone())
                .map(|id| {
                    let provider = provider.clone();
                    async move {
                        let r = fetch_one(provider, id.clone()).await;
                        (id, r)
                    }
                })
                .buffer_unordered(max_concurrency)
                .collect()
                .await;

            let mut next_round = Vec::new();
            for (id, outcome) in outcomes {
                match outcome {
                    Ok(Some(value)) => results.push((id, value)),
                    Ok(None) => next_round.push(id),
                    Err(e) => {
                        if provider::is_rate_limited(&e.to_string()) {
                            self.provider.switch().await?;
                            sleep(Duration::from_millis(500)).await;
                        } else {
                            tracing::debug!(error = %e, "transient fetch failure, will retry");
                        }
                        next_round.push(id);
                    }
                }
            }

            if !next_round.is_empty() {
                sleep(Duration::from_secs_f32(self.config.request_retry_seconds)).await;
            }
            ids = next_round;
        }

        Ok(results)
    }

    async fn decode_and_dispatch(
        &self,
        receipts: &[(TxHash, TransactionReceipt)],
        tx_by_hash: &HashMap<TxHash, Transaction>,
        timestamp_by_block: &HashMap<u64, u64>,
    ) -> Result<u64> {
        let addr_index = self.build_tracked_address_index().await;
        let mut events: Vec<DecodedEvent> = Vec::new();

        for (hash, receipt) in receipts {
            let Some(tx) = tx_by_hash.get(hash) else { continue };
            let block_number = receipt.block_number.unwrap_or_default();
            let timestamp = timestamp_by_block.get(&block_number).copied().unwrap_or_default();

            for contract_name in self.registry.contract_names() {
                let Some(addrs) = addr_index.get(contract_name) else { continue };
                if addrs.is_empty() {
                    continue;
                }
                if self.registry.has_native_transfer_handler(contract_name) {
                    if let Some(to) = tx.to() {
                        if addrs.contains(&to.to_string().to_lowercase()) {
                            events.push(DecodedEvent {
                                contract_name: contract_name.to_string(),
                                event_name: NATIVE_TRANSFER_EVENT.to_string(),
                                block_number,
                                log_index: -1,
                                transaction_hash: *hash,
                                block_timestamp: timestamp,
                                args: serde_json::Map::new(),
                            });
                        }
                    }
                }
            }

            for log in receipt.inner.logs() {
                let emitter = log.address().to_string().to_lowercase();
                for contract_name in self.registry.contract_names() {
                    let Some(addrs) = addr_index.get(contract_name) else { continue };
                    if !addrs.contains(&emitter) {
                        continue;
                    }
                    // An unrecognized topic on a tracked contract is simply
                    // not one of its known events; drop it silently.
                    if let Some(evt) = self.registry.decode(contract_name, log, timestamp) {
                        events.push(evt);
                    }
                    break;
                }
            }
        }

        // Stable sort: synthetic transfers (log_index = -1) precede real
        // logs within the same block, per the ordering guarantee.
        events.sort_by(|a, b| {
            a.block_number
                .cmp(&b.block_number)
                .then(a.log_index.cmp(&b.log_index))
        });

        let mut dispatched = 0u64;
        for event in &events {
            let Some(handler) = self.registry.handler(&event.contract_name, &event.event_name) else {
                self.registry.warn_missing_handler_once(&event.contract_name, &event.event_name);
                continue;
            };
            let receipt = receipts
                .iter()
                .find(|(h, _)| *h == event.transaction_hash)
                .map(|(_, r)| r)
                .expect("dispatched event must originate from one of this chunk's receipts");

            // `new_address_cb` runs synchronously inside the handler, which
            // may be invoked from a current-thread runtime, so it can't
            // block on the async state lock itself. Collect requested
            // registrations here and apply them once `invoke` returns.
            let pending_addresses: std::sync::Mutex<Vec<(String, String)>> = std::sync::Mutex::new(Vec::new());
            let new_address_cb = |contract: &str, addr: &str| {
                pending_addresses.lock().unwrap().push((contract.to_string(), addr.to_string()));
            };

            let ctx = HandlerContext {
                info: EventInfo {
                    event,
                    receipt,
                    fixed_contracts: &self.fixed_contracts,
                    derived: &self.derived_store,
                },
                new_address_cb: &new_address_cb,
            };
            self.registry.invoke(&handler, ctx).await;

            let pending_addresses = pending_addresses.into_inner().unwrap();
            if !pending_addresses.is_empty() {
                let mut state = self.state.lock().await;
                for (contract, addr) in pending_addresses {
                    state.add_address(&contract, &addr);
                }
            }
            dispatched += 1;
        }

        Ok(dispatched)
    }

    async fn build_tracked_address_index(&self) -> HashMap<String, Vec<String>> {
        let state = self.state.lock().await;
        self.registry
            .contract_names()
            .map(|name| {
                let addrs = state
                    .get_addresses(name)
                    .into_iter()
                    .map(|a| a.to_string())
                    .collect();
                (name.to_string(), addrs)
            })
            .collect()
    }
}

fn to_raw_block(block: &Block) -> RawBlockRecord {
    RawBlockRecord {
        number: block.header.number,
        timestamp: block.header.timestamp,
        logs_bloom: HexBytesString(block.header.logs_bloom.as_slice().to_vec()),
        extra_data: ByteString(block.header.extra_data.to_vec()),
        payload: serde_json::to_value(block).unwrap_or(serde_json::Value::Null),
    }
}

fn to_raw_receipt(hash: TxHash, receipt: &TransactionReceipt) -> RawReceiptRecord {
    RawReceiptRecord {
        transaction_hash: hash,
        block_number: receipt.block_number.unwrap_or_default(),
        status: receipt.status(),
        logs_bloom: HexBytesString(receipt.inner.logs_bloom().as_slice().to_vec()),
        payload: serde_json::to_value(receipt).unwrap_or(serde_json::Value::Null),
    }
}
