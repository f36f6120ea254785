//! Shared fixtures for the scanner integration tests: a scanner wired from
//! real components (provider, registry, raw/derived stores, scanner state)
//! plus hand-built JSON-RPC block/receipt/log payloads fed straight into the
//! Raw Store so `replay()` exercises the decode/dispatch path without a live
//! RPC endpoint.

use alloy::primitives::TxHash;
use async_trait::async_trait;
use evm_chain_indexer::derived_store::DerivedStore;
use evm_chain_indexer::monitor::NullSink;
use evm_chain_indexer::provider::Pool;
use evm_chain_indexer::raw_store::{RawBlockRecord, RawReceiptRecord, RawStore};
use evm_chain_indexer::registry::{EventRegistry, Handler, HandlerContext};
use evm_chain_indexer::scanner::{BlockScanner, ScannerConfig};
use evm_chain_indexer::scanner_state::ScannerState;
use evm_chain_indexer::types::ContractAddress;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

pub const CONTRACT_ADDR: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const CHILD_ADDR: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const SENDER_ADDR: &str = "0xcccccccccccccccccccccccccccccccccccccccc";
pub const TRANSFER_TOPIC0: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub const TRANSFER_ABI: &str = r#"[
    {
        "anonymous": false,
        "inputs": [
            {"indexed": true, "name": "from", "type": "address"},
            {"indexed": true, "name": "to", "type": "address"},
            {"indexed": false, "name": "value", "type": "uint256"}
        ],
        "name": "Transfer",
        "type": "event"
    }
]"#;

/// 32-byte hex value, last byte set to `seed` so fixtures can mint distinct
/// hashes without a real hash function.
pub fn h256(seed: u8) -> String {
    format!("0x{}{:02x}", "0".repeat(62), seed)
}

/// Left-pads a 20-byte address into a 32-byte indexed-topic value.
pub fn addr_topic(addr: &str) -> String {
    format!("0x{}{}", "0".repeat(24), &addr[2..])
}

fn write_abi(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(format!("{name}.json")), content).unwrap();
}

/// One full transaction object, targeting `to`, embeddable in a block JSON.
pub fn tx_json(tx_hash: &str, block_hash: &str, block_number: u64, to: &str) -> serde_json::Value {
    json!({
        "hash": tx_hash,
        "nonce": "0x0",
        "blockHash": block_hash,
        "blockNumber": format!("0x{block_number:x}"),
        "transactionIndex": "0x0",
        "from": SENDER_ADDR,
        "to": to,
        "value": "0xde0b6b3a7640000",
        "gasPrice": "0x3b9aca00",
        "gas": "0x5208",
        "input": "0x",
        "v": "0x1b",
        "r": h256(10),
        "s": h256(11),
        "type": "0x0",
        "chainId": "0x1",
    })
}

/// A full `eth_getBlockByNumber` payload carrying `transactions`.
pub fn block_json(
    block_number: u64,
    block_hash: &str,
    timestamp: u64,
    transactions: Vec<serde_json::Value>,
) -> serde_json::Value {
    json!({
        "number": format!("0x{block_number:x}"),
        "hash": block_hash,
        "parentHash": h256(0),
        "nonce": "0x0000000000000000",
        "sha3Uncles": "0x1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d4934",
        "logsBloom": format!("0x{}", "00".repeat(256)),
        "transactionsRoot": h256(1),
        "stateRoot": h256(2),
        "receiptsRoot": h256(3),
        "miner": "0x0000000000000000000000000000000000000000",
        "difficulty": "0x0",
        "totalDifficulty": "0x0",
        "extraData": "0x",
        "size": "0x200",
        "gasLimit": "0x1c9c380",
        "gasUsed": "0x5208",
        "timestamp": format!("0x{timestamp:x}"),
        "transactions": transactions,
        "uncles": [],
        "baseFeePerGas": "0x3b9aca00",
        "mixHash": h256(4),
    })
}

/// A log entry on a receipt, emitted by `address` with `topics`/`data`.
pub fn log_json(
    address: &str,
    topics: Vec<String>,
    data: &str,
    tx_hash: &str,
    block_hash: &str,
    block_number: u64,
    log_index: u64,
) -> serde_json::Value {
    json!({
        "address": address,
        "topics": topics,
        "data": data,
        "blockNumber": format!("0x{block_number:x}"),
        "transactionHash": tx_hash,
        "transactionIndex": "0x0",
        "blockHash": block_hash,
        "logIndex": format!("0x{log_index:x}"),
        "removed": false,
    })
}

/// A full, successful `eth_getTransactionReceipt` payload carrying `logs`.
pub fn receipt_json(
    tx_hash: &str,
    block_hash: &str,
    block_number: u64,
    to: &str,
    logs: Vec<serde_json::Value>,
) -> serde_json::Value {
    json!({
        "transactionHash": tx_hash,
        "transactionIndex": "0x0",
        "blockHash": block_hash,
        "blockNumber": format!("0x{block_number:x}"),
        "from": SENDER_ADDR,
        "to": to,
        "cumulativeGasUsed": "0x5208",
        "gasUsed": "0x5208",
        "contractAddress": serde_json::Value::Null,
        "logs": logs,
        "logsBloom": format!("0x{}", "00".repeat(256)),
        "status": "0x1",
        "type": "0x0",
        "effectiveGasPrice": "0x3b9aca00",
    })
}

/// Writes one block (with its transaction) plus its receipt straight into
/// the Raw Store, exactly as `scan()` would have, so `replay()` can pick it
/// up without ever contacting an RPC endpoint.
pub async fn seed_block_with_tx(
    raw_store: &RawStore,
    block_number: u64,
    timestamp: u64,
    tx_hash: &str,
    to: &str,
    logs: Vec<serde_json::Value>,
) {
    let block_hash = h256(block_number as u8);
    let tx = tx_json(tx_hash, &block_hash, block_number, to);
    let block = block_json(block_number, &block_hash, timestamp, vec![tx]);
    raw_store
        .put_block(&RawBlockRecord {
            number: block_number,
            timestamp,
            logs_bloom: Default::default(),
            extra_data: Default::default(),
            payload: block,
        })
        .await
        .unwrap();

    let receipt = receipt_json(tx_hash, &block_hash, block_number, to, logs);
    raw_store
        .put_receipt(&RawReceiptRecord {
            transaction_hash: tx_hash.parse::<TxHash>().unwrap(),
            block_number,
            status: true,
            logs_bloom: Default::default(),
            payload: receipt,
        })
        .await
        .unwrap();
}

/// A handler that just records every invocation it sees, in dispatch order.
#[derive(Default)]
pub struct RecordingHandler {
    pub calls: Mutex<Vec<(String, i64)>>,
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> evm_chain_indexer::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((ctx.info.event.event_name.clone(), ctx.info.event.log_index));
        Ok(())
    }
}

/// A handler that registers `CHILD_ADDR` under its own contract name every
/// time it runs, exercising the dynamic-address-registration path.
#[derive(Default)]
pub struct AddressRegisteringHandler {
    pub calls: Mutex<Vec<(String, i64)>>,
}

#[async_trait]
impl Handler for AddressRegisteringHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> evm_chain_indexer::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((ctx.info.event.event_name.clone(), ctx.info.event.log_index));
        (ctx.new_address_cb)(&ctx.info.event.contract_name, CHILD_ADDR);
        Ok(())
    }
}

/// Builds a scanner wired to a fresh on-disk registry/raw/derived store
/// triple, with `handlers` registered before the registry is frozen behind
/// the `Arc` the scanner holds.
pub async fn build_scanner(
    dir: &Path,
    abi_name: &str,
    abi: &str,
    tracked: Vec<(&str, &str)>,
    handlers: Vec<(&str, &str, Arc<dyn Handler>)>,
) -> (BlockScanner, Arc<RawStore>) {
    write_abi(dir, abi_name, abi);
    let monitor = Arc::new(NullSink);
    let provider = Arc::new(
        Pool::new(vec!["http://127.0.0.1:9".to_string()], monitor.clone())
            .await
            .unwrap(),
    );

    let mut registry = EventRegistry::load(dir, monitor.clone()).unwrap();
    for (contract, event, handler) in handlers {
        registry.register_handler(contract, event, handler);
    }
    let registry = Arc::new(registry);

    let raw_store = Arc::new(RawStore::connect(&format!("{}", dir.join("raw.db").display())).await.unwrap());
    let derived_store = Arc::new(DerivedStore::connect(&format!("{}", dir.join("derived.db").display())).await.unwrap());

    let mut seed_addresses: HashMap<String, HashSet<ContractAddress>> = HashMap::new();
    for (contract, addr) in tracked {
        seed_addresses
            .entry(contract.to_string())
            .or_default()
            .insert(ContractAddress::new(addr).unwrap());
    }
    let state = Arc::new(AsyncMutex::new(ScannerState::new(
        dir.join("cache-state.json"),
        1,
        seed_addresses,
    )));

    let scanner = BlockScanner::new(
        provider,
        registry,
        raw_store.clone(),
        derived_store,
        state,
        Default::default(),
        monitor,
        ScannerConfig {
            max_chunk_scan_size: 10,
            request_interval_sec: 0.0,
            request_retry_seconds: 0.0,
        },
        Arc::new(AtomicBool::new(false)),
    );

    (scanner, raw_store)
}
