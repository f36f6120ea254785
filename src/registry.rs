//! Event Registry: loads ABI files from a directory, indexes events by their
//! log topic, and holds the `(contract_name, event_name) -> Handler` table.
//!
//! ABI JSON is parsed at runtime with `alloy_json_abi::JsonAbi` rather than
//! the compile-time `sol!` macro: the set of contracts is only known once the
//! ABI directory is read, so the decoders have to be built dynamically too,
//! via `alloy_dyn_abi`.

use crate::derived_store::DerivedStore;
use crate::error::{IndexerError, Result};
use crate::monitor::MonitorSink;
use crate::types::ContractAddress;
use alloy::primitives::{B256, TxHash};
use alloy::rpc::types::{Log, TransactionReceipt};
use alloy_dyn_abi::EventExt;
use alloy_json_abi::{Event, JsonAbi};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Name reserved for the synthetic native-value-transfer pseudo-event.
pub const NATIVE_TRANSFER_EVENT: &str = "_transfer";

/// A single decoded (or synthesized) event ready for dispatch.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub contract_name: String,
    pub event_name: String,
    pub block_number: u64,
    /// `-1` for the synthetic native-transfer pseudo-event.
    pub log_index: i64,
    pub transaction_hash: TxHash,
    pub block_timestamp: u64,
    pub args: Map<String, Value>,
}

/// Everything a handler needs to act on one dispatched event.
pub struct EventInfo<'a> {
    pub event: &'a DecodedEvent,
    pub receipt: &'a TransactionReceipt,
    pub fixed_contracts: &'a HashMap<String, ContractAddress>,
    pub derived: &'a DerivedStore,
}

/// Callback handlers use to register a newly discovered address for tracking
/// under a given contract name, starting with the *next* chunk. Passed as an
/// explicit field rather than injected via a decorator (see design notes).
pub type NewAddressCb<'a> = &'a (dyn Fn(&str, &str) + Send + Sync + 'a);

pub struct HandlerContext<'a> {
    pub info: EventInfo<'a>,
    pub new_address_cb: NewAddressCb<'a>,
}

/// The plug-in boundary. Concrete handler bodies that build domain entities
/// are an application-specific surface and out of scope for this crate;
/// what belongs here is the dispatch contract itself.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()>;
}

/// One contract's loaded ABI plus its topic -> event name index.
pub struct ContractBinding {
    pub name: String,
    abi: JsonAbi,
    topic_to_event: HashMap<B256, String>,
}

impl ContractBinding {
    fn load(name: String, abi: JsonAbi) -> Result<Self> {
        let mut topic_to_event = HashMap::new();
        for event in abi.events() {
            let topic = event.selector();
            if let Some(existing) = topic_to_event.insert(topic, event.name.to_string()) {
                return Err(IndexerError::Contract(format!(
                    "contract '{name}': events '{existing}' and '{}' share topic {topic}",
                    event.name
                )));
            }
        }
        Ok(Self {
            name,
            abi,
            topic_to_event,
        })
    }

    fn event_by_name(&self, event_name: &str) -> Option<&Event> {
        self.abi.events().find(|e| e.name == event_name)
    }

    /// Decode a raw log against this contract's ABI. Returns `None` when the
    /// leading topic is not a known event — the caller silently drops it.
    fn decode(&self, log: &Log, block_timestamp: u64) -> Option<DecodedEvent> {
        let topic0 = log.topics().first()?;
        let event_name = self.topic_to_event.get(topic0)?;
        let event_abi = self.event_by_name(event_name)?;

        let decoded = event_abi
            .decode_log_parts(log.topics().iter().copied(), &log.inner.data.data, false)
            .ok()?;

        let mut args = Map::new();
        for (input, value) in event_abi.inputs.iter().zip(
            decoded
                .indexed
                .iter()
                .chain(decoded.body.iter()),
        ) {
            args.insert(input.name.clone(), dyn_sol_value_to_json(value));
        }

        Some(DecodedEvent {
            contract_name: self.name.clone(),
            event_name: event_name.clone(),
            block_number: log.block_number?,
            log_index: log.log_index? as i64,
            transaction_hash: log.transaction_hash?,
            block_timestamp,
            args,
        })
    }
}

fn dyn_sol_value_to_json(value: &alloy_dyn_abi::DynSolValue) -> Value {
    use alloy_dyn_abi::DynSolValue::*;
    match value {
        Bool(b) => Value::Bool(*b),
        Int(i, _) => Value::String(i.to_string()),
        Uint(u, _) => Value::String(u.to_string()),
        FixedBytes(b, size) => Value::String(format!("0x{}", hex::encode(&b[..*size]))),
        Address(a) => Value::String(a.to_string()),
        Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
        String(s) => Value::String(s.clone()),
        Array(items) | FixedArray(items) | Tuple(items) => {
            Value::Array(items.iter().map(dyn_sol_value_to_json).collect())
        }
        other => Value::String(format!("{other:?}")),
    }
}

/// Loads ABIs and holds the handler registration table. Built once at
/// startup and treated as read-mostly thereafter (see concurrency model).
pub struct EventRegistry {
    contracts: HashMap<String, ContractBinding>,
    handlers: HashMap<(String, String), Arc<dyn Handler>>,
    monitor: Arc<dyn MonitorSink>,
    warned_missing: std::sync::Mutex<std::collections::HashSet<(String, String)>>,
}

impl EventRegistry {
    /// Enumerate `*.json` ABI files from `abi_dir`; each file name (sans
    /// extension) becomes a `contract_name`.
    pub fn load(abi_dir: &Path, monitor: Arc<dyn MonitorSink>) -> Result<Self> {
        let mut contracts = HashMap::new();

        let entries = std::fs::read_dir(abi_dir).map_err(IndexerError::Io)?;
        for entry in entries {
            let entry = entry.map_err(IndexerError::Io)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contract_name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| IndexerError::Config(format!("unreadable ABI file name: {path:?}")))?
                .to_string();

            let raw = std::fs::read_to_string(&path).map_err(IndexerError::Io)?;
            let abi: JsonAbi = serde_json::from_str(&raw)
                .map_err(|e| IndexerError::Contract(format!("{contract_name}: {e}")))?;

            let binding = ContractBinding::load(contract_name.clone(), abi)?;
            contracts.insert(contract_name, binding);
        }

        Ok(Self {
            contracts,
            handlers: HashMap::new(),
            monitor,
            warned_missing: std::sync::Mutex::new(std::collections::HashSet::new()),
        })
    }

    /// Register `handler` for `(contract_name, event_name)`. An explicit
    /// table built at startup rather than discovered via reflection.
    pub fn register_handler(
        &mut self,
        contract_name: impl Into<String>,
        event_name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) {
        self.handlers
            .insert((contract_name.into(), event_name.into()), handler);
    }

    pub fn contract_names(&self) -> impl Iterator<Item = &str> {
        self.contracts.keys().map(|s| s.as_str())
    }

    pub fn has_native_transfer_handler(&self, contract_name: &str) -> bool {
        self.handlers
            .contains_key(&(contract_name.to_string(), NATIVE_TRANSFER_EVENT.to_string()))
    }

    pub fn decode(&self, contract_name: &str, log: &Log, block_timestamp: u64) -> Option<DecodedEvent> {
        self.contracts.get(contract_name)?.decode(log, block_timestamp)
    }

    pub fn handler(&self, contract_name: &str, event_name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .get(&(contract_name.to_string(), event_name.to_string()))
            .cloned()
    }

    /// Invoke `handler`, logging and swallowing any error per the "log and
    /// continue" policy — a handler failure never aborts the chunk.
    pub async fn invoke(&self, handler: &Arc<dyn Handler>, ctx: HandlerContext<'_>) {
        let contract = ctx.info.event.contract_name.clone();
        let event_name = ctx.info.event.event_name.clone();
        if let Err(e) = handler.handle(&ctx).await {
            tracing::error!(contract = %contract, event = %event_name, error = %e, "handler failed");
            self.monitor
                .notify(&format!("handler failed for {contract}.{event_name}: {e}"))
                .await;
        }
    }

    /// Warn exactly once per `(contract_name, event_name)` that decoded but
    /// has no registered handler.
    pub fn warn_missing_handler_once(&self, contract_name: &str, event_name: &str) {
        let key = (contract_name.to_string(), event_name.to_string());
        let mut seen = self.warned_missing.lock().unwrap();
        if seen.insert(key) {
            tracing::warn!(contract = contract_name, event = event_name, "no handler registered for decoded event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TRANSFER_ABI: &str = r#"[
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

    fn write_abi(dir: &Path, name: &str, content: &str) {
        let mut f = std::fs::File::create(dir.join(format!("{name}.json"))).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_indexes_topics_per_contract() {
        let dir = tempfile::tempdir().unwrap();
        write_abi(dir.path(), "Token", TRANSFER_ABI);

        let registry = EventRegistry::load(dir.path(), Arc::new(crate::monitor::NullSink)).unwrap();
        let names: Vec<_> = registry.contract_names().collect();
        assert_eq!(names, vec!["Token"]);
    }

    #[test]
    fn test_missing_handler_warns_once() {
        let dir = tempfile::tempdir().unwrap();
        write_abi(dir.path(), "Token", TRANSFER_ABI);
        let registry = EventRegistry::load(dir.path(), Arc::new(crate::monitor::NullSink)).unwrap();
        registry.warn_missing_handler_once("Token", "Transfer");
        registry.warn_missing_handler_once("Token", "Transfer");
        assert_eq!(registry.warned_missing.lock().unwrap().len(), 1);
    }
}
