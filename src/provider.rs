//! RPC Client Adapter and Provider Failover.
//!
//! Exposes exactly the three calls the canonical per-block scanner needs:
//! `block_number`, `get_block`, `get_transaction_receipt`. There is
//! deliberately no `get_logs` — that belongs to the obsolete scanner variant
//! this crate does not implement.

use crate::error::{IndexerError, Result};
use crate::monitor::MonitorSink;
use alloy::primitives::TxHash;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Block, BlockTransactionsKind, TransactionReceipt};
use alloy::transports::http::{Client, Http};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

type HttpProvider = RootProvider<Http<Client>>;

/// An ordered pool of RPC endpoints with failover on rate limiting.
///
/// `current_index` and the live `client` are independently guarded: readers
/// of the client only ever clone a `RootProvider`, which is cheap and does
/// not hold the lock across an `.await`.
pub struct Pool {
    endpoints: Vec<String>,
    current_index: AtomicUsize,
    client: RwLock<HttpProvider>,
    monitor: Arc<dyn MonitorSink>,
}

impl Pool {
    pub async fn new(endpoints: Vec<String>, monitor: Arc<dyn MonitorSink>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(IndexerError::Config(
                "sync_cfg.chain_api must list at least one endpoint".into(),
            ));
        }
        let client = build_client(&endpoints[0])?;
        Ok(Self {
            endpoints,
            current_index: AtomicUsize::new(0),
            client: RwLock::new(client),
            monitor,
        })
    }

    fn current_url(&self) -> &str {
        let idx = self.current_index.load(Ordering::SeqCst);
        &self.endpoints[idx]
    }

    /// Rotate to the next endpoint, rebuild the client, and notify the
    /// monitor sink. Non-blocking from callers' perspective: in-flight
    /// requests against the old client simply error and get retried by the
    /// outer fetch loop against the freshly swapped-in client.
    pub async fn switch(&self) -> Result<()> {
        let n = self.endpoints.len();
        let next = (self.current_index.load(Ordering::SeqCst) + 1) % n;
        self.current_index.store(next, Ordering::SeqCst);
        let url = self.endpoints[next].clone();
        let new_client = build_client(&url)?;
        *self.client.write().await = new_client;
        tracing::warn!(endpoint = %url, "switched RPC provider");
        self.monitor
            .notify(&format!("provider failover: switched to {url}"))
            .await;
        Ok(())
    }

    async fn client(&self) -> HttpProvider {
        self.client.read().await.clone()
    }

    pub async fn block_number(&self) -> Result<u64> {
        self.client()
            .await
            .get_block_number()
            .await
            .map_err(|e| IndexerError::Rpc(e.to_string()))
    }

    pub async fn get_block(&self, number: u64) -> Result<Option<Block>> {
        self.client()
            .await
            .get_block_by_number(number.into(), BlockTransactionsKind::Full)
            .await
            .map_err(|e| IndexerError::Rpc(e.to_string()))
    }

    pub async fn get_transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>> {
        self.client()
            .await
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| IndexerError::Rpc(e.to_string()))
    }

    #[cfg(test)]
    pub fn current_endpoint(&self) -> &str {
        self.current_url()
    }
}

fn build_client(url: &str) -> Result<HttpProvider> {
    let parsed = url
        .parse()
        .map_err(|e| IndexerError::Config(format!("invalid RPC url '{url}': {e}")))?;
    Ok(ProviderBuilder::new().on_http(parsed))
}

/// Classifies an RPC error string as rate-limiting (HTTP 429), which per the
/// error-handling policy triggers provider failover rather than a same-
/// endpoint backoff retry.
pub fn is_rate_limited(err: &str) -> bool {
    err.contains("429") || err.contains("Too Many Requests")
}
