//! Resumable EVM chain indexer: scanning and event-dispatch engine.
//!
//! Walks a chain block-by-block, fetches transactions/receipts, decodes
//! contract events against a registry of known ABIs, dispatches them to
//! per-event handlers, and persists enough raw data (blocks, receipts) to
//! re-derive the derived store without re-contacting the RPC endpoint.

pub mod cli;
pub mod codec;
pub mod config;
pub mod derived_store;
pub mod error;
pub mod monitor;
pub mod provider;
pub mod raw_store;
pub mod registry;
pub mod retry;
pub mod scanner;
pub mod scanner_state;
pub mod supervisor;
pub mod types;

pub use config::AppConfig;
pub use error::{IndexerError, Result};
pub use retry::RetryConfig;
pub use types::{BlockNumber, ContractAddress};
