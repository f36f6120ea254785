//! Type-safe wrappers for blockchain primitives
//!
//! This module provides newtype wrappers around primitive types to prevent
//! mixing up different kinds of data and enable compile-time type checking.

use crate::error::{IndexerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Contract address (checksummed hex string with 0x prefix), normalized to
/// lowercase so it can be used as a map key without a custom Eq impl.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContractAddress(String);

impl ContractAddress {
    /// Create from string, validating format and normalizing to lowercase
    pub fn new(address: impl Into<String>) -> Result<Self> {
        let addr = address.into();

        if !addr.starts_with("0x") {
            return Err(IndexerError::Config(format!(
                "invalid address '{addr}': must start with 0x"
            )));
        }

        if addr.len() != 42 {
            return Err(IndexerError::Config(format!(
                "invalid address '{}': must be 42 characters (0x + 40 hex chars), got {}",
                addr,
                addr.len()
            )));
        }

        if !addr[2..].chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IndexerError::Config(format!(
                "invalid address '{addr}': contains non-hex characters"
            )));
        }

        Ok(Self(addr.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContractAddress {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Block number on chain. `i64` because the scanner cursor needs a value one
/// below the genesis block (`-1`) to represent "nothing scanned yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    pub fn new(block: u64) -> Self {
        Self(block)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BlockNumber {
    fn from(block: u64) -> Self {
        Self(block)
    }
}

impl From<BlockNumber> for u64 {
    fn from(block: BlockNumber) -> Self {
        block.0
    }
}
