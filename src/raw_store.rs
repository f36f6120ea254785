//! Raw Store: durable, idempotent persistence for fetched blocks and
//! receipts. Dual-backend via `sqlx`, selected by inspecting the connection
//! string scheme.

use crate::codec::{ByteString, HexBytesString};
use crate::error::{IndexerError, Result};
use alloy::primitives::TxHash;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{PgPool, SqlitePool};
use std::str::FromStr;

/// Persisted form of a fetched block. `payload` carries the full block
/// (including transactions) as serialized by `alloy`'s own serde impls;
/// `logs_bloom`/`extra_data` are additionally carried through the
/// `BYTE__`/`HEXB__` codec to exercise the lossless encoding the raw store
/// is required to provide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBlockRecord {
    pub number: u64,
    pub timestamp: u64,
    pub logs_bloom: HexBytesString,
    pub extra_data: ByteString,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReceiptRecord {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub status: bool,
    pub logs_bloom: HexBytesString,
    pub payload: Value,
}

/// One row of `_sqlx_migrations`, surfaced as a diagnostic query only — not
/// consulted anywhere in the scan/dispatch path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationInfo {
    pub version: String,
    pub description: String,
    pub installed_on: String,
}

enum DbPool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

pub struct RawStore {
    pool: DbPool,
}

impl RawStore {
    /// Connect, auto-detecting the backend from the connection string:
    /// `postgres://`/`postgresql://` selects Postgres, anything else is
    /// treated as a SQLite file path (created if missing).
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
            let pool = PgPool::connect(database_url)
                .await
                .map_err(IndexerError::Database)?;
            DbPool::Postgres(pool)
        } else {
            let opts = SqliteConnectOptions::from_str(database_url)
                .map_err(|e| IndexerError::Config(format!("invalid sqlite path '{database_url}': {e}")))?
                .create_if_missing(true);
            let pool = SqlitePool::connect_with(opts)
                .await
                .map_err(IndexerError::Database)?;
            DbPool::Sqlite(pool)
        };

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        match &self.pool {
            DbPool::Sqlite(pool) => sqlx::migrate!("./migrations")
                .run(pool)
                .await
                .map_err(|e| IndexerError::Database(sqlx::Error::Migrate(Box::new(e))))?,
            DbPool::Postgres(pool) => sqlx::migrate!("./migrations_postgres")
                .run(pool)
                .await
                .map_err(|e| IndexerError::Database(sqlx::Error::Migrate(Box::new(e))))?,
        }
        Ok(())
    }

    /// Idempotent insert: a block already present is a no-op (property 2,
    /// §8 — running a live scan twice leaves the Raw Store unchanged).
    pub async fn put_block(&self, block: &RawBlockRecord) -> Result<()> {
        let number = block.number as i64;
        let timestamp = block.timestamp as i64;
        let logs_bloom = serde_json::to_string(&block.logs_bloom)?;
        let extra_data = serde_json::to_string(&block.extra_data)?;
        let payload = serde_json::to_string(&block.payload)?;

        match &self.pool {
            DbPool::Sqlite(pool) => {
                sqlx::query(
                    "INSERT OR IGNORE INTO raw_blocks (number, timestamp, logs_bloom, extra_data, payload) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(number)
                .bind(timestamp)
                .bind(logs_bloom)
                .bind(extra_data)
                .bind(payload)
                .execute(pool)
                .await
                .map_err(IndexerError::Database)?;
            }
            DbPool::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO raw_blocks (number, timestamp, logs_bloom, extra_data, payload) VALUES ($1, $2, $3, $4, $5::jsonb) ON CONFLICT (number) DO NOTHING",
                )
                .bind(number)
                .bind(timestamp)
                .bind(logs_bloom)
                .bind(extra_data)
                .bind(payload)
                .execute(pool)
                .await
                .map_err(IndexerError::Database)?;
            }
        }
        Ok(())
    }

    pub async fn put_receipt(&self, receipt: &RawReceiptRecord) -> Result<()> {
        let tx_hash = receipt.transaction_hash.to_string();
        let block_number = receipt.block_number as i64;
        let status = receipt.status as i32;
        let logs_bloom = serde_json::to_string(&receipt.logs_bloom)?;
        let payload = serde_json::to_string(&receipt.payload)?;

        match &self.pool {
            DbPool::Sqlite(pool) => {
                sqlx::query(
                    "INSERT OR IGNORE INTO raw_receipts (transaction_hash, block_number, status, logs_bloom, payload) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(tx_hash)
                .bind(block_number)
                .bind(status)
                .bind(logs_bloom)
                .bind(payload)
                .execute(pool)
                .await
                .map_err(IndexerError::Database)?;
            }
            DbPool::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO raw_receipts (transaction_hash, block_number, status, logs_bloom, payload) VALUES ($1, $2, $3, $4, $5::jsonb) ON CONFLICT (transaction_hash) DO NOTHING",
                )
                .bind(tx_hash)
                .bind(block_number)
                .bind(status)
                .bind(logs_bloom)
                .bind(payload)
                .execute(pool)
                .await
                .map_err(IndexerError::Database)?;
            }
        }
        Ok(())
    }

    pub async fn count_blocks(&self) -> Result<i64> {
        match &self.pool {
            DbPool::Sqlite(pool) => {
                let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM raw_blocks")
                    .fetch_one(pool)
                    .await
                    .map_err(IndexerError::Database)?;
                Ok(row.0)
            }
            DbPool::Postgres(pool) => {
                let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM raw_blocks")
                    .fetch_one(pool)
                    .await
                    .map_err(IndexerError::Database)?;
                Ok(row.0)
            }
        }
    }

    /// Reorg-recovery hook: not invoked in normal operation (the shallow
    /// safety margin suffices), but kept for the admin reset surface the
    /// Supervisor drives.
    pub async fn delete_blocks_from(&self, number: u64) -> Result<()> {
        let number = number as i64;
        match &self.pool {
            DbPool::Sqlite(pool) => {
                sqlx::query("DELETE FROM raw_blocks WHERE number > ?")
                    .bind(number)
                    .execute(pool)
                    .await
                    .map_err(IndexerError::Database)?;
            }
            DbPool::Postgres(pool) => {
                sqlx::query("DELETE FROM raw_blocks WHERE number > $1")
                    .bind(number)
                    .execute(pool)
                    .await
                    .map_err(IndexerError::Database)?;
            }
        }
        Ok(())
    }

    pub async fn drop_all(&self) -> Result<()> {
        match &self.pool {
            DbPool::Sqlite(pool) => {
                sqlx::query("DELETE FROM raw_blocks").execute(pool).await.map_err(IndexerError::Database)?;
                sqlx::query("DELETE FROM raw_receipts").execute(pool).await.map_err(IndexerError::Database)?;
            }
            DbPool::Postgres(pool) => {
                sqlx::query("DELETE FROM raw_blocks").execute(pool).await.map_err(IndexerError::Database)?;
                sqlx::query("DELETE FROM raw_receipts").execute(pool).await.map_err(IndexerError::Database)?;
            }
        }
        Ok(())
    }

    /// Blocks in ascending key order, used by the replay scan.
    pub async fn blocks_in_range(&self, start: u64, end: u64) -> Result<Vec<RawBlockRecord>> {
        let rows: Vec<(i64, i64, String, String, String)> = match &self.pool {
            DbPool::Sqlite(pool) => sqlx::query_as(
                "SELECT number, timestamp, logs_bloom, extra_data, payload FROM raw_blocks WHERE number >= ? AND number <= ? ORDER BY number ASC",
            )
            .bind(start as i64)
            .bind(end as i64)
            .fetch_all(pool)
            .await
            .map_err(IndexerError::Database)?,
            DbPool::Postgres(pool) => sqlx::query_as(
                "SELECT number, timestamp, logs_bloom, extra_data, payload::text FROM raw_blocks WHERE number >= $1 AND number <= $2 ORDER BY number ASC",
            )
            .bind(start as i64)
            .bind(end as i64)
            .fetch_all(pool)
            .await
            .map_err(IndexerError::Database)?,
        };

        rows.into_iter()
            .map(|(number, timestamp, logs_bloom, extra_data, payload)| {
                Ok(RawBlockRecord {
                    number: number as u64,
                    timestamp: timestamp as u64,
                    logs_bloom: serde_json::from_str(&logs_bloom)?,
                    extra_data: serde_json::from_str(&extra_data)?,
                    payload: serde_json::from_str(&payload)?,
                })
            })
            .collect()
    }

    /// Digest of a chunk's receipt set, used only as a cache key for
    /// `is_chunk_cached`/`cache_chunk` — an optimization, never a source of
    /// truth. Order-sensitive by design: a chunk whose receipts arrived in a
    /// different order is treated as a cache miss.
    pub fn chunk_digest(tx_hashes: &[TxHash]) -> String {
        let mut hasher = Sha256::new();
        for hash in tx_hashes {
            hasher.update(hash.as_slice());
        }
        hex::encode(hasher.finalize())
    }

    /// True if `(contract_scope, from_block, to_block)` was already recorded
    /// with this exact digest — a skip-already-processed-range hint for
    /// replay/incremental re-runs. Dropping this table forces re-decoding,
    /// never re-corrupts derived state (see ChunkCacheEntry, SPEC §3.1).
    pub async fn is_chunk_cached(
        &self,
        contract_scope: &str,
        from_block: u64,
        to_block: u64,
        digest: &str,
    ) -> Result<bool> {
        let row: Option<(String,)> = match &self.pool {
            DbPool::Sqlite(pool) => sqlx::query_as(
                "SELECT digest FROM chunk_cache WHERE contract_scope = ? AND from_block = ? AND to_block = ?",
            )
            .bind(contract_scope)
            .bind(from_block as i64)
            .bind(to_block as i64)
            .fetch_optional(pool)
            .await
            .map_err(IndexerError::Database)?,
            DbPool::Postgres(pool) => sqlx::query_as(
                "SELECT digest FROM chunk_cache WHERE contract_scope = $1 AND from_block = $2 AND to_block = $3",
            )
            .bind(contract_scope)
            .bind(from_block as i64)
            .bind(to_block as i64)
            .fetch_optional(pool)
            .await
            .map_err(IndexerError::Database)?,
        };
        Ok(row.is_some_and(|(stored,)| stored == digest))
    }

    pub async fn cache_chunk(&self, contract_scope: &str, from_block: u64, to_block: u64, digest: &str) -> Result<()> {
        match &self.pool {
            DbPool::Sqlite(pool) => {
                sqlx::query(
                    "INSERT OR REPLACE INTO chunk_cache (contract_scope, from_block, to_block, digest) VALUES (?, ?, ?, ?)",
                )
                .bind(contract_scope)
                .bind(from_block as i64)
                .bind(to_block as i64)
                .bind(digest)
                .execute(pool)
                .await
                .map_err(IndexerError::Database)?;
            }
            DbPool::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO chunk_cache (contract_scope, from_block, to_block, digest) VALUES ($1, $2, $3, $4)
                     ON CONFLICT (contract_scope, from_block, to_block) DO UPDATE SET digest = excluded.digest",
                )
                .bind(contract_scope)
                .bind(from_block as i64)
                .bind(to_block as i64)
                .bind(digest)
                .execute(pool)
                .await
                .map_err(IndexerError::Database)?;
            }
        }
        Ok(())
    }

    /// Which schema migrations have run, in version order. A diagnostic
    /// surface only.
    pub async fn migration_status(&self) -> Result<Vec<MigrationInfo>> {
        match &self.pool {
            DbPool::Sqlite(pool) => {
                let rows: Vec<(String, String, String)> = sqlx::query_as(
                    "SELECT CAST(version AS TEXT), description, CAST(installed_on AS TEXT) FROM _sqlx_migrations ORDER BY version",
                )
                .fetch_all(pool)
                .await
                .map_err(IndexerError::Database)?;
                Ok(rows
                    .into_iter()
                    .map(|(version, description, installed_on)| MigrationInfo {
                        version,
                        description,
                        installed_on,
                    })
                    .collect())
            }
            DbPool::Postgres(pool) => {
                let rows: Vec<(i64, String, String)> = sqlx::query_as(
                    "SELECT version, description, to_char(installed_on, 'YYYY-MM-DD HH24:MI:SS') FROM _sqlx_migrations ORDER BY version",
                )
                .fetch_all(pool)
                .await
                .map_err(IndexerError::Database)?;
                Ok(rows
                    .into_iter()
                    .map(|(version, description, installed_on)| MigrationInfo {
                        version: version.to_string(),
                        description,
                        installed_on,
                    })
                    .collect())
            }
        }
    }

    pub async fn get_receipt(&self, tx_hash: TxHash) -> Result<Option<RawReceiptRecord>> {
        let hash_str = tx_hash.to_string();
        let row: Option<(String, i64, i32, String, String)> = match &self.pool {
            DbPool::Sqlite(pool) => sqlx::query_as(
                "SELECT transaction_hash, block_number, status, logs_bloom, payload FROM raw_receipts WHERE transaction_hash = ?",
            )
            .bind(&hash_str)
            .fetch_optional(pool)
            .await
            .map_err(IndexerError::Database)?,
            DbPool::Postgres(pool) => sqlx::query_as(
                "SELECT transaction_hash, block_number, status, logs_bloom, payload::text FROM raw_receipts WHERE transaction_hash = $1",
            )
            .bind(&hash_str)
            .fetch_optional(pool)
            .await
            .map_err(IndexerError::Database)?,
        };

        row.map(|(transaction_hash, block_number, status, logs_bloom, payload)| {
            Ok(RawReceiptRecord {
                transaction_hash: transaction_hash.parse().map_err(|e| {
                    IndexerError::Parse(format!("stored tx hash '{transaction_hash}' is invalid: {e}"))
                })?,
                block_number: block_number as u64,
                status: status != 0,
                logs_bloom: serde_json::from_str(&logs_bloom)?,
                payload: serde_json::from_str(&payload)?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> RawStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.db");
        // keep the tempdir alive for the duration of the store by leaking it
        // inside the test process — acceptable for short-lived unit tests.
        std::mem::forget(dir);
        RawStore::connect(&format!("{}", path.display())).await.unwrap()
    }

    #[tokio::test]
    async fn test_migration_status_reports_applied_migration() {
        let store = test_store().await;
        let status = store.migration_status().await.unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].version, "1");
    }

    #[tokio::test]
    async fn test_put_block_is_idempotent() {
        let store = test_store().await;
        let block = RawBlockRecord {
            number: 100,
            timestamp: 1_700_000_000,
            logs_bloom: HexBytesString(vec![0; 256]),
            extra_data: ByteString(vec![]),
            payload: serde_json::json!({"number": "0x64"}),
        };

        store.put_block(&block).await.unwrap();
        store.put_block(&block).await.unwrap();

        assert_eq!(store.count_blocks().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blocks_in_range_ordered() {
        let store = test_store().await;
        for n in [102u64, 100, 101] {
            store
                .put_block(&RawBlockRecord {
                    number: n,
                    timestamp: n,
                    logs_bloom: HexBytesString(vec![0; 256]),
                    extra_data: ByteString(vec![]),
                    payload: serde_json::json!({}),
                })
                .await
                .unwrap();
        }

        let blocks = store.blocks_in_range(100, 102).await.unwrap();
        let numbers: Vec<_> = blocks.iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![100, 101, 102]);
    }

    #[tokio::test]
    async fn test_chunk_cache_hit_and_miss() {
        let store = test_store().await;
        let digest = RawStore::chunk_digest(&[TxHash::from([1u8; 32]), TxHash::from([2u8; 32])]);

        assert!(!store.is_chunk_cached("Token", 1, 100, &digest).await.unwrap());

        store.cache_chunk("Token", 1, 100, &digest).await.unwrap();
        assert!(store.is_chunk_cached("Token", 1, 100, &digest).await.unwrap());

        let other_digest = RawStore::chunk_digest(&[TxHash::from([3u8; 32])]);
        assert!(!store.is_chunk_cached("Token", 1, 100, &other_digest).await.unwrap());
    }
}
