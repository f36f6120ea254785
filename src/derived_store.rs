//! Derived Store: domain document collections written only by handlers.
//!
//! The core treats this store's schema as entirely opaque — it owns the
//! connection and exposes only dual-backend SQL execution, never a typed
//! schema. Concrete handler bodies (out of scope for this crate) issue
//! whatever DDL/DML they need through it.

use crate::error::{IndexerError, Result};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Executor, PgPool, SqlitePool};
use std::str::FromStr;

enum DbPool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

pub struct DerivedStore {
    pool: DbPool,
}

impl DerivedStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
            DbPool::Postgres(PgPool::connect(database_url).await.map_err(IndexerError::Database)?)
        } else {
            let opts = SqliteConnectOptions::from_str(database_url)
                .map_err(|e| IndexerError::Config(format!("invalid sqlite path '{database_url}': {e}")))?
                .create_if_missing(true);
            DbPool::Sqlite(SqlitePool::connect_with(opts).await.map_err(IndexerError::Database)?)
        };
        Ok(Self { pool })
    }

    /// Run an arbitrary statement (DDL or DML) against whichever backend is
    /// live. Handlers are expected to write dialect-neutral SQL or branch on
    /// `is_postgres()` themselves, mirroring the Raw Store's own pattern.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        match &self.pool {
            DbPool::Sqlite(pool) => {
                pool.execute(sql).await.map_err(IndexerError::Database)?;
            }
            DbPool::Postgres(pool) => {
                pool.execute(sql).await.map_err(IndexerError::Database)?;
            }
        }
        Ok(())
    }

    pub fn is_postgres(&self) -> bool {
        matches!(self.pool, DbPool::Postgres(_))
    }

    /// Wipes every row from every table the handlers have created. Used by
    /// the Supervisor's Fresh/Replay reset steps. Since the schema is
    /// handler-defined, this drops and lets handlers recreate on next write
    /// rather than attempting table-by-table truncation.
    pub async fn drop_all(&self) -> Result<()> {
        match &self.pool {
            DbPool::Sqlite(pool) => {
                let tables: Vec<(String,)> = sqlx::query_as(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%'",
                )
                .fetch_all(pool)
                .await
                .map_err(IndexerError::Database)?;
                for (table,) in tables {
                    sqlx::query(&format!("DROP TABLE IF EXISTS \"{table}\""))
                        .execute(pool)
                        .await
                        .map_err(IndexerError::Database)?;
                }
            }
            DbPool::Postgres(pool) => {
                let tables: Vec<(String,)> = sqlx::query_as(
                    "SELECT tablename FROM pg_tables WHERE schemaname = 'public' AND tablename NOT LIKE '_sqlx_%'",
                )
                .fetch_all(pool)
                .await
                .map_err(IndexerError::Database)?;
                for (table,) in tables {
                    sqlx::query(&format!("DROP TABLE IF EXISTS \"{table}\" CASCADE"))
                        .execute(pool)
                        .await
                        .map_err(IndexerError::Database)?;
                }
            }
        }
        Ok(())
    }
}
