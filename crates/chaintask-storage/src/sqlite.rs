//! SQLite store backend.
//!
//! Persists crosscheck cache entries, checkpoints and task records to a single
//! SQLite file so a restarted process resumes from where it left off.
//! TTLs are stored as absolute expiry timestamps (unix millis); expired rows
//! are invisible to reads and purged lazily.
//!
//! # Usage
//! ```rust,no_run
//! use chaintask_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./chaintask.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chaintask_core::error::ChainTaskError;
use chaintask_core::store::{pattern_matches, Store};

fn storage_err(e: sqlx::Error) -> ChainTaskError {
    ChainTaskError::Storage(e.to_string())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// SQLite-backed key-value store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chaintask.db"`) or a full
    /// SQLite URL (`"sqlite:./chaintask.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, ChainTaskError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema(true).await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Uses a single connection, since every `:memory:` connection is its own
    /// database. All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, ChainTaskError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema(false).await?;
        Ok(store)
    }

    async fn init_schema(&self, wal: bool) -> Result<(), ChainTaskError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key        TEXT    NOT NULL PRIMARY KEY,
                value      TEXT    NOT NULL,
                expires_at INTEGER
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv (expires_at);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    /// Delete every expired row. Returns the number of rows removed.
    pub async fn purge_expired(&self) -> Result<u64, ChainTaskError> {
        let res = sqlx::query("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now_ms())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        let removed = res.rows_affected();
        if removed > 0 {
            debug!(removed, "purged expired rows");
        }
        Ok(removed)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, ChainTaskError> {
        let row = sqlx::query(
            "SELECT value FROM kv WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_ms())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some(r) => {
                let raw: String = r.get("value");
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), ChainTaskError> {
        let raw = serde_json::to_string(&value)?;
        let expires_at = ttl.map(|d| now_ms() + d.as_millis() as i64);

        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value      = excluded.value,
                expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(&raw)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), ChainTaskError> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>, ChainTaskError> {
        let prefix = pattern.map(|p| p.strip_suffix('*').unwrap_or(p)).unwrap_or("");

        let rows = sqlx::query(
            "SELECT key FROM kv
             WHERE substr(key, 1, ?) = ? AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY key",
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .bind(now_ms())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows
            .into_iter()
            .map(|r| r.get::<String, _>("key"))
            .filter(|k| pattern.map_or(true, |p| pattern_matches(p, k)))
            .collect())
    }
}
