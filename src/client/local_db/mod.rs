//! # Durable Store
//!
//! Key-value persistence for queue records, split into two independent
//! namespaces: one for sync operations and one for analysis jobs. Each
//! namespace is a `key -> record` map with get/set/remove/keys that survives
//! process restarts.
//!
//! ## Key Components
//!
//! - [`DurableStore`]: the storage capability the queue depends on
//! - [`SqliteStore`]: SQLite implementation (WAL mode, one table)
//! - [`MemoryStore`]: in-process implementation for tests and ephemeral queues
//! - [`Records`]: typed JSON adapter over one namespace
//!
//! ## Usage
//!
//! ```rust,no_run
//! use syncq::client::local_db::{DurableStore, Namespace, SqliteStore};
//!
//! # async fn example() -> Result<(), syncq::shared::StoreError> {
//! let store = SqliteStore::open("/tmp/syncq/queue.db").await?;
//! store.set(Namespace::Operations, "op-1", "{}").await?;
//! assert_eq!(store.keys(Namespace::Operations).await?, vec!["op-1".to_string()]);
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod records;
pub mod schema;

pub use memory::MemoryStore;
pub use records::Records;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::path::Path;

use crate::shared::error::StoreError;

/// Result type for durable store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Logical partition of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Sync operation records
    Operations,
    /// Analysis job records
    Jobs,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Operations => "sync_operations",
            Namespace::Jobs => "analysis_jobs",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key-value capability
///
/// Values are JSON text. Implementations must keep namespaces fully
/// independent: the same key in two namespaces names two records.
#[async_trait]
pub trait DurableStore: Send + Sync + fmt::Debug {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<String>>;

    /// Insert or replace a record
    async fn set(&self, namespace: Namespace, key: &str, value: &str) -> Result<()>;

    /// Remove a record; returns whether it existed
    async fn remove(&self, namespace: Namespace, key: &str) -> Result<bool>;

    async fn keys(&self, namespace: Namespace) -> Result<Vec<String>>;

    /// All values in a namespace
    async fn values(&self, namespace: Namespace) -> Result<Vec<String>> {
        let mut values = Vec::new();
        for key in self.keys(namespace).await? {
            if let Some(value) = self.get(namespace, &key).await? {
                values.push(value);
            }
        }
        Ok(values)
    }
}

/// SQLite-backed durable store
///
/// Manages the connection pool and the `kv_records` table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create the database file at `path`
    ///
    /// Creates parent directories when needed and initializes the schema.
    /// Uses WAL mode for better concurrency.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        sqlx::query("PRAGMA temp_store=MEMORY").execute(&pool).await?;

        tracing::info!("[Store] Opened SQLite store at {}", path.display());
        Self::with_pool(pool).await
    }

    /// Private in-memory database, useful for tests
    pub async fn in_memory() -> Result<Self> {
        // Every connection to `sqlite::memory:` is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and run pending migrations
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(schema::MIGRATIONS_TABLE)
            .execute(&self.pool)
            .await?;

        let current_version: (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;

        for migration in schema::pending(current_version.0) {
            tracing::debug!(
                "[Store] Applying migration {} ({})",
                migration.version,
                migration.description
            );
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(migration.version)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        Ok(())
    }

    /// Connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record counts per namespace, for debugging
    pub async fn get_stats(&self) -> Result<StoreStats> {
        let operations: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM kv_records WHERE namespace = ?")
                .bind(Namespace::Operations.as_str())
                .fetch_one(&self.pool)
                .await?;
        let jobs: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv_records WHERE namespace = ?")
            .bind(Namespace::Jobs.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            operation_records: operations.0 as u64,
            job_records: jobs.0 as u64,
        })
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_records WHERE namespace = ? AND key = ?")
            .bind(namespace.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn set(&self, namespace: Namespace, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO kv_records (namespace, key, value, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(namespace.as_str())
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv_records WHERE namespace = ? AND key = ?")
            .bind(namespace.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self, namespace: Namespace) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM kv_records WHERE namespace = ? ORDER BY key")
            .bind(namespace.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get("key").map_err(StoreError::from))
            .collect()
    }

    async fn values(&self, namespace: Namespace) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT value FROM kv_records WHERE namespace = ? ORDER BY key")
            .bind(namespace.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get("value").map_err(StoreError::from))
            .collect()
    }
}

/// Store statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Records in the operations namespace
    pub operation_records: u64,
    /// Records in the jobs namespace
    pub job_records: u64,
}
