//! Database handle and schema
//!
//! A single SQLite file (`{data_dir}/storage.db`) behind one connection
//! pool. SQLite serializes writes; reads run concurrently. WAL and
//! `synchronous=NORMAL` match the durability contract.

use crate::error::{map_sqlx, StoreError};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const TRADES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS trades (
    trade_id TEXT PRIMARY KEY,
    pair TEXT NOT NULL,
    taker_order_id TEXT,
    maker_order_id TEXT,
    maker TEXT,
    taker TEXT,
    token_in TEXT,
    token_out TEXT,
    amount_in TEXT,
    amount_out TEXT,
    price TEXT NOT NULL,
    amount TEXT NOT NULL,
    fee TEXT,
    timestamp INTEGER NOT NULL,
    tx_hash TEXT
);
CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);
CREATE INDEX IF NOT EXISTS idx_trades_pair ON trades(pair);
";

const ORDERS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS orders (
    order_id TEXT PRIMARY KEY,
    trader TEXT NOT NULL,
    pair TEXT NOT NULL,
    side TEXT NOT NULL,
    price TEXT NOT NULL,
    amount TEXT NOT NULL,
    filled TEXT NOT NULL DEFAULT '0',
    status TEXT NOT NULL,
    nonce INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    signature TEXT
);
CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at);
CREATE INDEX IF NOT EXISTS idx_orders_pair ON orders(pair);
";

const SNAPSHOTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS orderbook_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pair TEXT NOT NULL,
    snapshot_at INTEGER NOT NULL,
    bids TEXT NOT NULL,
    asks TEXT NOT NULL,
    UNIQUE(pair, snapshot_at)
);
CREATE INDEX IF NOT EXISTS idx_orderbook_pair_snapshot
    ON orderbook_snapshots(pair, snapshot_at);
";

/// Attempts made for a transiently failing operation before giving up.
const MAX_RETRIES: u32 = 5;

/// The store. Cheap to clone-by-`Arc`; all operations take `&self`.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open or create `{data_dir}/storage.db` and apply the schema.
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| StoreError::TransientIo(format!("create data dir: {e}")))?;
        let path = data_dir.join("storage.db");

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(map_sqlx)?;

        let store = Self { pool };
        for schema in [TRADES_SCHEMA, ORDERS_SCHEMA, SNAPSHOTS_SCHEMA] {
            for statement in schema.split(';').filter(|s| !s.trim().is_empty()) {
                sqlx::query(statement)
                    .execute(&store.pool)
                    .await
                    .map_err(map_sqlx)?;
            }
        }
        Ok(store)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Flush and close the pool. Pending acquires fail afterwards.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Database footprint in bytes (page_count * page_size).
    pub async fn db_size(&self) -> Result<i64, StoreError> {
        let page_count: i64 = sqlx::query("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?
            .try_get(0)
            .map_err(map_sqlx)?;
        let page_size: i64 = sqlx::query("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?
            .try_get(0)
            .map_err(map_sqlx)?;
        Ok(page_count * page_size)
    }

    /// Reclaim space after large deletes.
    pub async fn vacuum(&self) -> Result<(), StoreError> {
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

/// Run `op`, retrying `TransientIo` failures with exponential backoff
/// (capped at [`MAX_RETRIES`] attempts). Other error kinds pass through.
pub(crate) async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut delay = Duration::from_millis(50);
    for attempt in 1..=MAX_RETRIES {
        match op().await {
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                warn!(op = op_name, attempt, error = %e, "transient store error, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            other => return other,
        }
    }
    unreachable!("retry loop always returns")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_open_creates_database_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path()).await.unwrap();
        assert!(tmp.path().join("storage.db").exists());
        assert!(store.db_size().await.unwrap() > 0);
        store.close().await;
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path()).await.unwrap();
        store.close().await;
        let store = Store::open(tmp.path()).await.unwrap();
        store.close().await;
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, StoreError> = with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::TransientIo("busy".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_cap() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::TransientIo("busy".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_constraint() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::ConstraintViolation("dup".into())) }
        })
        .await;
        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
