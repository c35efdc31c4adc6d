//! Order-book snapshot table operations
//!
//! Level arrays are stored as JSON text; `(pair, snapshot_at)` is unique so
//! repeated broadcasts of the same instant collapse into one row.

use crate::db::{with_retry, Store};
use crate::error::{map_sqlx, StoreError};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use types::snapshot::{OrderbookLevel, OrderbookSnapshot};

fn row_to_snapshot(row: &SqliteRow) -> Result<OrderbookSnapshot, StoreError> {
    let bids: String = row.try_get("bids").map_err(map_sqlx)?;
    let asks: String = row.try_get("asks").map_err(map_sqlx)?;
    let bids: Vec<OrderbookLevel> =
        serde_json::from_str(&bids).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let asks: Vec<OrderbookLevel> =
        serde_json::from_str(&asks).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(OrderbookSnapshot {
        pair: row.try_get("pair").map_err(map_sqlx)?,
        snapshot_at: row.try_get("snapshot_at").map_err(map_sqlx)?,
        bids,
        asks,
    })
}

impl Store {
    /// Insert or replace a snapshot for `(pair, snapshot_at)`.
    pub async fn insert_snapshot(&self, snapshot: &OrderbookSnapshot) -> Result<(), StoreError> {
        let bids = serde_json::to_string(&snapshot.bids)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let asks = serde_json::to_string(&snapshot.asks)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        with_retry("insert_snapshot", || async {
            sqlx::query(
                "INSERT OR REPLACE INTO orderbook_snapshots (pair, snapshot_at, bids, asks) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&snapshot.pair)
            .bind(snapshot.snapshot_at)
            .bind(&bids)
            .bind(&asks)
            .execute(self.pool())
            .await
            .map_err(map_sqlx)?;
            Ok(())
        })
        .await
    }

    /// Most recent snapshot for a pair.
    pub async fn latest_snapshot(
        &self,
        pair: &str,
    ) -> Result<Option<OrderbookSnapshot>, StoreError> {
        let row = sqlx::query(
            "SELECT pair, snapshot_at, bids, asks FROM orderbook_snapshots \
             WHERE pair = ? ORDER BY snapshot_at DESC LIMIT 1",
        )
        .bind(pair)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx)?;
        row.as_ref().map(row_to_snapshot).transpose()
    }

    /// Snapshots for a pair within `[since, until]`, oldest first.
    pub async fn list_snapshots(
        &self,
        pair: &str,
        since: i64,
        until: i64,
        limit: usize,
    ) -> Result<Vec<OrderbookSnapshot>, StoreError> {
        let limit = if limit == 0 { 100 } else { limit };
        let rows = sqlx::query(
            "SELECT pair, snapshot_at, bids, asks FROM orderbook_snapshots \
             WHERE pair = ? AND snapshot_at >= ? AND snapshot_at <= ? \
             ORDER BY snapshot_at ASC LIMIT ?",
        )
        .bind(pair)
        .bind(since)
        .bind(until)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(row_to_snapshot).collect()
    }

    /// Delete snapshots older than `before_unix` in bounded batches.
    pub async fn delete_snapshots_before(&self, before_unix: i64) -> Result<u64, StoreError> {
        self.batched_delete("orderbook_snapshots", "snapshot_at", before_unix)
            .await
    }
}
