//! Retention sweeps
//!
//! A background task deletes rows that fell out of the retention window:
//! two weeks when `retention_months <= 0`, otherwise `months * 30` days.
//! Deletes run in bounded batches with a yield in between so the writer
//! never holds the database for long.

use crate::db::Store;
use crate::error::{map_sqlx, StoreError};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{info, warn};

/// Retention when `retention_months <= 0`.
pub const RETENTION_DAYS_TWO_WEEKS: i64 = 14;

/// Rows removed per delete statement.
const DELETE_BATCH_SIZE: i64 = 1000;

/// Deleted-row threshold above which the sweep compacts the file.
const VACUUM_THRESHOLD: u64 = 1000;

/// Sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Width of the retention window in seconds.
pub fn retention_window_secs(retention_months: i64) -> i64 {
    if retention_months <= 0 {
        RETENTION_DAYS_TWO_WEEKS * 24 * 3600
    } else {
        retention_months * 30 * 24 * 3600
    }
}

/// Clamp `[since, until]` to `[now - window, now]`.
pub fn clamp_to_retention(
    since: i64,
    until: i64,
    now: i64,
    retention_months: i64,
) -> (i64, i64) {
    let cutoff = now - retention_window_secs(retention_months);
    (since.max(cutoff), until.min(now))
}

impl Store {
    /// Delete rows of `table` whose `ts_column` precedes `before`, at most
    /// [`DELETE_BATCH_SIZE`] per statement, yielding between batches.
    pub(crate) async fn batched_delete(
        &self,
        table: &str,
        ts_column: &str,
        before: i64,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            "DELETE FROM {table} WHERE rowid IN \
             (SELECT rowid FROM {table} WHERE {ts_column} < ? LIMIT {DELETE_BATCH_SIZE})"
        );
        let mut total = 0u64;
        loop {
            let deleted = sqlx::query(&sql)
                .bind(before)
                .execute(self.pool())
                .await
                .map_err(map_sqlx)?
                .rows_affected();
            total += deleted;
            if deleted < DELETE_BATCH_SIZE as u64 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(total)
    }

    /// One full retention pass over all three tables at wall-clock `now`.
    /// Returns the total number of rows removed.
    pub async fn sweep_retention(
        &self,
        retention_months: i64,
        now: i64,
    ) -> Result<u64, StoreError> {
        let before = now - retention_window_secs(retention_months);
        let size_before = self.db_size().await.unwrap_or(0);

        let trades = self.delete_trades_before(before).await?;
        let snapshots = self.delete_snapshots_before(before).await?;
        let orders = self.delete_orders_before(before).await?;
        let total = trades + snapshots + orders;

        if total > 0 {
            info!(trades, snapshots, orders, cutoff = before, "retention sweep removed rows");
        }
        if total > VACUUM_THRESHOLD {
            self.vacuum().await?;
            let size_after = self.db_size().await.unwrap_or(size_before);
            info!(
                freed_bytes = size_before.saturating_sub(size_after),
                "retention vacuum complete"
            );
        }
        Ok(total)
    }
}

/// Long-lived sweeper: one pass every 24 h until shutdown fires.
pub async fn run_retention(
    store: Arc<Store>,
    retention_months: i64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The immediate first tick would sweep at startup; skip it.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = unix_now();
                if let Err(e) = store.sweep_retention(retention_months, now).await {
                    warn!(error = %e, "retention sweep failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use types::trade::Trade;

    fn trade(id: &str, ts: i64) -> Trade {
        Trade {
            trade_id: id.into(),
            pair: "TKA/TKB".into(),
            taker_order_id: String::new(),
            maker_order_id: String::new(),
            maker: String::new(),
            taker: String::new(),
            token_in: String::new(),
            token_out: String::new(),
            amount_in: Decimal::ZERO,
            amount_out: Decimal::ZERO,
            price: dec!(1),
            amount: dec!(1),
            fee: Decimal::ZERO,
            timestamp: ts,
            tx_hash: String::new(),
        }
    }

    #[test]
    fn test_window_secs() {
        assert_eq!(retention_window_secs(0), 14 * 24 * 3600);
        assert_eq!(retention_window_secs(-3), 14 * 24 * 3600);
        assert_eq!(retention_window_secs(2), 60 * 24 * 3600);
    }

    #[test]
    fn test_clamp_to_retention() {
        let now = 1_000_000;
        let window = retention_window_secs(0);
        let (since, until) = clamp_to_retention(0, now + 500, now, 0);
        assert_eq!(since, now - window);
        assert_eq!(until, now);

        // Range already inside the window passes through.
        let (since, until) = clamp_to_retention(now - 100, now - 10, now, 0);
        assert_eq!((since, until), (now - 100, now - 10));
    }

    #[tokio::test]
    async fn test_sweep_removes_row_older_than_two_weeks() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path()).await.unwrap();

        let now = 100 * 24 * 3600;
        let fifteen_days_ago = now - 15 * 24 * 3600;
        let yesterday = now - 24 * 3600;
        store.insert_trade(&trade("old", fifteen_days_ago)).await.unwrap();
        store.insert_trade(&trade("fresh", yesterday)).await.unwrap();

        let removed = store.sweep_retention(0, now).await.unwrap();
        assert_eq!(removed, 1);

        let left = store.list_trades_asc(0, now, 10, None).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].trade_id, "fresh");
    }

    #[tokio::test]
    async fn test_sweep_spans_all_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path()).await.unwrap();
        let now = 100 * 24 * 3600;
        let old = now - 20 * 24 * 3600;

        store.insert_trade(&trade("t-old", old)).await.unwrap();
        store
            .insert_snapshot(&types::snapshot::OrderbookSnapshot {
                pair: "TKA/TKB".into(),
                snapshot_at: old,
                bids: vec![],
                asks: vec![],
            })
            .await
            .unwrap();

        let removed = store.sweep_retention(0, now).await.unwrap();
        assert_eq!(removed, 2);
    }
}
