//! Trade table operations

use crate::db::{with_retry, Store};
use crate::error::{map_sqlx, StoreError};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use types::numeric::{format_fixed, parse_or_zero};
use types::trade::Trade;

fn row_to_trade(row: &SqliteRow) -> Result<Trade, StoreError> {
    let get_text = |name: &str| -> Result<String, StoreError> {
        let v: Option<String> = row.try_get(name).map_err(map_sqlx)?;
        Ok(v.unwrap_or_default())
    };
    let price: String = row.try_get("price").map_err(map_sqlx)?;
    let amount: String = row.try_get("amount").map_err(map_sqlx)?;

    Ok(Trade {
        trade_id: row.try_get("trade_id").map_err(map_sqlx)?,
        pair: row.try_get("pair").map_err(map_sqlx)?,
        taker_order_id: get_text("taker_order_id")?,
        maker_order_id: get_text("maker_order_id")?,
        maker: get_text("maker")?,
        taker: get_text("taker")?,
        token_in: get_text("token_in")?,
        token_out: get_text("token_out")?,
        amount_in: parse_or_zero(&get_text("amount_in")?),
        amount_out: parse_or_zero(&get_text("amount_out")?),
        price: parse_or_zero(&price),
        amount: parse_or_zero(&amount),
        fee: parse_or_zero(&get_text("fee")?),
        timestamp: row.try_get("timestamp").map_err(map_sqlx)?,
        tx_hash: get_text("tx_hash")?,
    })
}

const INSERT_TRADE_SQL: &str = "INSERT OR REPLACE INTO trades \
    (trade_id, pair, taker_order_id, maker_order_id, maker, taker, token_in, token_out, \
     amount_in, amount_out, price, amount, fee, timestamp, tx_hash) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

fn bind_trade<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    t: &'q Trade,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&t.trade_id)
        .bind(&t.pair)
        .bind(&t.taker_order_id)
        .bind(&t.maker_order_id)
        .bind(&t.maker)
        .bind(&t.taker)
        .bind(&t.token_in)
        .bind(&t.token_out)
        .bind(format_fixed(t.amount_in))
        .bind(format_fixed(t.amount_out))
        .bind(format_fixed(t.price))
        .bind(format_fixed(t.amount))
        .bind(format_fixed(t.fee))
        .bind(t.timestamp)
        .bind(&t.tx_hash)
}

impl Store {
    /// Insert one trade; a duplicate `trade_id` is idempotent success.
    pub async fn insert_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        with_retry("insert_trade", || async {
            bind_trade(sqlx::query(INSERT_TRADE_SQL), trade)
                .execute(self.pool())
                .await
                .map_err(map_sqlx)?;
            Ok(())
        })
        .await
    }

    /// Insert a batch of trades in one committed transaction.
    pub async fn insert_trades(&self, trades: &[Trade]) -> Result<(), StoreError> {
        if trades.is_empty() {
            return Ok(());
        }
        with_retry("insert_trades", || async {
            let mut tx = self.pool().begin().await.map_err(map_sqlx)?;
            for trade in trades {
                bind_trade(sqlx::query(INSERT_TRADE_SQL), trade)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
            }
            tx.commit().await.map_err(map_sqlx)?;
            Ok(())
        })
        .await
    }

    /// Trades with `since <= timestamp <= until`, oldest first (sync replay).
    pub async fn list_trades_asc(
        &self,
        since: i64,
        until: i64,
        limit: usize,
        pair: Option<&str>,
    ) -> Result<Vec<Trade>, StoreError> {
        self.list_trades(since, until, limit, pair, true).await
    }

    /// Trades with `since <= timestamp <= until`, newest first (display).
    pub async fn list_trades_desc(
        &self,
        since: i64,
        until: i64,
        limit: usize,
        pair: Option<&str>,
    ) -> Result<Vec<Trade>, StoreError> {
        self.list_trades(since, until, limit, pair, false).await
    }

    async fn list_trades(
        &self,
        since: i64,
        until: i64,
        limit: usize,
        pair: Option<&str>,
        ascending: bool,
    ) -> Result<Vec<Trade>, StoreError> {
        let limit = if limit == 0 { 1000 } else { limit };
        let mut sql =
            String::from("SELECT * FROM trades WHERE timestamp >= ? AND timestamp <= ?");
        if pair.is_some() {
            sql.push_str(" AND pair = ?");
        }
        sql.push_str(if ascending {
            " ORDER BY timestamp ASC, trade_id ASC LIMIT ?"
        } else {
            " ORDER BY timestamp DESC, trade_id DESC LIMIT ?"
        });

        let mut query = sqlx::query(&sql).bind(since).bind(until);
        if let Some(pair) = pair {
            query = query.bind(pair.to_string());
        }
        let rows = query
            .bind(limit as i64)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(row_to_trade).collect()
    }

    /// Delete trades older than `before_unix` in bounded batches.
    pub async fn delete_trades_before(&self, before_unix: i64) -> Result<u64, StoreError> {
        self.batched_delete("trades", "timestamp", before_unix).await
    }
}
