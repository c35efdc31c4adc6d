//! Order table operations

use crate::db::{with_retry, Store};
use crate::error::{map_sqlx, StoreError};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use types::numeric::{format_fixed, parse_or_zero};
use types::order::{Order, OrderStatus, Side};

fn row_to_order(row: &SqliteRow) -> Result<Order, StoreError> {
    let side: String = row.try_get("side").map_err(map_sqlx)?;
    let side = match side.as_str() {
        "buy" => Side::Buy,
        "sell" => Side::Sell,
        other => return Err(StoreError::Corrupt(format!("unknown order side: {other}"))),
    };
    let status: String = row.try_get("status").map_err(map_sqlx)?;
    let status = status
        .parse::<OrderStatus>()
        .map_err(|_| StoreError::Corrupt(format!("unknown order status: {status}")))?;

    let price: String = row.try_get("price").map_err(map_sqlx)?;
    let amount: String = row.try_get("amount").map_err(map_sqlx)?;
    let filled: Option<String> = row.try_get("filled").map_err(map_sqlx)?;
    let signature: Option<String> = row.try_get("signature").map_err(map_sqlx)?;

    Ok(Order {
        order_id: row.try_get("order_id").map_err(map_sqlx)?,
        trader: row.try_get("trader").map_err(map_sqlx)?,
        pair: row.try_get("pair").map_err(map_sqlx)?,
        side,
        price: parse_or_zero(&price),
        amount: parse_or_zero(&amount),
        filled: filled.as_deref().map(parse_or_zero).unwrap_or_default(),
        status,
        nonce: row.try_get("nonce").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        expires_at: row.try_get("expires_at").map_err(map_sqlx)?,
        signature: signature.unwrap_or_default(),
    })
}

impl Store {
    /// Insert or replace an order row keyed by `order_id`.
    pub async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        with_retry("insert_order", || async {
            sqlx::query(
                "INSERT OR REPLACE INTO orders \
                 (order_id, trader, pair, side, price, amount, filled, status, nonce, created_at, expires_at, signature) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&order.order_id)
            .bind(&order.trader)
            .bind(&order.pair)
            .bind(order.side.as_str())
            .bind(format_fixed(order.price))
            .bind(format_fixed(order.amount))
            .bind(format_fixed(order.filled))
            .bind(order.status.as_str())
            .bind(order.nonce)
            .bind(order.created_at)
            .bind(order.expires_at)
            .bind(&order.signature)
            .execute(self.pool())
            .await
            .map_err(map_sqlx)?;
            Ok(())
        })
        .await
    }

    /// Update status and filled amount; a missing row is a no-op.
    pub async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        filled: Decimal,
    ) -> Result<(), StoreError> {
        with_retry("update_order_status", || async {
            sqlx::query("UPDATE orders SET status = ?, filled = ? WHERE order_id = ?")
                .bind(status.as_str())
                .bind(format_fixed(filled))
                .bind(order_id)
                .execute(self.pool())
                .await
                .map_err(map_sqlx)?;
            Ok(())
        })
        .await
    }

    /// Fetch one order by id; `None` when absent.
    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT * FROM orders WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(row_to_order).transpose()
    }

    /// Open/partial orders for one pair, split by side and sorted price-time:
    /// bids price-descending, asks price-ascending, ties by `created_at`.
    pub async fn list_orders_open_by_pair(
        &self,
        pair: &str,
        limit: usize,
    ) -> Result<(Vec<Order>, Vec<Order>), StoreError> {
        let limit = if limit == 0 { 200 } else { limit };
        let rows = sqlx::query(
            "SELECT * FROM orders \
             WHERE pair = ? AND status IN ('open', 'partial') \
             ORDER BY created_at ASC LIMIT ?",
        )
        .bind(pair)
        .bind((limit * 2) as i64)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx)?;

        let mut bids = Vec::new();
        let mut asks = Vec::new();
        for row in &rows {
            let order = row_to_order(row)?;
            match order.side {
                Side::Buy => bids.push(order),
                Side::Sell => asks.push(order),
            }
        }
        bids.sort_by(|a, b| {
            b.price
                .cmp(&a.price)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        asks.sort_by(|a, b| {
            a.price
                .cmp(&b.price)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        bids.truncate(limit);
        asks.truncate(limit);
        Ok((bids, asks))
    }

    /// Orders filtered by trader and/or pair, newest first.
    pub async fn list_orders_by_trader(
        &self,
        trader: Option<&str>,
        pair: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Order>, StoreError> {
        let limit = if limit == 0 { 100 } else { limit };
        let mut sql = String::from("SELECT * FROM orders WHERE 1=1");
        if trader.is_some() {
            sql.push_str(" AND trader = ?");
        }
        if pair.is_some() {
            sql.push_str(" AND pair = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(trader) = trader {
            query = query.bind(trader.to_string());
        }
        if let Some(pair) = pair {
            query = query.bind(pair.to_string());
        }
        let rows = query
            .bind(limit as i64)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(row_to_order).collect()
    }

    /// Pairs that currently have at least one open or partial order.
    pub async fn list_pairs_with_open_orders(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT pair FROM orders WHERE status IN ('open', 'partial') ORDER BY pair",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("pair").map_err(map_sqlx))
            .collect()
    }

    /// Delete orders created before `before_unix` in bounded batches.
    /// Returns the number of rows removed.
    pub async fn delete_orders_before(&self, before_unix: i64) -> Result<u64, StoreError> {
        self.batched_delete("orders", "created_at", before_unix).await
    }
}
