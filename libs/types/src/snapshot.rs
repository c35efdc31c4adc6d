//! Order-book level snapshots
//!
//! Compact `[price, total_qty]` aggregates broadcast best-effort on
//! `/p2p-exchange/sync/orderbook` and persisted for divergence checks.

use serde::{Deserialize, Serialize};

/// One aggregated price level: `[price, quantity]`, both 18-digit strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookLevel(pub String, pub String);

impl OrderbookLevel {
    pub fn price(&self) -> &str {
        &self.0
    }

    pub fn quantity(&self) -> &str {
        &self.1
    }
}

/// Level-aggregated view of one pair's book at a wall-clock instant.
///
/// Bids are price-descending, asks price-ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderbookSnapshot {
    pub pair: String,
    pub snapshot_at: i64,
    pub bids: Vec<OrderbookLevel>,
    pub asks: Vec<OrderbookLevel>,
}
