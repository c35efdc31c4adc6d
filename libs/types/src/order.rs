//! Order lifecycle types
//!
//! An order is minted and signed by an external client, ingested over gossip,
//! and held in the in-memory book while open or partial. The wire message is
//! immutable; the book only ever holds copies.

use crate::numeric::decimal_str;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (bid or ask).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side an order of this side trades against.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Order status.
///
/// `Cancelled` is terminal; `Filled` holds exactly when `filled == amount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Partial,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Partial => "partial",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(OrderStatus::Open),
            "partial" => Ok(OrderStatus::Partial),
            "filled" => Ok(OrderStatus::Filled),
            "cancelled" => Ok(OrderStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// A signed limit order as it travels on the `/p2p-exchange/order/new` topic.
///
/// Invariants: `0 <= filled <= amount`; `expires_at == 0` means "never
/// expires"; `nonce` is monotonic per trader and used for replay gating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    #[serde(default)]
    pub trader: String,
    pub pair: String,
    pub side: Side,
    #[serde(with = "decimal_str")]
    pub price: Decimal,
    #[serde(with = "decimal_str")]
    pub amount: Decimal,
    #[serde(default, with = "decimal_str")]
    pub filled: Decimal,
    pub status: OrderStatus,
    #[serde(default)]
    pub nonce: i64,
    pub created_at: i64,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

impl Order {
    /// Whether the order has lapsed at unix-seconds `now`.
    ///
    /// `expires_at == 0` never expires; the `expires_at == now` boundary
    /// counts as expired.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at > 0 && now >= self.expires_at
    }

    /// Unfilled remainder, floored at zero.
    pub fn remaining(&self) -> Decimal {
        let left = self.amount - self.filled;
        if left < Decimal::ZERO {
            Decimal::ZERO
        } else {
            left
        }
    }

    /// Ingest-time shape check: identity fields present, positive economics.
    pub fn has_required_fields(&self) -> bool {
        !self.order_id.is_empty()
            && !self.pair.is_empty()
            && self.price > Decimal::ZERO
            && self.amount > Decimal::ZERO
    }
}
