//! Trade types
//!
//! A trade is produced synchronously inside a match, published on
//! `/p2p-exchange/trade/executed`, persisted, and never mutated afterwards.

use crate::numeric::decimal_str;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An executed fill between one maker and one taker.
///
/// `trade_id` is deterministic (`takerOrderId-makerOrderId-seq`), `price` is
/// always the maker's price, and `token_in`/`token_out` are the pair's two
/// token addresses oriented by the taker side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub trade_id: String,
    pub pair: String,
    #[serde(default)]
    pub taker_order_id: String,
    #[serde(default)]
    pub maker_order_id: String,
    #[serde(default)]
    pub maker: String,
    #[serde(default)]
    pub taker: String,
    #[serde(default)]
    pub token_in: String,
    #[serde(default)]
    pub token_out: String,
    #[serde(default, with = "decimal_str")]
    pub amount_in: Decimal,
    #[serde(default, with = "decimal_str")]
    pub amount_out: Decimal,
    #[serde(with = "decimal_str")]
    pub price: Decimal,
    #[serde(with = "decimal_str")]
    pub amount: Decimal,
    #[serde(default, with = "decimal_str", skip_serializing_if = "is_zero")]
    pub fee: Decimal,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tx_hash: String,
}

fn is_zero(d: &Decimal) -> bool {
    d.is_zero()
}

/// Build the deterministic trade id for the `seq`-th fill of a taker against
/// a maker (`seq` starts at 1 within a single match call).
pub fn trade_id(taker_order_id: &str, maker_order_id: &str, seq: u32) -> String {
    format!("{taker_order_id}-{maker_order_id}-{seq}")
}
