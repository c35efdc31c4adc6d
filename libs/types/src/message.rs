//! Gossip topics and the ingress message sum type
//!
//! Incoming payloads are externally untyped JSON; each topic gets a typed
//! parse and the subscribers dispatch on the resulting [`IngressMessage`].

use crate::order::Order;
use crate::snapshot::OrderbookSnapshot;
use crate::trade::Trade;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TOPIC_ORDER_NEW: &str = "/p2p-exchange/order/new";
pub const TOPIC_ORDER_CANCEL: &str = "/p2p-exchange/order/cancel";
pub const TOPIC_TRADE_EXECUTED: &str = "/p2p-exchange/trade/executed";
pub const TOPIC_SYNC_ORDERBOOK: &str = "/p2p-exchange/sync/orderbook";
pub const TOPIC_MATCH_REGISTER: &str = "/p2p-exchange/match/register";
/// Pair-scoped forwarded-order topics hang off this prefix.
pub const TOPIC_MATCH_ORDER_PREFIX: &str = "/p2p-exchange/match/order";

/// Stream protocol id for historical trade pulls.
pub const PROTOCOL_SYNC_TRADES: &str = "/p2p-exchange/sync/trades/1.0.0";

/// Topic an order forwarded to `pair`'s owning node travels on.
///
/// The transport has no wildcard subscriptions, so owners subscribe to one
/// such topic per configured pair.
pub fn match_order_topic(pair: &str) -> String {
    format!("{TOPIC_MATCH_ORDER_PREFIX}/{pair}")
}

/// Cancellation request on `/p2p-exchange/order/cancel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub order_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timestamp: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Registry heartbeat on `/p2p-exchange/match/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchNodeRegistration {
    pub peer_id: String,
    pub pairs: Vec<String>,
    pub capacity: u64,
    pub timestamp: i64,
}

/// A payload failed its per-topic parse.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("malformed payload on {topic}: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Every message shape that can arrive over gossip, one variant per topic.
#[derive(Debug, Clone, PartialEq)]
pub enum IngressMessage {
    NewOrder(Order),
    Cancel(CancelRequest),
    Trade(Trade),
    Snapshot(OrderbookSnapshot),
    Registration(MatchNodeRegistration),
    /// An order republished on a pair-scoped `/match/order/{pair}` topic.
    ForwardedOrder { pair: String, order: Order },
}

impl IngressMessage {
    /// Parse `data` according to `topic`'s wire schema.
    pub fn parse(topic: &str, data: &[u8]) -> Result<Self, MessageError> {
        let malformed = |source| MessageError::Malformed {
            topic: topic.to_string(),
            source,
        };
        match topic {
            TOPIC_ORDER_NEW => serde_json::from_slice(data)
                .map(IngressMessage::NewOrder)
                .map_err(malformed),
            TOPIC_ORDER_CANCEL => serde_json::from_slice(data)
                .map(IngressMessage::Cancel)
                .map_err(malformed),
            TOPIC_TRADE_EXECUTED => serde_json::from_slice(data)
                .map(IngressMessage::Trade)
                .map_err(malformed),
            TOPIC_SYNC_ORDERBOOK => serde_json::from_slice(data)
                .map(IngressMessage::Snapshot)
                .map_err(malformed),
            TOPIC_MATCH_REGISTER => serde_json::from_slice(data)
                .map(IngressMessage::Registration)
                .map_err(malformed),
            other => match other.strip_prefix(TOPIC_MATCH_ORDER_PREFIX).and_then(|rest| {
                rest.strip_prefix('/').filter(|pair| !pair.is_empty())
            }) {
                Some(pair) => serde_json::from_slice(data)
                    .map(|order| IngressMessage::ForwardedOrder {
                        pair: pair.to_string(),
                        order,
                    })
                    .map_err(malformed),
                None => Err(MessageError::UnknownTopic(other.to_string())),
            },
        }
    }
}
