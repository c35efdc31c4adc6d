//! Order, cancel and trade handlers
//!
//! The subscriber side of the data plane: validate, route, match, publish,
//! persist. Handler failures never propagate — a bad message is dropped
//! with one log line, store hiccups are logged and the node keeps serving.

use matching_engine::Engine;
use network::Gossip;
use router::{RouteDecision, Router};
use std::sync::Arc;
use store::Store;
use tracing::{debug, info, warn};
use types::message::{match_order_topic, CancelRequest, TOPIC_TRADE_EXECUTED};
use types::order::{Order, OrderStatus};
use types::pair::PairTokens;
use types::trade::Trade;

/// External signature oracle over an order (EIP-712 verification lives
/// outside the core). Verdicts are memoized by the engine's cache.
pub type SignatureOracle = Arc<dyn Fn(&Order, Option<&PairTokens>) -> bool + Send + Sync>;

/// What became of one ingested order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    /// Dropped at validation; the reason is for logs and tests only.
    Rejected(&'static str),
    /// Republished on the pair topic for `target`; a copy was persisted.
    Forwarded { target: String },
    /// Matched locally, producing `trades` fills.
    Processed { trades: usize },
}

/// Assembles an [`OrderHandler`]. The publish path is a captured handle to
/// the separately-owned gossip fabric, so handler and fabric share no
/// reciprocal ownership.
pub struct OrderHandlerBuilder {
    store: Arc<Store>,
    engine: Arc<Engine>,
    router: Arc<Router>,
    gossip: Arc<Gossip>,
    oracle: Option<SignatureOracle>,
}

impl OrderHandlerBuilder {
    pub fn new(
        store: Arc<Store>,
        engine: Arc<Engine>,
        router: Arc<Router>,
        gossip: Arc<Gossip>,
    ) -> Self {
        Self {
            store,
            engine,
            router,
            gossip,
            oracle: None,
        }
    }

    /// Install the external signature oracle; without one every order is
    /// taken at face value.
    pub fn signature_oracle(mut self, oracle: SignatureOracle) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn build(self) -> OrderHandler {
        OrderHandler {
            store: self.store,
            engine: self.engine,
            router: self.router,
            gossip: self.gossip,
            oracle: self.oracle.unwrap_or_else(|| Arc::new(|_, _| true)),
        }
    }
}

pub struct OrderHandler {
    pub(crate) store: Arc<Store>,
    pub(crate) engine: Arc<Engine>,
    router: Arc<Router>,
    gossip: Arc<Gossip>,
    oracle: SignatureOracle,
}

impl OrderHandler {
    /// `/p2p-exchange/order/new`: validate, route, and either forward to
    /// the owning node or match locally.
    pub async fn on_new_order(&self, order: Order, now: i64) -> OrderOutcome {
        if let Some(reason) = self.reject_reason(&order, now) {
            return OrderOutcome::Rejected(reason);
        }

        match self.router.route_order(&order, now) {
            RouteDecision::Forward { target } => {
                let topic = match_order_topic(&order.pair);
                match serde_json::to_string(&order) {
                    Ok(payload) if self.gossip.publish(&topic, &payload) => {
                        if let Err(e) = self.store.insert_order(&order).await {
                            warn!(order = %order.order_id, error = %e, "persist forwarded order");
                        }
                        debug!(order = %order.order_id, target = %target, "order forwarded");
                        OrderOutcome::Forwarded { target }
                    }
                    _ => {
                        // Liveness over placement: a failed forward is
                        // processed locally; order_id dedup masks doubles.
                        warn!(order = %order.order_id, "forward failed, processing locally");
                        self.process_locally(order, now).await
                    }
                }
            }
            RouteDecision::Local => self.process_locally(order, now).await,
        }
    }

    /// `/p2p-exchange/match/order/{pair}`: an order this node owns. It is
    /// re-verified at this ingress and never re-routed.
    pub async fn on_forwarded_order(&self, pair: &str, order: Order, now: i64) -> OrderOutcome {
        if order.pair != pair {
            warn!(order = %order.order_id, topic_pair = pair, order_pair = %order.pair, "pair mismatch on forwarded order");
            return OrderOutcome::Rejected("pair mismatch");
        }
        if let Some(reason) = self.reject_reason(&order, now) {
            return OrderOutcome::Rejected(reason);
        }
        self.process_locally(order, now).await
    }

    fn reject_reason(&self, order: &Order, now: i64) -> Option<&'static str> {
        if !order.has_required_fields() {
            warn!(order = %order.order_id, "order missing required fields");
            return Some("missing required fields");
        }
        if order.is_expired(now) {
            debug!(order = %order.order_id, expires_at = order.expires_at, "expired order skipped");
            return Some("expired");
        }
        let tokens = self.engine.pair_tokens(&order.pair);
        let valid = self
            .engine
            .verify_signature_cached(&order.order_id, || (self.oracle)(order, tokens.as_ref()));
        if !valid {
            warn!(order = %order.order_id, "order signature rejected");
            return Some("invalid signature");
        }
        None
    }

    async fn process_locally(&self, mut order: Order, now: i64) -> OrderOutcome {
        self.engine.ensure_pair(&order.pair);
        self.engine.add_order(&order, now);
        let trades = self.engine.match_order(&mut order, now);

        for trade in &trades {
            match serde_json::to_string(trade) {
                Ok(payload) => {
                    self.gossip.publish(TOPIC_TRADE_EXECUTED, &payload);
                }
                Err(e) => warn!(trade = %trade.trade_id, error = %e, "encode trade"),
            }
        }
        if let Err(e) = self.store.insert_trades(&trades).await {
            warn!(count = trades.len(), error = %e, "persist trades");
        }
        if let Err(e) = self.store.insert_order(&order).await {
            warn!(order = %order.order_id, error = %e, "persist order");
        }
        if !trades.is_empty() {
            info!(order = %order.order_id, pair = %order.pair, fills = trades.len(), "order matched");
        }
        OrderOutcome::Processed {
            trades: trades.len(),
        }
    }

    /// `/p2p-exchange/order/cancel`: mark the row cancelled (keeping its
    /// current fill) and pull it from the book. Unknown orders are skipped.
    pub async fn on_cancel(&self, cancel: &CancelRequest, _now: i64) -> bool {
        if cancel.order_id.is_empty() {
            return false;
        }
        let existing = match self.store.get_order(&cancel.order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                debug!(order = %cancel.order_id, "cancel for unknown order skipped");
                return false;
            }
            Err(e) => {
                warn!(order = %cancel.order_id, error = %e, "cancel lookup failed");
                return false;
            }
        };
        if let Err(e) = self
            .store
            .update_order_status(&cancel.order_id, OrderStatus::Cancelled, existing.filled)
            .await
        {
            warn!(order = %cancel.order_id, error = %e, "cancel update failed");
            return false;
        }
        self.engine.remove_order(None, &cancel.order_id);
        info!(order = %cancel.order_id, "order cancelled");
        true
    }

    /// `/p2p-exchange/trade/executed`: nodes that did not produce the trade
    /// still record it. Duplicate trade ids collapse in the store.
    pub async fn on_trade(&self, trade: &Trade) {
        if trade.trade_id.is_empty() {
            return;
        }
        if let Err(e) = self.store.insert_trade(trade).await {
            warn!(trade = %trade.trade_id, error = %e, "persist broadcast trade");
        }
    }
}
