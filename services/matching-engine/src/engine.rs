//! Matching engine
//!
//! One price-time book per pair plus the pair -> token table and a reverse
//! `order_id -> pair` index for cancellation without pair knowledge. All
//! mutating operations take the engine's writer lock; critical sections are
//! CPU-bound and short, so a sync lock is fine under an async runtime.

use crate::book::{aggregate_levels, insert_sorted, sort_side, Book};
use crate::sigcache::SignatureCache;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;
use types::numeric::base_units;
use types::order::{Order, OrderStatus, Side};
use types::pair::PairTokens;
use types::snapshot::OrderbookSnapshot;
use types::trade::{trade_id, Trade};

/// Ceiling on resting orders per pair; the tail (worst-ranked) entry is
/// evicted when a full side takes another insert.
const MAX_ORDERS_PER_PAIR: usize = 10_000;

/// Sealed per-period match totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodStats {
    pub trades: u64,
    /// Matched volume in integer base units (amount * 10^18).
    pub volume: u128,
}

#[derive(Default)]
struct EngineState {
    books: HashMap<String, Book>,
    tokens: HashMap<String, PairTokens>,
    order_pair: HashMap<String, String>,
    current_period: String,
    current: PeriodStats,
    history: HashMap<String, PeriodStats>,
}

/// The engine. Shareable (`Arc<Engine>`); every operation takes `&self`.
pub struct Engine {
    state: RwLock<EngineState>,
    sig_cache: Mutex<SignatureCache>,
}

impl Engine {
    pub fn new(pair_tokens: HashMap<String, PairTokens>) -> Self {
        Self {
            state: RwLock::new(EngineState {
                tokens: pair_tokens,
                ..Default::default()
            }),
            sig_cache: Mutex::new(SignatureCache::new()),
        }
    }

    /// Create the pair's (empty) book if it does not exist yet.
    pub fn ensure_pair(&self, pair: &str) {
        if pair.is_empty() {
            return;
        }
        self.state.write().books.entry(pair.to_string()).or_default();
    }

    /// On-chain token addresses for a pair, if registered.
    pub fn pair_tokens(&self, pair: &str) -> Option<PairTokens> {
        self.state.read().tokens.get(pair).cloned()
    }

    /// All pairs with a book (possibly empty).
    pub fn all_pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self.state.read().books.keys().cloned().collect();
        pairs.sort();
        pairs
    }

    /// Total resting orders across every book; the registry broadcasts this
    /// as the node's capacity figure.
    pub fn order_count(&self) -> usize {
        self.state.read().books.values().map(Book::len).sum()
    }

    /// Defensive copy of one pair's book.
    pub fn orderbook(&self, pair: &str) -> (Vec<Order>, Vec<Order>) {
        let state = self.state.read();
        match state.books.get(pair) {
            Some(book) => (book.bids.clone(), book.asks.clone()),
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Level-aggregated snapshot of one pair's book at `now`.
    pub fn level_snapshot(&self, pair: &str, depth: usize, now: i64) -> Option<OrderbookSnapshot> {
        let state = self.state.read();
        let book = state.books.get(pair)?;
        Some(OrderbookSnapshot {
            pair: pair.to_string(),
            snapshot_at: now,
            bids: aggregate_levels(&book.bids, depth),
            asks: aggregate_levels(&book.asks, depth),
        })
    }

    /// Put the unfilled remainder of `order` on the book.
    ///
    /// A prior entry with the same `order_id` is removed first; expired or
    /// shapeless orders and orders with nothing left are dropped. Returns
    /// whether an entry was inserted.
    pub fn add_order(&self, order: &Order, now: i64) -> bool {
        if !order.has_required_fields() || order.is_expired(now) {
            return false;
        }
        let left = order.remaining();
        if left <= Decimal::ZERO {
            return false;
        }
        let mut state = self.state.write();
        let EngineState {
            books, order_pair, ..
        } = &mut *state;

        if let Some(prior_pair) = order_pair.get(&order.order_id) {
            if let Some(book) = books.get_mut(prior_pair) {
                book.remove(&order.order_id);
            }
        }
        let book = books.entry(order.pair.clone()).or_default();
        book.remove(&order.order_id);

        let mut entry = order.clone();
        entry.amount = left;
        entry.filled = Decimal::ZERO;

        let side = book.side_mut(order.side);
        if side.len() >= MAX_ORDERS_PER_PAIR {
            if let Some(evicted) = side.pop() {
                order_pair.remove(&evicted.order_id);
            }
        }
        insert_sorted(side, entry, order.side);
        order_pair.insert(order.order_id.clone(), order.pair.clone());
        true
    }

    /// Atomically adopt a new book for one pair (post-sync). Expired and
    /// empty entries are filtered; the reverse index is rebuilt.
    pub fn replace_book(&self, pair: &str, bids: Vec<Order>, asks: Vec<Order>, now: i64) {
        if pair.is_empty() {
            return;
        }
        let mut state = self.state.write();
        let EngineState {
            books, order_pair, ..
        } = &mut *state;

        if let Some(old) = books.get(pair) {
            for o in old.bids.iter().chain(old.asks.iter()) {
                order_pair.remove(&o.order_id);
            }
        }

        let mut book = Book::default();
        for (incoming, side) in [(bids, Side::Buy), (asks, Side::Sell)] {
            let target = book.side_mut(side);
            for order in incoming {
                if order.order_id.is_empty() || order.is_expired(now) {
                    continue;
                }
                let left = order.remaining();
                if left <= Decimal::ZERO {
                    continue;
                }
                let mut entry = order;
                entry.amount = left;
                entry.filled = Decimal::ZERO;
                order_pair.insert(entry.order_id.clone(), pair.to_string());
                target.push(entry);
            }
            sort_side(target, side);
        }
        books.insert(pair.to_string(), book);
    }

    /// Remove one order from the book. With no pair given, the reverse
    /// index is consulted; as a last resort every book is scanned.
    pub fn remove_order(&self, pair: Option<&str>, order_id: &str) -> bool {
        let mut state = self.state.write();
        let EngineState {
            books, order_pair, ..
        } = &mut *state;

        let pair = match pair {
            Some(p) if !p.is_empty() => Some(p.to_string()),
            _ => order_pair.get(order_id).cloned(),
        };
        let removed = match pair {
            Some(pair) => books
                .get_mut(&pair)
                .map(|book| book.remove(order_id))
                .unwrap_or(false),
            None => books.values_mut().any(|book| book.remove(order_id)),
        };
        if removed {
            order_pair.remove(order_id);
        }
        removed
    }

    /// Match `taker` against the opposite side of its pair's book.
    ///
    /// Fills walk the head of the book while prices cross; each fill trades
    /// `min(taker_left, maker_left)` at the maker's price with trade ids
    /// `taker-maker-seq` (seq from 1). The taker's `filled`/`status` are
    /// updated in place, and any resting entry under the taker's id is
    /// refreshed to the new remainder.
    pub fn match_order(&self, taker: &mut Order, now: i64) -> Vec<Trade> {
        let mut trades = Vec::new();
        if !taker.has_required_fields() {
            return trades;
        }
        let mut state = self.state.write();
        let EngineState {
            books,
            tokens,
            order_pair,
            current_period,
            current,
            ..
        } = &mut *state;

        let tokens = tokens.get(&taker.pair).cloned().unwrap_or_default();
        let book = books.entry(taker.pair.clone()).or_default();

        let mut taker_left = taker.remaining();
        if taker_left <= Decimal::ZERO {
            return trades;
        }
        let mut seq = 0u32;

        let opposite = match taker.side {
            Side::Buy => &mut book.asks,
            Side::Sell => &mut book.bids,
        };
        while taker_left > Decimal::ZERO {
            let Some(maker) = opposite.first_mut() else {
                break;
            };
            let crossed = match taker.side {
                Side::Buy => taker.price >= maker.price,
                Side::Sell => taker.price <= maker.price,
            };
            if !crossed {
                break;
            }
            let maker_left = maker.remaining();
            if maker_left <= Decimal::ZERO {
                order_pair.remove(&maker.order_id);
                opposite.remove(0);
                continue;
            }

            let qty = taker_left.min(maker_left);
            let price = maker.price;
            let quote = qty * price;
            seq += 1;
            let (token_in, token_out, amount_in, amount_out) = match taker.side {
                Side::Buy => (tokens.token0.clone(), tokens.token1.clone(), qty, quote),
                Side::Sell => (tokens.token1.clone(), tokens.token0.clone(), quote, qty),
            };
            trades.push(Trade {
                trade_id: trade_id(&taker.order_id, &maker.order_id, seq),
                pair: taker.pair.clone(),
                taker_order_id: taker.order_id.clone(),
                maker_order_id: maker.order_id.clone(),
                maker: maker.trader.clone(),
                taker: taker.trader.clone(),
                token_in,
                token_out,
                amount_in,
                amount_out,
                price,
                amount: qty,
                fee: Decimal::ZERO,
                timestamp: now,
                tx_hash: String::new(),
            });

            taker_left -= qty;
            taker.filled += qty;
            if qty == maker_left {
                order_pair.remove(&maker.order_id);
                opposite.remove(0);
            } else {
                maker.amount -= qty;
                maker.status = OrderStatus::Partial;
            }
        }

        taker.status = if taker_left <= Decimal::ZERO {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };

        // Refresh the taker's own resting entry to the new remainder.
        let own_side = book.side_mut(taker.side);
        if let Some(i) = own_side.iter().position(|o| o.order_id == taker.order_id) {
            if taker_left > Decimal::ZERO {
                own_side[i].amount = taker_left;
                own_side[i].status = taker.status;
            } else {
                own_side.remove(i);
                order_pair.remove(&taker.order_id);
            }
        }
        book.trim_filled();

        if !trades.is_empty() {
            debug!(
                pair = %taker.pair,
                taker = %taker.order_id,
                fills = trades.len(),
                "matched taker"
            );
            if !current_period.is_empty() {
                current.trades += trades.len() as u64;
                current.volume += trades
                    .iter()
                    .map(|t| base_units(t.amount))
                    .sum::<u128>();
            }
        }
        trades
    }

    /// Deterministic per-epoch evaluator: sort the takers by
    /// `(pair, created_at, order_id)` ascending, then match each in turn.
    /// Two honest nodes fed identical inputs emit identical trades,
    /// including identical trade ids.
    pub fn match_batch(&self, takers: &mut Vec<Order>, now: i64) -> Vec<Trade> {
        takers.sort_by(|a, b| {
            a.pair
                .cmp(&b.pair)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        let mut trades = Vec::new();
        for taker in takers.iter_mut() {
            trades.extend(self.match_order(taker, now));
        }
        trades
    }

    /// Rotate period accounting. Sealing the outgoing period's totals into
    /// the history map; a repeat call with the same period is a no-op.
    pub fn set_current_period(&self, period: &str) {
        if period.is_empty() {
            return;
        }
        let mut state = self.state.write();
        if state.current_period == period {
            return;
        }
        if !state.current_period.is_empty() {
            let sealed = state.current;
            let name = std::mem::take(&mut state.current_period);
            state.history.insert(name, sealed);
        }
        state.current_period = period.to_string();
        state.current = PeriodStats::default();
    }

    /// Totals for a period: the live bucket or a sealed one.
    pub fn period_stats(&self, period: &str) -> PeriodStats {
        let state = self.state.read();
        if state.current_period == period {
            state.current
        } else {
            state.history.get(period).copied().unwrap_or_default()
        }
    }

    /// Memoized signature verdict; `verify` runs only on a cache miss.
    /// Informational only — correctness never depends on the cache.
    pub fn verify_signature_cached<F>(&self, order_id: &str, verify: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut cache = self.sig_cache.lock();
        if let Some(verdict) = cache.get(order_id) {
            return verdict;
        }
        let verdict = verify();
        cache.insert(order_id, verdict);
        verdict
    }

    /// Drop memoized verdicts once the cache has grown past its floor.
    pub fn prune_signature_cache(&self) {
        self.sig_cache.lock().prune();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tokens() -> HashMap<String, PairTokens> {
        let mut map = HashMap::new();
        map.insert(
            "TKA/TKB".to_string(),
            PairTokens {
                token0: "TKA".into(),
                token1: "TKB".into(),
            },
        );
        map
    }

    fn order(id: &str, side: Side, price: Decimal, amount: Decimal, created_at: i64) -> Order {
        Order {
            order_id: id.into(),
            trader: format!("0x{id}"),
            pair: "TKA/TKB".into(),
            side,
            price,
            amount,
            filled: Decimal::ZERO,
            status: OrderStatus::Open,
            nonce: 0,
            created_at,
            expires_at: 0,
            signature: String::new(),
        }
    }

    #[test]
    fn test_partial_fill_leaves_maker_remainder() {
        let engine = Engine::new(tokens());
        let maker = order("m1", Side::Sell, dec!(1.0), dec!(100), 1);
        assert!(engine.add_order(&maker, 0));

        let mut taker = order("t1", Side::Buy, dec!(1.0), dec!(50), 2);
        let trades = engine.match_order(&mut taker, 1_000);

        assert_eq!(trades.len(), 1);
        let t = &trades[0];
        assert_eq!(t.trade_id, "t1-m1-1");
        assert_eq!(t.amount, dec!(50));
        assert_eq!(t.price, dec!(1.0));
        assert_eq!(t.token_in, "TKA");
        assert_eq!(t.token_out, "TKB");
        assert_eq!(t.amount_in, dec!(50));
        assert_eq!(t.amount_out, dec!(50));
        assert_eq!(taker.status, OrderStatus::Filled);
        assert_eq!(taker.filled, dec!(50));

        let (bids, asks) = engine.orderbook("TKA/TKB");
        assert!(bids.is_empty());
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[0].order_id, "m1");
        assert_eq!(asks[0].amount, dec!(50), "maker keeps the remainder");
        assert_eq!(asks[0].filled, Decimal::ZERO);
    }

    #[test]
    fn test_sell_taker_swaps_token_orientation() {
        let engine = Engine::new(tokens());
        engine.add_order(&order("m1", Side::Buy, dec!(2.0), dec!(10), 1), 0);

        let mut taker = order("t1", Side::Sell, dec!(1.5), dec!(4), 2);
        let trades = engine.match_order(&mut taker, 1_000);
        assert_eq!(trades.len(), 1);
        let t = &trades[0];
        assert_eq!(t.price, dec!(2.0), "maker price wins");
        assert_eq!(t.token_in, "TKB");
        assert_eq!(t.token_out, "TKA");
        assert_eq!(t.amount_in, dec!(8.0), "quote amount in");
        assert_eq!(t.amount_out, dec!(4), "base amount out");
    }

    #[test]
    fn test_empty_book_leaves_taker_partial() {
        let engine = Engine::new(tokens());
        let mut taker = order("t1", Side::Buy, dec!(1), dec!(5), 1);
        let trades = engine.match_order(&mut taker, 0);
        assert!(trades.is_empty());
        assert_eq!(taker.status, OrderStatus::Partial);
        assert_eq!(taker.filled, Decimal::ZERO);
    }

    #[test]
    fn test_already_filled_taker_is_noop() {
        let engine = Engine::new(tokens());
        engine.add_order(&order("m1", Side::Sell, dec!(1), dec!(10), 1), 0);
        let mut taker = order("t1", Side::Buy, dec!(1), dec!(5), 2);
        taker.filled = dec!(5);
        let trades = engine.match_order(&mut taker, 0);
        assert!(trades.is_empty());
        assert_eq!(taker.status, OrderStatus::Open, "status untouched on no-op");
    }

    #[test]
    fn test_no_cross_no_trade() {
        let engine = Engine::new(tokens());
        engine.add_order(&order("m1", Side::Sell, dec!(2.0), dec!(10), 1), 0);
        let mut taker = order("t1", Side::Buy, dec!(1.9), dec!(10), 2);
        assert!(engine.match_order(&mut taker, 0).is_empty());
    }

    #[test]
    fn test_taker_walks_multiple_makers_price_time() {
        let engine = Engine::new(tokens());
        engine.add_order(&order("m1", Side::Sell, dec!(1.1), dec!(10), 5), 0);
        engine.add_order(&order("m2", Side::Sell, dec!(1.0), dec!(10), 9), 0);
        engine.add_order(&order("m3", Side::Sell, dec!(1.0), dec!(10), 3), 0);

        let mut taker = order("t1", Side::Buy, dec!(1.1), dec!(25), 20);
        let trades = engine.match_order(&mut taker, 1_000);
        let ids: Vec<_> = trades.iter().map(|t| t.trade_id.as_str()).collect();
        assert_eq!(ids, ["t1-m3-1", "t1-m2-2", "t1-m1-3"]);
        assert_eq!(trades[2].amount, dec!(5));
        assert_eq!(taker.status, OrderStatus::Filled);

        let (_, asks) = engine.orderbook("TKA/TKB");
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[0].order_id, "m1");
        assert_eq!(asks[0].amount, dec!(5));
    }

    #[test]
    fn test_match_batch_is_deterministic_by_created_at_then_id() {
        // Same trades regardless of submission order.
        let run = |taker_order: [&str; 2]| {
            let engine = Engine::new(tokens());
            engine.add_order(&order("m1", Side::Sell, dec!(1.0), dec!(100), 1), 0);
            let t1 = order("t1", Side::Buy, dec!(1.0), dec!(30), 10);
            let t2 = order("t2", Side::Buy, dec!(1.0), dec!(40), 5);
            let mut takers: Vec<Order> = taker_order
                .iter()
                .map(|id| if *id == "t1" { t1.clone() } else { t2.clone() })
                .collect();
            engine
                .match_batch(&mut takers, 1_000)
                .iter()
                .map(|t| t.trade_id.clone())
                .collect::<Vec<_>>()
        };
        let a = run(["t1", "t2"]);
        let b = run(["t2", "t1"]);
        assert_eq!(a, b);
        assert_eq!(a, ["t2-m1-1", "t1-m1-1"], "earlier created_at matches first");
    }

    #[test]
    fn test_add_order_replaces_same_id_and_skips_expired() {
        let engine = Engine::new(tokens());
        let mut o = order("o1", Side::Buy, dec!(1), dec!(10), 1);
        assert!(engine.add_order(&o, 0));
        o.amount = dec!(7);
        assert!(engine.add_order(&o, 0));
        let (bids, _) = engine.orderbook("TKA/TKB");
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].amount, dec!(7));

        let mut expired = order("o2", Side::Buy, dec!(1), dec!(10), 1);
        expired.expires_at = 50;
        assert!(!engine.add_order(&expired, 100));
        assert!(!engine.add_order(&expired, 50), "expiry boundary drops");
    }

    #[test]
    fn test_add_order_stores_remainder_only() {
        let engine = Engine::new(tokens());
        let mut o = order("o1", Side::Sell, dec!(1), dec!(10), 1);
        o.filled = dec!(4);
        assert!(engine.add_order(&o, 0));
        let (_, asks) = engine.orderbook("TKA/TKB");
        assert_eq!(asks[0].amount, dec!(6));
        assert_eq!(asks[0].filled, Decimal::ZERO);

        o.filled = dec!(10);
        assert!(!engine.add_order(&o, 0), "nothing left, nothing inserted");
    }

    #[test]
    fn test_remove_order_via_reverse_index() {
        let engine = Engine::new(tokens());
        engine.add_order(&order("o1", Side::Buy, dec!(1), dec!(10), 1), 0);
        assert!(engine.remove_order(None, "o1"));
        assert!(!engine.remove_order(None, "o1"));
        let (bids, _) = engine.orderbook("TKA/TKB");
        assert!(bids.is_empty());
    }

    #[test]
    fn test_replace_book_filters_and_rebuilds_index() {
        let engine = Engine::new(tokens());
        engine.add_order(&order("stale", Side::Buy, dec!(1), dec!(10), 1), 0);

        let mut expired = order("dead", Side::Sell, dec!(1), dec!(5), 2);
        expired.expires_at = 10;
        engine.replace_book(
            "TKA/TKB",
            vec![order("b1", Side::Buy, dec!(1.0), dec!(3), 4)],
            vec![order("a1", Side::Sell, dec!(1.2), dec!(2), 5), expired],
            100,
        );

        let (bids, asks) = engine.orderbook("TKA/TKB");
        assert_eq!(bids.len(), 1);
        assert_eq!(asks.len(), 1);
        assert!(!engine.remove_order(None, "stale"), "old index entries dropped");
        assert!(engine.remove_order(None, "a1"), "new index entries resolvable");
    }

    #[test]
    fn test_period_accounting_rotation() {
        let engine = Engine::new(tokens());
        engine.set_current_period("2026-07-01_2026-07-08");
        engine.add_order(&order("m1", Side::Sell, dec!(1), dec!(100), 1), 0);
        let mut taker = order("t1", Side::Buy, dec!(1), dec!(40), 2);
        engine.match_order(&mut taker, 0);

        let live = engine.period_stats("2026-07-01_2026-07-08");
        assert_eq!(live.trades, 1);
        assert_eq!(live.volume, 40 * types::numeric::BASE_UNITS_PER_TOKEN);

        engine.set_current_period("2026-07-08_2026-07-15");
        let sealed = engine.period_stats("2026-07-01_2026-07-08");
        assert_eq!(sealed, live, "sealed history readable");
        assert_eq!(engine.period_stats("2026-07-08_2026-07-15"), PeriodStats::default());
        assert_eq!(engine.period_stats("unknown"), PeriodStats::default());
    }

    #[test]
    fn test_signature_cache_memoizes() {
        let engine = Engine::new(tokens());
        let mut calls = 0;
        assert!(engine.verify_signature_cached("o1", || {
            calls += 1;
            true
        }));
        assert!(engine.verify_signature_cached("o1", || {
            calls += 1;
            false
        }));
        assert_eq!(calls, 1, "second lookup served from cache");
    }

    #[test]
    fn test_book_invariants_after_mixed_operations() {
        let engine = Engine::new(tokens());
        for i in 0..20 {
            let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
            let price = Decimal::from(10 + (i % 5)) / Decimal::from(if side == Side::Buy { 12 } else { 8 });
            engine.add_order(&order(&format!("o{i}"), side, price, dec!(5), i as i64), 0);
        }
        engine.remove_order(None, "o4");
        let mut taker = order("t", Side::Buy, dec!(5), dec!(12), 100);
        engine.match_order(&mut taker, 0);

        let (bids, asks) = engine.orderbook("TKA/TKB");
        for pair in bids.windows(2) {
            assert!(
                pair[0].price > pair[1].price
                    || (pair[0].price == pair[1].price
                        && pair[0].created_at <= pair[1].created_at),
                "bids non-increasing"
            );
        }
        for pair in asks.windows(2) {
            assert!(
                pair[0].price < pair[1].price
                    || (pair[0].price == pair[1].price
                        && pair[0].created_at <= pair[1].created_at),
                "asks non-decreasing"
            );
        }
        for o in bids.iter().chain(asks.iter()) {
            assert!(o.filled >= Decimal::ZERO && o.filled <= o.amount);
            assert!(!o.status.is_terminal());
        }
    }
}
