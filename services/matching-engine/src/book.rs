//! Per-pair order book
//!
//! Two ordered sequences of resting orders: bids price-descending, asks
//! price-ascending, ties broken by `created_at` ascending (FIFO). Every
//! entry holds only the unfilled remainder (`amount` = remainder,
//! `filled` = 0).

use rust_decimal::Decimal;
use types::numeric::format_fixed;
use types::order::{Order, Side};
use types::snapshot::OrderbookLevel;

#[derive(Debug, Default)]
pub(crate) struct Book {
    pub bids: Vec<Order>,
    pub asks: Vec<Order>,
}

impl Book {
    pub fn side_mut(&mut self, side: Side) -> &mut Vec<Order> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    /// Remove the entry with `order_id` from either side.
    pub fn remove(&mut self, order_id: &str) -> bool {
        let before = self.len();
        self.bids.retain(|o| o.order_id != order_id);
        self.asks.retain(|o| o.order_id != order_id);
        self.len() < before
    }

    /// Drop fully-consumed residue from both sides.
    pub fn trim_filled(&mut self) {
        self.bids
            .retain(|o| o.amount > Decimal::ZERO && !o.status.is_terminal());
        self.asks
            .retain(|o| o.amount > Decimal::ZERO && !o.status.is_terminal());
    }
}

/// True when `a` must sit strictly ahead of `b` on `side`.
fn outranks(a: &Order, b: &Order, side: Side) -> bool {
    let price = match side {
        Side::Buy => b.price.cmp(&a.price),
        Side::Sell => a.price.cmp(&b.price),
    };
    match price {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => a.created_at < b.created_at,
    }
}

/// Insert into a near-sorted sequence: push to the back, bubble forward
/// while the newcomer outranks its predecessor. FIFO is preserved because
/// equal (price, created_at) never swaps.
pub(crate) fn insert_sorted(orders: &mut Vec<Order>, order: Order, side: Side) {
    orders.push(order);
    let mut i = orders.len() - 1;
    while i > 0 && outranks(&orders[i], &orders[i - 1], side) {
        orders.swap(i, i - 1);
        i -= 1;
    }
}

/// Full stable sort of one side (used when a book is adopted wholesale).
pub(crate) fn sort_side(orders: &mut [Order], side: Side) {
    orders.sort_by(|a, b| {
        let price = match side {
            Side::Buy => b.price.cmp(&a.price),
            Side::Sell => a.price.cmp(&b.price),
        };
        price.then_with(|| a.created_at.cmp(&b.created_at))
    });
}

/// Collapse a sorted side into `[price, total_qty]` levels, preserving the
/// side's price order.
pub(crate) fn aggregate_levels(orders: &[Order], depth: usize) -> Vec<OrderbookLevel> {
    let mut levels: Vec<(Decimal, Decimal)> = Vec::new();
    for o in orders {
        match levels.last_mut() {
            Some((price, qty)) if *price == o.price => *qty += o.amount,
            _ => levels.push((o.price, o.amount)),
        }
    }
    levels.truncate(depth);
    levels
        .into_iter()
        .map(|(price, qty)| OrderbookLevel(format_fixed(price), format_fixed(qty)))
        .collect()
}
