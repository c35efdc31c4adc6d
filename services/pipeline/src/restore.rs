//! Book restore
//!
//! On startup a matching node reloads every pair's open and partial orders
//! from the store so the in-memory book survives restarts.

use matching_engine::Engine;
use store::{Store, StoreError};
use tracing::info;

/// Open rows loaded per pair and side.
const RESTORE_LIMIT: usize = 200;

/// Rebuild all in-memory books from persisted open orders. Returns the
/// number of orders put back on the books.
pub async fn restore_books(engine: &Engine, store: &Store, now: i64) -> Result<usize, StoreError> {
    let mut restored = 0;
    for pair in store.list_pairs_with_open_orders().await? {
        let (bids, asks) = store.list_orders_open_by_pair(&pair, RESTORE_LIMIT).await?;
        restored += bids.len() + asks.len();
        engine.replace_book(&pair, bids, asks, now);
        info!(pair = %pair, "order book restored");
    }
    Ok(restored)
}
