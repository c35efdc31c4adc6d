//! Order-book snapshot broadcast and divergence checks
//!
//! Any node periodically emits compact level aggregates of its local books
//! on `/p2p-exchange/sync/orderbook`, best effort. Every receiver compares
//! digests against its own book to surface divergence; storage nodes
//! additionally persist the snapshot. A received snapshot never replaces
//! local state.

use crate::handlers::OrderHandler;
use matching_engine::Engine;
use network::Gossip;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, warn};
use types::message::TOPIC_SYNC_ORDERBOOK;
use types::snapshot::OrderbookSnapshot;

/// Broadcast cadence for local book snapshots.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

/// Levels per side carried in a broadcast snapshot.
const SNAPSHOT_DEPTH: usize = 50;

/// Content digest of a snapshot's levels (timestamp excluded, so two nodes
/// with identical books produce identical digests).
pub fn snapshot_digest(snapshot: &OrderbookSnapshot) -> String {
    let mut hasher = Sha256::new();
    hasher.update(snapshot.pair.as_bytes());
    for level in snapshot.bids.iter().chain(snapshot.asks.iter()) {
        hasher.update(level.price().as_bytes());
        hasher.update([b'@']);
        hasher.update(level.quantity().as_bytes());
        hasher.update([b'|']);
    }
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl OrderHandler {
    /// Compare a received snapshot against the local view of the pair.
    ///
    /// Runs on every node for every snapshot. Returns `Some(true)` when the
    /// sender's view differs from ours (logged), `Some(false)` when the
    /// digests agree, and `None` when there is no local book to compare
    /// against. Local state is never replaced.
    pub fn check_snapshot_divergence(&self, snapshot: &OrderbookSnapshot) -> Option<bool> {
        if snapshot.pair.is_empty() {
            return None;
        }
        let local = self
            .engine
            .level_snapshot(&snapshot.pair, SNAPSHOT_DEPTH, snapshot.snapshot_at)?;
        let local_digest = snapshot_digest(&local);
        let remote_digest = snapshot_digest(snapshot);
        let diverged = local_digest != remote_digest;
        if diverged {
            debug!(
                pair = %snapshot.pair,
                local = %local_digest,
                remote = %remote_digest,
                "order book divergence observed"
            );
        }
        Some(diverged)
    }

    /// Persist a received snapshot (storage nodes).
    pub async fn persist_snapshot(&self, snapshot: &OrderbookSnapshot) {
        if snapshot.pair.is_empty() {
            return;
        }
        if let Err(e) = self.store.insert_snapshot(snapshot).await {
            warn!(pair = %snapshot.pair, error = %e, "persist snapshot");
        }
    }
}

/// Periodic best-effort broadcaster of this node's books.
pub async fn run_snapshot_broadcast(
    engine: Arc<Engine>,
    gossip: Arc<Gossip>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = unix_now();
                for pair in engine.all_pairs() {
                    let Some(snapshot) = engine.level_snapshot(&pair, SNAPSHOT_DEPTH, now) else {
                        continue;
                    };
                    match serde_json::to_string(&snapshot) {
                        Ok(payload) => {
                            gossip.publish(TOPIC_SYNC_ORDERBOOK, &payload);
                        }
                        Err(e) => warn!(pair = %pair, error = %e, "encode snapshot"),
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::snapshot::OrderbookLevel;

    fn snapshot(pair: &str, at: i64, bid_qty: &str) -> OrderbookSnapshot {
        OrderbookSnapshot {
            pair: pair.into(),
            snapshot_at: at,
            bids: vec![OrderbookLevel("1.0".into(), bid_qty.into())],
            asks: vec![],
        }
    }

    #[test]
    fn test_digest_ignores_timestamp() {
        let a = snapshot("TKA/TKB", 100, "10");
        let b = snapshot("TKA/TKB", 999, "10");
        assert_eq!(snapshot_digest(&a), snapshot_digest(&b));
    }

    #[test]
    fn test_digest_sensitive_to_levels_and_pair() {
        let base = snapshot("TKA/TKB", 100, "10");
        assert_ne!(
            snapshot_digest(&base),
            snapshot_digest(&snapshot("TKA/TKB", 100, "11"))
        );
        assert_ne!(
            snapshot_digest(&base),
            snapshot_digest(&snapshot("TKC/TKD", 100, "10"))
        );
    }

    use crate::handlers::OrderHandlerBuilder;
    use router::Router;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use store::Store;
    use types::order::{Order, OrderStatus, Side};

    async fn handler_with_book() -> (tempfile::TempDir, OrderHandler) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(tmp.path()).await.unwrap());
        let engine = Arc::new(Engine::new(HashMap::new()));
        engine.add_order(
            &Order {
                order_id: "b1".into(),
                trader: "0xabc".into(),
                pair: "TKA/TKB".into(),
                side: Side::Buy,
                price: dec!(1.0),
                amount: dec!(10),
                filled: rust_decimal::Decimal::ZERO,
                status: OrderStatus::Open,
                nonce: 0,
                created_at: 1,
                expires_at: 0,
                signature: String::new(),
            },
            0,
        );
        let handler = OrderHandlerBuilder::new(
            store,
            engine,
            Arc::new(Router::new("self")),
            Arc::new(Gossip::new("self")),
        )
        .build();
        (tmp, handler)
    }

    #[tokio::test]
    async fn test_divergence_check_runs_against_local_book() {
        let (_tmp, handler) = handler_with_book().await;

        // Same levels as the local book: no divergence.
        let agreeing = OrderbookSnapshot {
            pair: "TKA/TKB".into(),
            snapshot_at: 100,
            bids: vec![OrderbookLevel(
                "1.000000000000000000".into(),
                "10.000000000000000000".into(),
            )],
            asks: vec![],
        };
        assert_eq!(handler.check_snapshot_divergence(&agreeing), Some(false));

        // Different quantity at the level: divergence observed.
        assert_eq!(
            handler.check_snapshot_divergence(&snapshot("TKA/TKB", 100, "7")),
            Some(true)
        );

        // No local book for the pair: nothing to compare.
        assert_eq!(
            handler.check_snapshot_divergence(&snapshot("TKX/TKY", 100, "7")),
            None
        );
    }

    #[tokio::test]
    async fn test_persist_snapshot_writes_row() {
        let (_tmp, handler) = handler_with_book().await;
        handler.persist_snapshot(&snapshot("TKA/TKB", 100, "10")).await;
        let stored = handler
            .store
            .latest_snapshot("TKA/TKB")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.snapshot_at, 100);
    }
}
