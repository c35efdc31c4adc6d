//! Topic subscriber tasks
//!
//! One cooperative task per topic, each pumping its subscription through
//! the per-topic parser and into the handlers. Tasks stop consuming the
//! moment the shutdown signal fires.

use crate::handlers::OrderHandler;
use network::{Gossip, GossipMessage};
use router::Registry;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use types::message::{
    match_order_topic, IngressMessage, TOPIC_MATCH_REGISTER, TOPIC_ORDER_CANCEL, TOPIC_ORDER_NEW,
    TOPIC_SYNC_ORDERBOOK, TOPIC_TRADE_EXECUTED,
};

/// Which subscriber tasks a node runs.
pub struct SubscriberSet {
    pub handler: Arc<OrderHandler>,
    pub registry: Option<Arc<Registry>>,
    /// Pairs whose forwarded-order topics this node owns.
    pub owned_pairs: Vec<String>,
    /// Whether snapshots received on the sync topic are persisted.
    pub persist_snapshots: bool,
}

impl SubscriberSet {
    /// Spawn every subscriber task; the handles finish after shutdown.
    pub fn spawn(self, gossip: Arc<Gossip>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        let mut topics = vec![
            TOPIC_ORDER_NEW.to_string(),
            TOPIC_ORDER_CANCEL.to_string(),
            TOPIC_TRADE_EXECUTED.to_string(),
            TOPIC_SYNC_ORDERBOOK.to_string(),
            TOPIC_MATCH_REGISTER.to_string(),
        ];
        for pair in &self.owned_pairs {
            topics.push(match_order_topic(pair));
        }

        let set = Arc::new(self);
        for topic in topics {
            let set = Arc::clone(&set);
            let mut subscription = gossip.subscribe(&topic);
            let mut shutdown = shutdown.clone();
            info!(topic = %topic, "subscribed");
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        message = subscription.next() => {
                            let Some(message) = message else { return };
                            set.dispatch(&message).await;
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                }
            }));
        }
        tasks
    }

    async fn dispatch(&self, message: &GossipMessage) {
        let now = unix_now();
        match IngressMessage::parse(&message.topic, message.data.as_bytes()) {
            Ok(IngressMessage::NewOrder(order)) => {
                self.handler.on_new_order(order, now).await;
            }
            Ok(IngressMessage::ForwardedOrder { pair, order }) => {
                // An empty source marks our own republish looping back; the
                // target node, not us, owns this order now.
                if message.from.is_empty() {
                    return;
                }
                self.handler.on_forwarded_order(&pair, order, now).await;
            }
            Ok(IngressMessage::Cancel(cancel)) => {
                self.handler.on_cancel(&cancel, now).await;
            }
            Ok(IngressMessage::Trade(trade)) => {
                self.handler.on_trade(&trade).await;
            }
            Ok(IngressMessage::Snapshot(snapshot)) => {
                // Every receiver checks for divergence; only storage nodes
                // keep the snapshot.
                self.handler.check_snapshot_divergence(&snapshot);
                if self.persist_snapshots {
                    self.handler.persist_snapshot(&snapshot).await;
                }
            }
            Ok(IngressMessage::Registration(registration)) => {
                if let Some(registry) = &self.registry {
                    registry.handle_registration(&registration, now);
                }
            }
            Err(e) => {
                debug!(topic = %message.topic, error = %e, "ingress message dropped");
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
