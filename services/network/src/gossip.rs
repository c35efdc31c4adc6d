//! Gossip fabric
//!
//! One process-wide pub/sub hub. Local subscribers hang off per-topic
//! broadcast channels; connected peers are flooded through per-link writer
//! queues. Duplicates are collapsed by message id before a frame reaches
//! either, so the flood terminates and at-least-once delivery looks
//! exactly-once to subscribers.

use crate::dedup::{message_id, SeenCache};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Buffered messages per topic before slow subscribers start lagging.
const TOPIC_CHANNEL_CAPACITY: usize = 1024;

/// Queued outbound frames per peer link.
pub(crate) const LINK_QUEUE_CAPACITY: usize = 256;

/// One frame on a gossip link (newline-delimited JSON on the wire).
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GossipFrame {
    pub topic: String,
    pub data: String,
}

/// A message as seen by a local subscriber.
#[derive(Debug, Clone)]
pub struct GossipMessage {
    pub topic: String,
    /// Originating link's peer id; empty for locally published messages.
    pub from: String,
    pub data: String,
}

/// Receiving side of one topic subscription.
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<GossipMessage>,
}

impl Subscription {
    /// Next message on the topic. Lagged windows are skipped with a warning;
    /// `None` only after the fabric is gone.
    pub async fn next(&mut self) -> Option<GossipMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(topic = %self.topic, missed, "subscriber lagged, messages skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// The hub. Shared as `Arc<Gossip>` by the host, the pipeline and every
/// publisher.
pub struct Gossip {
    local_peer_id: String,
    topics: DashMap<String, broadcast::Sender<GossipMessage>>,
    links: DashMap<String, mpsc::Sender<String>>,
    seen: Mutex<SeenCache>,
}

impl Gossip {
    pub fn new(local_peer_id: impl Into<String>) -> Self {
        Self {
            local_peer_id: local_peer_id.into(),
            topics: DashMap::new(),
            links: DashMap::new(),
            seen: Mutex::new(SeenCache::new()),
        }
    }

    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    /// Subscribe to one topic. Multiple subscriptions per topic all see
    /// every message.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let sender = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CHANNEL_CAPACITY).0);
        Subscription {
            topic: topic.to_string(),
            rx: sender.subscribe(),
        }
    }

    /// Publish `data` on `topic`: local subscribers plus every connected
    /// link. Returns whether the message was fresh (not a duplicate).
    pub fn publish(&self, topic: &str, data: &str) -> bool {
        if !self.seen.lock().insert(message_id(topic, data.as_bytes())) {
            return false;
        }
        self.deliver_local(topic, "", data);
        self.fan_out(topic, data, None);
        true
    }

    /// Inject a frame that arrived from `from`'s link (already admitted by
    /// the reception guard). Duplicates are dropped; fresh frames go to
    /// local subscribers and are re-flooded to every other link.
    pub(crate) fn receive(&self, from: &str, topic: &str, data: &str) -> bool {
        if !self.seen.lock().insert(message_id(topic, data.as_bytes())) {
            debug!(topic, from, "duplicate frame dropped");
            return false;
        }
        self.deliver_local(topic, from, data);
        self.fan_out(topic, data, Some(from));
        true
    }

    fn deliver_local(&self, topic: &str, from: &str, data: &str) {
        if let Some(sender) = self.topics.get(topic) {
            let _ = sender.send(GossipMessage {
                topic: topic.to_string(),
                from: from.to_string(),
                data: data.to_string(),
            });
        }
    }

    fn fan_out(&self, topic: &str, data: &str, except: Option<&str>) {
        if self.links.is_empty() {
            return;
        }
        let frame = GossipFrame {
            topic: topic.to_string(),
            data: data.to_string(),
        };
        let Ok(mut line) = serde_json::to_string(&frame) else {
            return;
        };
        line.push('\n');
        for link in self.links.iter() {
            if Some(link.key().as_str()) == except {
                continue;
            }
            if link.value().try_send(line.clone()).is_err() {
                warn!(peer = %link.key(), topic, "link queue full, frame dropped");
            }
        }
    }

    /// Attach a peer link's outbound queue.
    pub(crate) fn register_link(&self, peer_id: &str, tx: mpsc::Sender<String>) {
        self.links.insert(peer_id.to_string(), tx);
    }

    pub(crate) fn remove_link(&self, peer_id: &str) {
        self.links.remove(peer_id);
    }

    /// Peer ids of currently attached links.
    pub fn connected_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.links.iter().map(|l| l.key().clone()).collect();
        peers.sort();
        peers
    }
}
