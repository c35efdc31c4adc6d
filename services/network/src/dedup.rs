//! Time-bounded duplicate filter
//!
//! Gossip delivery is at-least-once; this cache collapses re-deliveries and
//! stops flood loops. Entries expire after a TTL and the cache is capped,
//! so a lost entry only ever means one redundant local delivery.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(120);
const MAX_ENTRIES: usize = 16_384;

/// Message id: digest over topic and payload.
pub(crate) fn message_id(topic: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(topic.as_bytes());
    hasher.update([0u8]);
    hasher.update(data);
    hasher.finalize().into()
}

pub(crate) struct SeenCache {
    ttl: Duration,
    entries: HashMap<[u8; 32], Instant>,
    order: VecDeque<[u8; 32]>,
}

impl SeenCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `id`; returns `false` when it was already present (duplicate).
    pub fn insert(&mut self, id: [u8; 32]) -> bool {
        let now = Instant::now();
        self.expire(now);
        if self.entries.contains_key(&id) {
            return false;
        }
        if self.entries.len() >= MAX_ENTRIES {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(id, now);
        self.order.push_back(id);
        true
    }

    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.order.front() {
            match self.entries.get(oldest) {
                Some(seen_at) if now.duration_since(*seen_at) >= self.ttl => {
                    self.entries.remove(oldest);
                    self.order.pop_front();
                }
                Some(_) => break,
                None => {
                    self.order.pop_front();
                }
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_detected() {
        let mut cache = SeenCache::new();
        let id = message_id("/t", b"payload");
        assert!(cache.insert(id));
        assert!(!cache.insert(id));
    }

    #[test]
    fn test_distinct_topics_distinct_ids() {
        assert_ne!(message_id("/a", b"x"), message_id("/b", b"x"));
        assert_ne!(message_id("/a", b"x"), message_id("/a", b"y"));
    }

    #[test]
    fn test_ttl_expiry_allows_reinsert() {
        let mut cache = SeenCache::with_ttl(Duration::ZERO);
        let id = message_id("/t", b"payload");
        assert!(cache.insert(id));
        assert!(cache.insert(id), "expired entry readmitted");
    }

    #[test]
    fn test_capacity_bounded() {
        let mut cache = SeenCache::new();
        for i in 0..(MAX_ENTRIES + 10) {
            cache.insert(message_id("/t", i.to_string().as_bytes()));
        }
        assert!(cache.len() <= MAX_ENTRIES);
    }
}
