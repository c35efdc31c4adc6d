//! Registry heartbeat
//!
//! A matching node announces `(peer_id, pairs, capacity)` every 30 s on
//! `/p2p-exchange/match/register`; every subscriber folds announcements
//! into its local [`Router`]. Stale entries are reaped on the same cadence.

use crate::router::Router;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, warn};
use types::message::{MatchNodeRegistration, TOPIC_MATCH_REGISTER};

/// Publish callback over the gossip fabric; returns whether the message was
/// accepted for publication.
pub type Publisher = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Source of the local load figure (resting order count).
pub type CapacityFn = Arc<dyn Fn() -> u64 + Send + Sync>;

const BROADCAST_INTERVAL: Duration = Duration::from_secs(30);

pub struct Registry {
    router: Arc<Router>,
    local_pairs: Vec<String>,
    publish: Publisher,
    capacity: CapacityFn,
}

impl Registry {
    pub fn new(
        router: Arc<Router>,
        local_pairs: Vec<String>,
        publish: Publisher,
        capacity: CapacityFn,
    ) -> Self {
        Self {
            router,
            local_pairs,
            publish,
            capacity,
        }
    }

    /// Serialize and publish one announcement.
    pub fn broadcast_once(&self, now: i64) {
        let peer_id = self.router.local_peer_id();
        if peer_id.is_empty() {
            return;
        }
        let registration = MatchNodeRegistration {
            peer_id: peer_id.to_string(),
            pairs: self.local_pairs.clone(),
            capacity: (self.capacity)(),
            timestamp: now,
        };
        match serde_json::to_string(&registration) {
            Ok(payload) => {
                if !(self.publish)(TOPIC_MATCH_REGISTER, &payload) {
                    warn!("registry broadcast not accepted");
                } else {
                    debug!(
                        pairs = registration.pairs.len(),
                        capacity = registration.capacity,
                        "registry broadcast"
                    );
                }
            }
            Err(e) => warn!(error = %e, "encode registration"),
        }
    }

    /// Fold a received announcement into the router; own announcements and
    /// nameless peers are ignored.
    pub fn handle_registration(&self, registration: &MatchNodeRegistration, now: i64) {
        if registration.peer_id.is_empty()
            || registration.peer_id == self.router.local_peer_id()
        {
            return;
        }
        self.router.register_node(
            &registration.peer_id,
            &registration.pairs,
            registration.capacity,
            now,
        );
    }

    /// Broadcast immediately, then every 30 s until shutdown; each tick also
    /// reaps expired registry entries.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.broadcast_once(unix_now());
        let mut ticker = tokio::time::interval(BROADCAST_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = unix_now();
                    self.broadcast_once(now);
                    self.router.cleanup_stale(now);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
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
    use parking_lot::Mutex;

    fn registry_with_sink() -> (Registry, Arc<Mutex<Vec<(String, String)>>>) {
        let router = Arc::new(Router::new("self"));
        let sink: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_clone = Arc::clone(&sink);
        let publish: Publisher = Arc::new(move |topic, payload| {
            sink_clone.lock().push((topic.to_string(), payload.to_string()));
            true
        });
        let capacity: CapacityFn = Arc::new(|| 7);
        let registry = Registry::new(router, vec!["TKA/TKB".into()], publish, capacity);
        (registry, sink)
    }

    #[test]
    fn test_broadcast_shape() {
        let (registry, sink) = registry_with_sink();
        registry.broadcast_once(1_000);

        let published = sink.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, TOPIC_MATCH_REGISTER);
        let reg: MatchNodeRegistration = serde_json::from_str(&published[0].1).unwrap();
        assert_eq!(reg.peer_id, "self");
        assert_eq!(reg.pairs, ["TKA/TKB"]);
        assert_eq!(reg.capacity, 7);
        assert_eq!(reg.timestamp, 1_000);
    }

    #[test]
    fn test_handle_registration_ignores_self_and_nameless() {
        let (registry, _sink) = registry_with_sink();
        registry.handle_registration(
            &MatchNodeRegistration {
                peer_id: "self".into(),
                pairs: vec!["TKA/TKB".into()],
                capacity: 0,
                timestamp: 1,
            },
            1,
        );
        registry.handle_registration(
            &MatchNodeRegistration {
                peer_id: String::new(),
                pairs: vec![],
                capacity: 0,
                timestamp: 1,
            },
            1,
        );
        assert!(registry.router.all_nodes().is_empty());

        registry.handle_registration(
            &MatchNodeRegistration {
                peer_id: "remote".into(),
                pairs: vec!["TKA/TKB".into()],
                capacity: 3,
                timestamp: 1,
            },
            1,
        );
        assert_eq!(registry.router.all_nodes().len(), 1);
    }
}
