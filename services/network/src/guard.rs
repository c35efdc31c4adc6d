//! Reception guard
//!
//! Applied to every inbound gossip frame before it can reach a subscriber:
//! rate limit first, then reputation bookkeeping. Only admitted frames are
//! counted as relayed traffic.

use crate::limiter::RateLimiter;
use crate::reputation::Reputation;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// How often idle limiter windows and reputation entries are reaped.
const PRUNE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Idle horizon beyond which per-peer state is dropped.
const IDLE_HORIZON: Duration = Duration::from_secs(30 * 60);

pub struct ReceptionGuard {
    limiter: RateLimiter,
    reputation: Arc<Reputation>,
    /// Total admitted bytes, shared with the proof collector.
    relayed_bytes: Arc<AtomicU64>,
}

impl ReceptionGuard {
    pub fn new(
        limit_bytes_per_sec: u64,
        limit_msgs_per_sec: u64,
        reputation: Arc<Reputation>,
        relayed_bytes: Arc<AtomicU64>,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(limit_bytes_per_sec, limit_msgs_per_sec),
            reputation,
            relayed_bytes,
        }
    }

    /// Gate one inbound frame of `size` bytes from `peer_id`.
    ///
    /// A drop records a violation; an accept rolls the bytes into the
    /// peer's relay tally and the node-wide relayed-bytes counter.
    pub fn admit(&self, peer_id: &str, size: usize) -> bool {
        if !self.limiter.allow(peer_id, size as u64) {
            debug!(peer = peer_id, size, "frame dropped by rate limit");
            self.reputation.record_violation(peer_id);
            return false;
        }
        self.reputation.record_relayed(peer_id, size as u64);
        self.relayed_bytes.fetch_add(size as u64, Ordering::Relaxed);
        true
    }

    pub fn reputation(&self) -> &Arc<Reputation> {
        &self.reputation
    }

    pub fn relayed_bytes_total(&self) -> u64 {
        self.relayed_bytes.load(Ordering::Relaxed)
    }

    /// One reap pass over both maps.
    pub fn prune_idle(&self) {
        self.limiter.prune(IDLE_HORIZON);
        self.reputation.prune(IDLE_HORIZON);
    }
}

/// Periodic reaper for limiter windows and reputation entries.
pub async fn run_pruner(guard: Arc<ReceptionGuard>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => guard.prune_idle(),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
