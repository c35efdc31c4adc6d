//! Peer reputation
//!
//! Rolling per-peer tallies of relayed bytes and violations, and a bounded
//! score in [0, 10000]: half from relay volume (log-scaled, 1 TiB caps the
//! component at 5000, each violation costs 500 of it), 30% from active
//! duration (30 days cap), 20% from the volume/violation ratio (a clean
//! record earns the full 2000).

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const MAX_SCORE: u64 = 10_000;

const VOLUME_COMPONENT_MAX: f64 = 5_000.0;
const UPTIME_COMPONENT_MAX: f64 = 3_000.0;
const RATIO_COMPONENT_MAX: f64 = 2_000.0;
const VIOLATION_PENALTY: f64 = 500.0;
/// log2(1 TiB); a tebibyte of relayed traffic maxes the volume component.
const LOG2_MAX_BYTES: f64 = 40.0;
const MAX_ACTIVE_DAYS: f64 = 30.0;

/// One peer's rolling tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerStats {
    pub bytes_relayed: u64,
    pub violations: u64,
    pub last_seen: Instant,
}

impl PeerStats {
    fn fresh() -> Self {
        Self {
            bytes_relayed: 0,
            violations: 0,
            last_seen: Instant::now(),
        }
    }
}

/// Score a peer's record given how long it has been active.
pub fn reputation_score(stats: &PeerStats, active: Duration) -> u64 {
    let volume = if stats.bytes_relayed == 0 {
        0.0
    } else {
        let filled = (stats.bytes_relayed as f64).log2() / LOG2_MAX_BYTES;
        (filled.clamp(0.0, 1.0)) * VOLUME_COMPONENT_MAX
    };
    let volume = (volume - stats.violations as f64 * VIOLATION_PENALTY).max(0.0);

    let active_days = active.as_secs_f64() / 86_400.0;
    let uptime = (active_days / MAX_ACTIVE_DAYS).clamp(0.0, 1.0) * UPTIME_COMPONENT_MAX;

    let ratio = if stats.violations == 0 {
        if stats.bytes_relayed > 0 {
            RATIO_COMPONENT_MAX
        } else {
            0.0
        }
    } else {
        let per_violation = stats.bytes_relayed as f64 / stats.violations as f64;
        (per_violation / 1_000.0).clamp(0.0, 1.0) * RATIO_COMPONENT_MAX
    };

    let total = volume + uptime + ratio;
    (total.round() as u64).min(MAX_SCORE)
}

/// Reputation table over all peers this node has heard from.
pub struct Reputation {
    peers: RwLock<HashMap<String, PeerStats>>,
}

impl Default for Reputation {
    fn default() -> Self {
        Self::new()
    }
}

impl Reputation {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Credit `bytes` of accepted traffic to `peer_id`.
    pub fn record_relayed(&self, peer_id: &str, bytes: u64) {
        let mut peers = self.peers.write();
        let stats = peers
            .entry(peer_id.to_string())
            .or_insert_with(PeerStats::fresh);
        stats.bytes_relayed = stats.bytes_relayed.saturating_add(bytes);
        stats.last_seen = Instant::now();
    }

    /// Charge one violation (e.g. a rate-limited drop) to `peer_id`.
    pub fn record_violation(&self, peer_id: &str) {
        let mut peers = self.peers.write();
        let stats = peers
            .entry(peer_id.to_string())
            .or_insert_with(PeerStats::fresh);
        stats.violations += 1;
        stats.last_seen = Instant::now();
    }

    pub fn get(&self, peer_id: &str) -> Option<PeerStats> {
        self.peers.read().get(peer_id).copied()
    }

    /// Current score for `peer_id` given its active duration.
    pub fn score(&self, peer_id: &str, active: Duration) -> u64 {
        self.get(peer_id)
            .map(|stats| reputation_score(&stats, active))
            .unwrap_or(0)
    }

    /// Peers scoring at least `threshold`.
    pub fn high_reputation_peers(&self, threshold: u64, active: Duration) -> Vec<(String, u64)> {
        let peers = self.peers.read();
        let mut out: Vec<(String, u64)> = peers
            .iter()
            .map(|(id, stats)| (id.clone(), reputation_score(stats, active)))
            .filter(|(_, score)| *score >= threshold)
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }

    /// Copy of the whole table (logging/export).
    pub fn snapshot(&self) -> HashMap<String, PeerStats> {
        self.peers.read().clone()
    }

    /// Drop peers not seen for `older_than`.
    pub fn prune(&self, older_than: Duration) {
        let Some(cutoff) = Instant::now().checked_sub(older_than) else {
            return;
        };
        self.peers.write().retain(|_, s| s.last_seen >= cutoff);
    }
}
