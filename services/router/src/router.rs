//! Order routing
//!
//! Every matching-capable node announces which pairs it owns; every
//! subscriber mirrors those announcements here. Selection prefers the
//! lowest-loaded live owner and falls back to a deterministic hash so all
//! honest nodes route a pair the same way.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, info};
use types::order::Order;

/// A registry entry older than this is skipped during selection.
pub const ONLINE_HORIZON_SECS: i64 = 60;

/// A registry entry older than this is deleted outright.
pub const EXPIRE_HORIZON_SECS: i64 = 300;

/// One matching node's advertised state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchNodeInfo {
    pub peer_id: String,
    pub pairs: Vec<String>,
    pub capacity: u64,
    pub updated_at: i64,
}

/// Where an order should be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Handle on this node.
    Local,
    /// Republish to the pair topic for `target` to process.
    Forward { target: String },
}

#[derive(Default)]
struct RouterState {
    pair_nodes: HashMap<String, Vec<String>>,
    nodes: HashMap<String, MatchNodeInfo>,
}

pub struct Router {
    state: RwLock<RouterState>,
    local_peer_id: String,
}

impl Router {
    pub fn new(local_peer_id: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(RouterState::default()),
            local_peer_id: local_peer_id.into(),
        }
    }

    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    /// Record (or refresh) a node announcement.
    pub fn register_node(&self, peer_id: &str, pairs: &[String], capacity: u64, now: i64) {
        if peer_id.is_empty() {
            return;
        }
        let mut state = self.state.write();
        state.nodes.insert(
            peer_id.to_string(),
            MatchNodeInfo {
                peer_id: peer_id.to_string(),
                pairs: pairs.to_vec(),
                capacity,
                updated_at: now,
            },
        );
        for pair in pairs {
            if pair.is_empty() {
                continue;
            }
            let owners = state.pair_nodes.entry(pair.clone()).or_default();
            if !owners.iter().any(|p| p == peer_id) {
                owners.push(peer_id.to_string());
                owners.sort();
            }
        }
        debug!(peer = peer_id, pairs = pairs.len(), capacity, "registered match node");
    }

    /// Refresh one node's load figure.
    pub fn update_capacity(&self, peer_id: &str, capacity: u64, now: i64) {
        let mut state = self.state.write();
        if let Some(info) = state.nodes.get_mut(peer_id) {
            info.capacity = capacity;
            info.updated_at = now;
        }
    }

    /// Drop a node and every pair mapping that points at it.
    pub fn remove_node(&self, peer_id: &str) {
        if peer_id.is_empty() {
            return;
        }
        let mut state = self.state.write();
        state.nodes.remove(peer_id);
        for owners in state.pair_nodes.values_mut() {
            owners.retain(|p| p != peer_id);
        }
        info!(peer = peer_id, "removed match node");
    }

    /// Pick the node that should match `pair`. `None` means "handle locally".
    ///
    /// Owners online within [`ONLINE_HORIZON_SECS`] are preferred by lowest
    /// capacity (peer id breaks ties); a fully offline owner list falls back
    /// to a deterministic hash over the owners; a pair nobody owns hashes
    /// over all registered nodes; an empty registry is local.
    pub fn select_node(&self, pair: &str, now: i64) -> Option<String> {
        if pair.is_empty() {
            return None;
        }
        let state = self.state.read();

        if let Some(owners) = state.pair_nodes.get(pair).filter(|o| !o.is_empty()) {
            let mut online: Vec<&MatchNodeInfo> = owners
                .iter()
                .filter_map(|p| state.nodes.get(p))
                .filter(|info| now - info.updated_at < ONLINE_HORIZON_SECS)
                .collect();
            if online.is_empty() {
                return Some(owners[hash_index(pair, owners.len())].clone());
            }
            online.sort_by(|a, b| {
                a.capacity
                    .cmp(&b.capacity)
                    .then_with(|| a.peer_id.cmp(&b.peer_id))
            });
            return Some(online[0].peer_id.clone());
        }

        if state.nodes.is_empty() {
            return None;
        }
        let mut peers: Vec<&String> = state.nodes.keys().collect();
        peers.sort();
        Some(peers[hash_index(pair, peers.len())].clone())
    }

    /// Forwarding decision for one order.
    pub fn route_order(&self, order: &Order, now: i64) -> RouteDecision {
        if order.pair.is_empty() {
            return RouteDecision::Local;
        }
        match self.select_node(&order.pair, now) {
            None => RouteDecision::Local,
            Some(target) if target == self.local_peer_id => RouteDecision::Local,
            Some(target) => RouteDecision::Forward { target },
        }
    }

    /// Whether this node is an advertised owner of `pair`.
    pub fn is_local_pair(&self, pair: &str) -> bool {
        if pair.is_empty() {
            return false;
        }
        self.state
            .read()
            .nodes
            .get(&self.local_peer_id)
            .map(|info| info.pairs.iter().any(|p| p == pair))
            .unwrap_or(false)
    }

    pub fn node_info(&self, peer_id: &str) -> Option<MatchNodeInfo> {
        self.state.read().nodes.get(peer_id).cloned()
    }

    pub fn all_nodes(&self) -> Vec<MatchNodeInfo> {
        let mut nodes: Vec<MatchNodeInfo> = self.state.read().nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        nodes
    }

    /// Delete entries silent for longer than [`EXPIRE_HORIZON_SECS`].
    pub fn cleanup_stale(&self, now: i64) {
        let mut state = self.state.write();
        let expired: Vec<String> = state
            .nodes
            .values()
            .filter(|info| now - info.updated_at > EXPIRE_HORIZON_SECS)
            .map(|info| info.peer_id.clone())
            .collect();
        for peer_id in expired {
            state.nodes.remove(&peer_id);
            for owners in state.pair_nodes.values_mut() {
                owners.retain(|p| p != &peer_id);
            }
            info!(peer = %peer_id, "expired stale match node");
        }
    }
}

/// Deterministic index into a list of `len` candidates for `pair`.
fn hash_index(pair: &str, len: usize) -> usize {
    let digest = Sha256::digest(pair.as_bytes());
    let mut h = 0u64;
    for byte in &digest[..8] {
        h = (h << 8) | u64::from(*byte);
    }
    (h % len as u64) as usize
}

/// Hex digest of a pair name, handy when eyeballing routing decisions.
pub fn pair_hash(pair: &str) -> String {
    hex_encode(&Sha256::digest(pair.as_bytes()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use types::order::{OrderStatus, Side};

    fn order(pair: &str) -> Order {
        Order {
            order_id: "o-1".into(),
            trader: String::new(),
            pair: pair.into(),
            side: Side::Buy,
            price: dec!(1),
            amount: dec!(1),
            filled: rust_decimal::Decimal::ZERO,
            status: OrderStatus::Open,
            nonce: 0,
            created_at: 0,
            expires_at: 0,
            signature: String::new(),
        }
    }

    #[test]
    fn test_empty_registry_routes_local() {
        let router = Router::new("self");
        assert_eq!(router.select_node("TKA/TKB", 100), None);
        assert_eq!(router.route_order(&order("TKA/TKB"), 100), RouteDecision::Local);
    }

    #[test]
    fn test_lowest_capacity_owner_wins() {
        let router = Router::new("self");
        router.register_node("busy", &["TKA/TKB".into()], 10, 100);
        router.register_node("idle", &["TKA/TKB".into()], 0, 100);
        assert_eq!(router.select_node("TKA/TKB", 110), Some("idle".into()));

        match router.route_order(&order("TKA/TKB"), 110) {
            RouteDecision::Forward { target } => assert_eq!(target, "idle"),
            other => panic!("expected forward, got {other:?}"),
        }
    }

    #[test]
    fn test_own_registration_routes_local() {
        let router = Router::new("self");
        router.register_node("self", &["TKA/TKB".into()], 0, 100);
        assert_eq!(router.route_order(&order("TKA/TKB"), 110), RouteDecision::Local);
        assert!(router.is_local_pair("TKA/TKB"));
        assert!(!router.is_local_pair("TKC/TKD"));
    }

    #[test]
    fn test_offline_owner_skipped() {
        let router = Router::new("self");
        router.register_node("old", &["TKA/TKB".into()], 0, 100);
        router.register_node("live", &["TKA/TKB".into()], 99, 100);
        // "old" last seen 70s ago, beyond the online horizon.
        router.update_capacity("live", 99, 160);
        assert_eq!(router.select_node("TKA/TKB", 165), Some("live".into()));
    }

    #[test]
    fn test_unowned_pair_hashes_deterministically() {
        let build = || {
            let router = Router::new("self");
            router.register_node("node-a", &[], 0, 100);
            router.register_node("node-b", &[], 0, 100);
            router.register_node("node-c", &[], 0, 100);
            router
        };
        let pick1 = build().select_node("UNOWNED/PAIR", 100);
        let pick2 = build().select_node("UNOWNED/PAIR", 100);
        assert!(pick1.is_some());
        assert_eq!(pick1, pick2, "hash fallback is stable");
    }

    #[test]
    fn test_cleanup_expires_after_five_minutes() {
        let router = Router::new("self");
        router.register_node("gone", &["TKA/TKB".into()], 0, 100);
        router.cleanup_stale(100 + EXPIRE_HORIZON_SECS);
        assert!(router.node_info("gone").is_some(), "at the horizon, kept");
        router.cleanup_stale(101 + EXPIRE_HORIZON_SECS);
        assert!(router.node_info("gone").is_none());
        assert_eq!(router.select_node("TKA/TKB", 500), None);
    }

    #[test]
    fn test_remove_node_clears_pair_mapping() {
        let router = Router::new("self");
        router.register_node("n1", &["TKA/TKB".into()], 0, 100);
        router.remove_node("n1");
        assert_eq!(router.select_node("TKA/TKB", 100), None);
        assert!(router.all_nodes().is_empty());
    }

    #[test]
    fn test_pair_hash_is_hex() {
        let h = pair_hash("TKA/TKB");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
