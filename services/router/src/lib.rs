//! Router and registry
//!
//! Pair-sharded order placement: a registry of matching nodes refreshed by
//! 30 s heartbeats, deterministic node selection, and the forwarding
//! decision for each incoming order. Forwarding failure always degrades to
//! local processing; the engine's `order_id` dedup masks the rare double
//! delivery that can cause.

mod registry;
mod router;

pub use registry::{CapacityFn, Publisher, Registry};
pub use router::{
    pair_hash, MatchNodeInfo, RouteDecision, Router, EXPIRE_HORIZON_SECS, ONLINE_HORIZON_SECS,
};
