//! Shared types for the p2p exchange node
//!
//! Everything that crosses a crate or wire boundary lives here: orders,
//! trades, snapshots, contribution proofs, gossip topics, and the decimal
//! helpers that keep amounts deterministic across nodes.
//!
//! # Modules
//! - `numeric`: 18-digit decimal formatting and base-unit conversion
//! - `order`: order lifecycle types
//! - `trade`: executed fills
//! - `snapshot`: order-book level aggregates
//! - `pair`: pairs and on-chain token bindings
//! - `proof`: contribution-proof structures
//! - `message`: gossip topics and the per-topic ingress parser

pub mod message;
pub mod numeric;
pub mod order;
pub mod pair;
pub mod proof;
pub mod snapshot;
pub mod trade;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::message::*;
    pub use crate::numeric::{base_units, format_fixed, parse_or_zero};
    pub use crate::order::*;
    pub use crate::pair::*;
    pub use crate::proof::*;
    pub use crate::snapshot::*;
    pub use crate::trade::*;
}
