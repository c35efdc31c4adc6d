//! Peer networking
//!
//! Everything between the wire and the subscriber pipeline: the node's
//! persisted identity, multiaddr listeners and dials, the gossip fabric
//! with its reception guard (rate limit + reputation), and the trade-sync
//! stream protocol.

mod dedup;
pub mod gossip;
pub mod guard;
pub mod host;
pub mod identity;
pub mod limiter;
pub mod multiaddr;
pub mod nat;
pub mod reputation;
pub mod sync;

pub use gossip::{Gossip, GossipMessage, Subscription};
pub use guard::{run_pruner, ReceptionGuard};
pub use host::{Host, HostConfig, HostError, PROTOCOL_GOSSIP};
pub use identity::{IdentityError, NodeKey};
pub use multiaddr::{Multiaddr, MultiaddrError};
pub use reputation::{reputation_score, PeerStats, Reputation};
pub use sync::{SyncServer, SyncTradesRequest, SyncTradesResponse, TradeSource};
