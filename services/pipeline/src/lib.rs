//! Order/cancel/trade pipeline
//!
//! Subscriber tasks for the gossip topics, the order handler (validate ->
//! route -> match -> publish -> persist), snapshot broadcast/verification,
//! and the startup book restore.

mod handlers;
mod restore;
mod snapshots;
mod subscribers;

pub use handlers::{OrderHandler, OrderHandlerBuilder, OrderOutcome, SignatureOracle};
pub use restore::restore_books;
pub use snapshots::{run_snapshot_broadcast, snapshot_digest};
pub use subscribers::SubscriberSet;
