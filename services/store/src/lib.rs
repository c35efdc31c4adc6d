//! Persistent store
//!
//! Durable trades, orders and order-book snapshots in a single SQLite file,
//! plus the daily retention sweeper. Writes are serialized through one pool;
//! reads run concurrently. Callers treat [`StoreError::TransientIo`] as
//! retryable (the store itself already retries with backoff) and absence as
//! `Option`, never an error.

pub mod db;
pub mod error;
mod orders;
pub mod retention;
mod snapshots;
mod trades;

pub use db::Store;
pub use error::StoreError;
pub use retention::{clamp_to_retention, retention_window_secs, run_retention};
