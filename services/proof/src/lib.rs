//! Contribution proofs
//!
//! Period accounting, metric collection, idempotent signed proof emission,
//! and the calldata builder for the on-chain reward contract. Transaction
//! submission itself lives outside the core.

pub mod calldata;
pub mod collector;
pub mod emitter;
pub mod period;

pub use calldata::{build_signed_calldata, sign_digest, CalldataError, SubmitProofArgs};
pub use collector::Collector;
pub use emitter::{ProofConfig, ProofEmitter, ProofError, ProofSigner, SignerError, TickOutcome};
pub use period::{period_end_unix, period_range, period_range_at, period_seconds};
