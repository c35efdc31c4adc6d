//! Contribution-proof emission
//!
//! A 10-minute timer evaluates the current period. Nothing happens while a
//! proof file for the period already exists or the period is still open;
//! otherwise metrics are sampled, the canonical `{period, metrics}` payload
//! is signed with the node key, and `proof_{period}.json` is written
//! atomically. Relay accounting uses a persisted bytes-relayed snapshot so
//! each period reports a delta, not the lifetime total.

use crate::collector::{bytes_to_gb, dir_size_bytes, Collector};
use crate::period::{period_end_unix, period_range_at, period_seconds, PeriodError};
use chrono::{DateTime, Utc};
use matching_engine::Engine;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};
use types::proof::{ContributionProof, NodeType, ProofMetrics};

/// Evaluation cadence.
const TICK_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// File carrying the relayed-bytes total as of the last emitted proof.
const RELAY_SNAPSHOT_FILENAME: &str = "last_bytes_relayed_snapshot";

/// Signs the canonical proof payload with the node's private key.
pub type ProofSigner = Arc<dyn Fn(&[u8]) -> Result<[u8; 64], SignerError> + Send + Sync>;

#[derive(Error, Debug, Clone)]
#[error("proof signing failed: {0}")]
pub struct SignerError(pub String);

#[derive(Error, Debug)]
pub enum ProofError {
    #[error("proof i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode proof: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Period(#[from] PeriodError),

    #[error(transparent)]
    Sign(#[from] SignerError),
}

/// What one timer tick did.
#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// A proof for the period already exists on disk.
    AlreadyEmitted,
    /// The period has not ended yet.
    PeriodOpen,
    /// A new proof file was written.
    Written(PathBuf),
}

pub struct ProofConfig {
    pub node_type: NodeType,
    pub period_days: u32,
    /// Measured for the storage metric.
    pub data_dir: PathBuf,
    /// Where proof files and the relay snapshot live.
    pub output_dir: PathBuf,
}

/// The signed portion of a proof, serialized canonically (field order is
/// fixed by this struct).
#[derive(Serialize)]
struct SigningPayload<'a> {
    period: &'a str,
    metrics: &'a ProofMetrics,
}

pub struct ProofEmitter {
    config: ProofConfig,
    node_id: String,
    signer: ProofSigner,
    collector: Arc<Collector>,
    engine: Option<Arc<Engine>>,
}

impl ProofEmitter {
    pub fn new(
        config: ProofConfig,
        node_id: String,
        signer: ProofSigner,
        collector: Arc<Collector>,
        engine: Option<Arc<Engine>>,
    ) -> Self {
        Self {
            config,
            node_id,
            signer,
            collector,
            engine,
        }
    }

    /// One evaluation at wall-clock `now`.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome, ProofError> {
        let period = period_range_at(self.config.period_days, now);
        if let Some(engine) = &self.engine {
            engine.set_current_period(&period);
        }

        let path = self.proof_path(&period);
        if path.exists() {
            return Ok(TickOutcome::AlreadyEmitted);
        }
        if now.timestamp() < period_end_unix(&period)? {
            return Ok(TickOutcome::PeriodOpen);
        }

        let metrics = self.sample_metrics(&period);
        let payload = serde_json::to_vec(&SigningPayload {
            period: &period,
            metrics: &metrics,
        })?;
        let signature = (self.signer)(&payload)?;

        let proof = ContributionProof {
            node_id: self.node_id.clone(),
            node_type: self.config.node_type,
            period: period.clone(),
            metrics,
            signature: format!("0x{}", hex::encode(signature)),
            timestamp: now.timestamp(),
        };

        std::fs::create_dir_all(&self.config.output_dir)?;
        let body = serde_json::to_vec_pretty(&proof)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &body)?;
        std::fs::rename(&tmp, &path)?;

        // Seal the relay delta only after the proof landed.
        if self.config.node_type == NodeType::Relay {
            let total = self.collector.bytes_relayed_total();
            if let Err(e) = std::fs::write(self.relay_snapshot_path(), total.to_string()) {
                warn!(error = %e, "persist relay snapshot");
            }
        }

        info!(period = %period, path = %path.display(), "contribution proof written");
        Ok(TickOutcome::Written(path))
    }

    fn sample_metrics(&self, period: &str) -> ProofMetrics {
        let mut metrics = ProofMetrics {
            uptime: self
                .collector
                .uptime_fraction(period_seconds(self.config.period_days)),
            ..Default::default()
        };
        match self.config.node_type {
            NodeType::Storage => {
                metrics.storage_used_gb = bytes_to_gb(dir_size_bytes(&self.config.data_dir));
            }
            NodeType::Relay => {
                let last = self.read_relay_snapshot();
                metrics.bytes_relayed =
                    self.collector.bytes_relayed_total().saturating_sub(last);
            }
            NodeType::Match => {
                if let Some(engine) = &self.engine {
                    let stats = engine.period_stats(period);
                    metrics.trades_matched = stats.trades;
                    metrics.volume_matched = stats.volume;
                }
            }
        }
        metrics
    }

    fn read_relay_snapshot(&self) -> u64 {
        std::fs::read_to_string(self.relay_snapshot_path())
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0)
    }

    fn proof_path(&self, period: &str) -> PathBuf {
        self.config.output_dir.join(format!("proof_{period}.json"))
    }

    fn relay_snapshot_path(&self) -> PathBuf {
        self.config.output_dir.join(RELAY_SNAPSHOT_FILENAME)
    }

    /// Timer loop: evaluate every 10 minutes until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()) {
                        // Includes sign failure: skip this tick, retry on
                        // the next one, never leave a partial file.
                        warn!(error = %e, "proof tick failed");
                    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ed25519_dalek::{Signer, SigningKey, Verifier};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn signer_from(key: Arc<SigningKey>) -> ProofSigner {
        Arc::new(move |payload| Ok(key.sign(payload).to_bytes()))
    }

    fn emitter(
        node_type: NodeType,
        dir: &std::path::Path,
        bytes: Arc<AtomicU64>,
        key: Arc<SigningKey>,
    ) -> ProofEmitter {
        ProofEmitter::new(
            ProofConfig {
                node_type,
                period_days: 7,
                data_dir: dir.to_path_buf(),
                output_dir: dir.join("proofs"),
            },
            "node-1".into(),
            signer_from(key),
            Arc::new(Collector::new(bytes)),
            None,
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_tick_writes_once_per_period() {
        let tmp = tempfile::tempdir().unwrap();
        let key = Arc::new(SigningKey::from_bytes(&[7u8; 32]));
        let e = emitter(NodeType::Relay, tmp.path(), Arc::new(AtomicU64::new(0)), key);

        let outcome = e.tick(now()).unwrap();
        let TickOutcome::Written(path) = outcome else {
            panic!("expected a write, got {outcome:?}");
        };
        assert!(path.ends_with("proof_2026-07-20_2026-07-27.json"));

        // Second tick in the same period: idempotent.
        assert_eq!(e.tick(now()).unwrap(), TickOutcome::AlreadyEmitted);
        let files: Vec<_> = std::fs::read_dir(tmp.path().join("proofs"))
            .unwrap()
            .filter_map(|f| f.ok())
            .filter(|f| f.file_name().to_string_lossy().starts_with("proof_"))
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_proof_signature_covers_canonical_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let key = Arc::new(SigningKey::from_bytes(&[9u8; 32]));
        let e = emitter(
            NodeType::Relay,
            tmp.path(),
            Arc::new(AtomicU64::new(4_096)),
            Arc::clone(&key),
        );
        let TickOutcome::Written(path) = e.tick(now()).unwrap() else {
            panic!("expected a write");
        };

        let proof: ContributionProof =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(proof.node_id, "node-1");
        assert_eq!(proof.node_type, NodeType::Relay);
        assert_eq!(proof.metrics.bytes_relayed, 4_096);

        let payload = serde_json::to_vec(&SigningPayload {
            period: &proof.period,
            metrics: &proof.metrics,
        })
        .unwrap();
        let sig_bytes: [u8; 64] = hex::decode(proof.signature.trim_start_matches("0x"))
            .unwrap()
            .try_into()
            .unwrap();
        let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        assert!(key.verifying_key().verify(&payload, &sig).is_ok());
    }

    #[test]
    fn test_relay_delta_accounting() {
        let tmp = tempfile::tempdir().unwrap();
        let key = Arc::new(SigningKey::from_bytes(&[1u8; 32]));
        let bytes = Arc::new(AtomicU64::new(1_000));
        let e = emitter(NodeType::Relay, tmp.path(), Arc::clone(&bytes), key);

        e.tick(now()).unwrap();
        let snapshot = std::fs::read_to_string(
            tmp.path().join("proofs").join(RELAY_SNAPSHOT_FILENAME),
        )
        .unwrap();
        assert_eq!(snapshot, "1000");

        // More traffic, next period: only the delta is reported.
        bytes.fetch_add(500, Ordering::Relaxed);
        let next = Utc.with_ymd_and_hms(2026, 8, 5, 12, 0, 0).unwrap();
        e.tick(next).unwrap();
        let proof: ContributionProof = serde_json::from_slice(
            &std::fs::read(
                tmp.path()
                    .join("proofs")
                    .join("proof_2026-07-29_2026-08-05.json"),
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(proof.metrics.bytes_relayed, 500);
    }

    #[test]
    fn test_sign_failure_leaves_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let e = ProofEmitter::new(
            ProofConfig {
                node_type: NodeType::Relay,
                period_days: 7,
                data_dir: tmp.path().to_path_buf(),
                output_dir: tmp.path().join("proofs"),
            },
            "node-1".into(),
            Arc::new(|_| Err(SignerError("hsm offline".into()))),
            Arc::new(Collector::new(Arc::new(AtomicU64::new(0)))),
            None,
        );
        assert!(matches!(e.tick(now()), Err(ProofError::Sign(_))));
        assert!(!tmp
            .path()
            .join("proofs")
            .join("proof_2026-07-20_2026-07-27.json")
            .exists());
    }

    #[test]
    fn test_storage_node_reports_footprint() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("blob"), vec![0u8; 2_000_000]).unwrap();
        let key = Arc::new(SigningKey::from_bytes(&[2u8; 32]));
        let e = emitter(NodeType::Storage, tmp.path(), Arc::new(AtomicU64::new(0)), key);

        let TickOutcome::Written(path) = e.tick(now()).unwrap() else {
            panic!("expected a write");
        };
        let proof: ContributionProof =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert!(proof.metrics.storage_used_gb > 0.0);
        assert_eq!(proof.metrics.bytes_relayed, 0);
    }
}
