//! Contribution metric collectors
//!
//! Process uptime, the node-wide relayed-bytes counter (shared with the
//! reception guard), and the data-dir footprint.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Bytes per "GB" in proof metrics (decimal gigabytes).
const BYTES_PER_GB: f64 = 1e9;

pub struct Collector {
    started: Instant,
    bytes_relayed: Arc<AtomicU64>,
}

impl Collector {
    /// `bytes_relayed` is the same counter the reception guard feeds.
    pub fn new(bytes_relayed: Arc<AtomicU64>) -> Self {
        Self {
            started: Instant::now(),
            bytes_relayed,
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        self.started.elapsed().as_secs() as i64
    }

    /// Fraction of a period this process has been up, in [0, 1].
    pub fn uptime_fraction(&self, period_secs: i64) -> f64 {
        uptime_fraction_from(self.uptime_secs(), period_secs)
    }

    pub fn bytes_relayed_total(&self) -> u64 {
        self.bytes_relayed.load(Ordering::Relaxed)
    }
}

pub fn uptime_fraction_from(uptime_secs: i64, period_secs: i64) -> f64 {
    if period_secs <= 0 {
        return 0.0;
    }
    if uptime_secs >= period_secs {
        1.0
    } else {
        uptime_secs.max(0) as f64 / period_secs as f64
    }
}

/// Recursive byte count of everything under `path`.
pub fn dir_size_bytes(path: &Path) -> u64 {
    let mut total = 0;
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            total += dir_size_bytes(&entry.path());
        } else if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    total
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}
