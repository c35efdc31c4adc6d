//! Per-peer rate limiting
//!
//! A 1-second window per peer over both bytes and message count. A limit of
//! zero disables that dimension. Windows reset rather than slide; the guard
//! only needs "did this peer exceed its budget this second".

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Clone, Copy)]
struct Window {
    started: Instant,
    bytes: u64,
    msgs: u64,
}

pub struct RateLimiter {
    windows: DashMap<String, Window>,
    limit_bytes_per_sec: u64,
    limit_msgs_per_sec: u64,
}

impl RateLimiter {
    /// `0` for either limit means that dimension is unlimited.
    pub fn new(limit_bytes_per_sec: u64, limit_msgs_per_sec: u64) -> Self {
        Self {
            windows: DashMap::new(),
            limit_bytes_per_sec,
            limit_msgs_per_sec,
        }
    }

    /// Whether `size` bytes from `peer_id` fit in the current window.
    /// A rejected message is NOT counted against the window.
    pub fn allow(&self, peer_id: &str, size: u64) -> bool {
        if self.limit_bytes_per_sec == 0 && self.limit_msgs_per_sec == 0 {
            return true;
        }
        let now = Instant::now();
        let mut window = self.windows.entry(peer_id.to_string()).or_insert(Window {
            started: now,
            bytes: 0,
            msgs: 0,
        });
        if now.duration_since(window.started) >= Duration::from_secs(1) {
            window.started = now;
            window.bytes = 0;
            window.msgs = 0;
        }
        if self.limit_msgs_per_sec > 0 && window.msgs + 1 > self.limit_msgs_per_sec {
            return false;
        }
        if self.limit_bytes_per_sec > 0 && window.bytes + size > self.limit_bytes_per_sec {
            return false;
        }
        window.bytes += size;
        window.msgs += 1;
        true
    }

    /// Drop windows idle for longer than `older_than`.
    pub fn prune(&self, older_than: Duration) {
        let Some(cutoff) = Instant::now().checked_sub(older_than) else {
            return;
        };
        self.windows.retain(|_, w| w.started >= cutoff);
    }

    #[cfg(test)]
    pub(crate) fn tracked_peers(&self) -> usize {
        self.windows.len()
    }
}
