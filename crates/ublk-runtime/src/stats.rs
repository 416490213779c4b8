//! Per-queue counters (supplemented — not part of the core reference
//! design, but every real ublk server operators have asked to run wants
//! some visibility into). Plain atomics, snapshotted on demand; no
//! background exporter, per the network-transport non-goal.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct QueueStats {
    requests_served: AtomicU64,
    bytes_transferred: AtomicU64,
    backend_errors: AtomicU64,
    commits_submitted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStatsSnapshot {
    pub requests_served: u64,
    pub bytes_transferred: u64,
    pub backend_errors: u64,
    pub commits_submitted: u64,
}

impl QueueStats {
    pub fn record_request(&self, bytes: u64, ok: bool) {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
        if !ok {
            self.backend_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_commit(&self) {
        self.commits_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            requests_served: self.requests_served.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            commits_submitted: self.commits_submitted.load(Ordering::Relaxed),
        }
    }
}
