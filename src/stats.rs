//! Process-wide request statistics.
//!
//! A single `Stats` instance lives for the process's lifetime and is
//! incremented from every `Endpoint`'s engine loop, across however many
//! tasks are concurrently issuing requests — hence `AtomicU64` rather than
//! a counter behind a lock.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide, monotonically non-decreasing counters.
pub struct Stats {
    requests_failed: AtomicU64,
    requests_successful: AtomicU64,
    bytes_sent: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            requests_failed: AtomicU64::new(0),
            requests_successful: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.requests_successful.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    /// A point-in-time snapshot suitable for diffing between two readings.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_successful: self.requests_successful.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// The process-wide singleton. Initialized at first use, never torn down.
pub static STATS: Stats = Stats::new();

/// A snapshot of [`STATS`] at one point in time, the rough equivalent of
/// the original's `getJSON()` document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests_failed: u64,
    pub requests_successful: u64,
    pub bytes_sent: u64,
}

impl std::ops::Sub for StatsSnapshot {
    type Output = StatsSnapshot;

    /// Structural diff between two snapshots, for reporting counters over
    /// an interval rather than since process start.
    fn sub(self, rhs: StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            requests_failed: self.requests_failed.saturating_sub(rhs.requests_failed),
            requests_successful: self
                .requests_successful
                .saturating_sub(rhs.requests_successful),
            bytes_sent: self.bytes_sent.saturating_sub(rhs.bytes_sent),
        }
    }
}
