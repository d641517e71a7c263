//! Per-session counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, shared between a session and its watch thread
#[derive(Debug, Default)]
pub struct SessionStats {
    batches: AtomicU64,
    records: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
    ignored: AtomicU64,
    suppressed: AtomicU64,
    malformed: AtomicU64,
    handler_failures: AtomicU64,
    boundary_failures: AtomicU64,
    overflows: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Buffers retrieved from the OS
    pub batches: u64,
    /// Records decoded from those buffers
    pub records: u64,
    /// Events the consumer accepted
    pub delivered: u64,
    /// Events skipped because a name could not be converted
    pub skipped: u64,
    /// Events matched by ignore rules
    pub ignored: u64,
    /// Events dropped as duplicates
    pub suppressed: u64,
    /// Buffers that ended in a malformed record
    pub malformed: u64,
    pub handler_failures: u64,
    pub boundary_failures: u64,
    /// Times the OS or queue reported lost notifications
    pub overflows: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl SessionStats {
    pub fn record_batch(&self, records: usize) {
        bump(&self.batches);
        self.records.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        bump(&self.delivered);
    }

    pub fn record_skipped(&self) {
        bump(&self.skipped);
    }

    pub fn record_ignored(&self) {
        bump(&self.ignored);
    }

    pub fn record_suppressed(&self) {
        bump(&self.suppressed);
    }

    pub fn record_malformed(&self) {
        bump(&self.malformed);
    }

    pub fn record_handler_failure(&self) {
        bump(&self.handler_failures);
    }

    pub fn record_boundary_failure(&self) {
        bump(&self.boundary_failures);
    }

    pub fn record_overflow(&self) {
        bump(&self.overflows);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            batches: load(&self.batches),
            records: load(&self.records),
            delivered: load(&self.delivered),
            skipped: load(&self.skipped),
            ignored: load(&self.ignored),
            suppressed: load(&self.suppressed),
            malformed: load(&self.malformed),
            handler_failures: load(&self.handler_failures),
            boundary_failures: load(&self.boundary_failures),
            overflows: load(&self.overflows),
        }
    }
}
