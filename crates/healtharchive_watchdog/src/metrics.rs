//! Watchdog metrics.
//!
//! In-memory counters for monitoring watchdog behavior; a scrape-friendly
//! snapshot backs the `worker-status` command.
//!
//! Lock-free atomics, single writer per loop, any number of readers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global metrics instance.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    // Stall detector
    pub stall_checks: AtomicU64,
    pub stalls_detected: AtomicU64,
    pub stall_recoveries_planned: AtomicU64,
    pub stall_recoveries_applied: AtomicU64,
    pub stall_rate_limited: AtomicU64,

    // Storage hot-path recovery
    pub storage_probes: AtomicU64,
    pub storage_stale_detected: AtomicU64,
    pub storage_recoveries_planned: AtomicU64,
    pub storage_recoveries_applied: AtomicU64,
    pub storage_recoveries_succeeded: AtomicU64,
    /// 1 when the most recent apply attempt left the path readable.
    pub storage_last_apply_ok: AtomicU64,

    // DB/runtime reconciler
    pub reconcile_checks: AtomicU64,
    pub reconcile_planned: AtomicU64,
    pub reconcile_applied: AtomicU64,

    // Cross-cutting
    pub iterations_timed_out: AtomicU64,
    pub store_errors: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            stall_checks: AtomicU64::new(0),
            stalls_detected: AtomicU64::new(0),
            stall_recoveries_planned: AtomicU64::new(0),
            stall_recoveries_applied: AtomicU64::new(0),
            stall_rate_limited: AtomicU64::new(0),
            storage_probes: AtomicU64::new(0),
            storage_stale_detected: AtomicU64::new(0),
            storage_recoveries_planned: AtomicU64::new(0),
            storage_recoveries_applied: AtomicU64::new(0),
            storage_recoveries_succeeded: AtomicU64::new(0),
            storage_last_apply_ok: AtomicU64::new(0),
            reconcile_checks: AtomicU64::new(0),
            reconcile_planned: AtomicU64::new(0),
            reconcile_applied: AtomicU64::new(0),
            iterations_timed_out: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            stall_checks: read(&self.stall_checks),
            stalls_detected: read(&self.stalls_detected),
            stall_recoveries_planned: read(&self.stall_recoveries_planned),
            stall_recoveries_applied: read(&self.stall_recoveries_applied),
            stall_rate_limited: read(&self.stall_rate_limited),
            storage_probes: read(&self.storage_probes),
            storage_stale_detected: read(&self.storage_stale_detected),
            storage_recoveries_planned: read(&self.storage_recoveries_planned),
            storage_recoveries_applied: read(&self.storage_recoveries_applied),
            storage_recoveries_succeeded: read(&self.storage_recoveries_succeeded),
            storage_last_apply_ok: read(&self.storage_last_apply_ok) == 1,
            reconcile_checks: read(&self.reconcile_checks),
            reconcile_planned: read(&self.reconcile_planned),
            reconcile_applied: read(&self.reconcile_applied),
            iterations_timed_out: read(&self.iterations_timed_out),
            store_errors: read(&self.store_errors),
        }
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub stall_checks: u64,
    pub stalls_detected: u64,
    pub stall_recoveries_planned: u64,
    pub stall_recoveries_applied: u64,
    pub stall_rate_limited: u64,
    pub storage_probes: u64,
    pub storage_stale_detected: u64,
    pub storage_recoveries_planned: u64,
    pub storage_recoveries_applied: u64,
    pub storage_recoveries_succeeded: u64,
    pub storage_last_apply_ok: bool,
    pub reconcile_checks: u64,
    pub reconcile_planned: u64,
    pub reconcile_applied: u64,
    pub iterations_timed_out: u64,
    pub store_errors: u64,
}
