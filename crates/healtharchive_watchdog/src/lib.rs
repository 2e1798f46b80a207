//! Operational watchdogs for the HealthArchive pipeline.
//!
//! Three independent control loops keep the system moving when reality and
//! the database drift apart: a stall detector, storage hot-path recovery,
//! and a DB/runtime reconciler. All actions are sentinel-gated (dry-run
//! without the apply file), rate-limited, idempotent, and counted.

mod action;
mod gate;
mod metrics;
mod rate_limit;
mod reconcile;
mod runner;
mod stall;
mod storage;

pub use action::WatchdogAction;
pub use gate::{
    SentinelGate, DEPLOY_LOCK, RECONCILER_SENTINEL, STALL_SENTINEL, STORAGE_SENTINEL,
};
pub use metrics::{Metrics, MetricsSnapshot, METRICS};
pub use rate_limit::RateLimiter;
pub use reconcile::{find_process_referencing, Reconciler, ReconcilerConfig};
pub use runner::{run_watchdogs, WatchdogSchedule};
pub use stall::{StallDetector, StallDetectorConfig};
pub use storage::{StorageRecovery, StorageRecoveryConfig};
