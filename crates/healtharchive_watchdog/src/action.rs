//! Common shape of a watchdog decision, applied or planned.

use serde::Serialize;

/// One decision made by a watchdog iteration.
///
/// `applied = false` either means dry-run mode (no sentinel) or that a
/// rate limit held the action back; `reason` carries the code either way.
#[derive(Debug, Clone, Serialize)]
pub struct WatchdogAction {
    pub loop_name: &'static str,
    pub job_id: Option<i64>,
    pub target: Option<String>,
    pub reason: String,
    pub applied: bool,
}
