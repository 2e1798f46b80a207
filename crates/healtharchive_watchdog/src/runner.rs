//! Periodic execution of the three watchdog loops.
//!
//! Each loop runs independently on its own interval with a hard
//! per-iteration ceiling, so one hung filesystem probe cannot starve the
//! following iterations (or the other loops).

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::action::WatchdogAction;
use crate::metrics::{Metrics, METRICS};
use crate::reconcile::Reconciler;
use crate::stall::StallDetector;
use crate::storage::StorageRecovery;

#[derive(Debug, Clone)]
pub struct WatchdogSchedule {
    pub interval: Duration,
    /// Hard wall-clock ceiling for one iteration.
    pub iteration_ceiling: Duration,
    /// Run each loop once, then return.
    pub once: bool,
}

impl Default for WatchdogSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            iteration_ceiling: Duration::from_secs(60),
            once: false,
        }
    }
}

/// One periodically-driven watchdog.
trait ControlLoop {
    fn name(&self) -> &'static str;
    async fn iterate(&mut self) -> Vec<WatchdogAction>;
}

impl ControlLoop for StallDetector {
    fn name(&self) -> &'static str {
        crate::stall::LOOP_NAME
    }
    async fn iterate(&mut self) -> Vec<WatchdogAction> {
        self.run_once().await
    }
}

impl ControlLoop for StorageRecovery {
    fn name(&self) -> &'static str {
        crate::storage::LOOP_NAME
    }
    async fn iterate(&mut self) -> Vec<WatchdogAction> {
        self.run_once().await
    }
}

impl ControlLoop for Reconciler {
    fn name(&self) -> &'static str {
        crate::reconcile::LOOP_NAME
    }
    async fn iterate(&mut self) -> Vec<WatchdogAction> {
        self.run_once().await
    }
}

/// Run all three watchdog loops until cancelled.
pub async fn run_watchdogs(
    mut stall: StallDetector,
    mut storage: StorageRecovery,
    mut reconciler: Reconciler,
    schedule: WatchdogSchedule,
    cancel: CancellationToken,
) {
    info!(
        interval_secs = schedule.interval.as_secs(),
        once = schedule.once,
        "Watchdogs started"
    );

    tokio::join!(
        run_periodic(&mut stall, &schedule, &cancel),
        run_periodic(&mut storage, &schedule, &cancel),
        run_periodic(&mut reconciler, &schedule, &cancel),
    );
    info!("Watchdogs stopped");
}

async fn run_periodic<L: ControlLoop>(
    control: &mut L,
    schedule: &WatchdogSchedule,
    cancel: &CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        match tokio::time::timeout(schedule.iteration_ceiling, control.iterate()).await {
            Ok(actions) => {
                for action in &actions {
                    info!(
                        loop_name = action.loop_name,
                        job_id = ?action.job_id,
                        target = ?action.target,
                        reason = %action.reason,
                        applied = action.applied,
                        "Watchdog action"
                    );
                }
            }
            Err(_) => {
                Metrics::inc(&METRICS.iterations_timed_out);
                warn!(name = control.name(), "Watchdog iteration hit its wall-clock ceiling");
            }
        }

        if schedule.once {
            return;
        }
        tokio::time::sleep(schedule.interval).await;
    }
}
