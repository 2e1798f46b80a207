//! Long-running processes: start-worker and start-watchdogs.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;

use healtharchive_crawler::CrawlerDriver;
use healtharchive_indexer::{IndexerConfig, IndexingPipeline};
use healtharchive_store::JobFilter;
use healtharchive_watchdog::{
    run_watchdogs, Reconciler, ReconcilerConfig, SentinelGate, StallDetector,
    StallDetectorConfig, StorageRecovery, StorageRecoveryConfig, WatchdogSchedule,
};
use healtharchive_worker::{Worker, WorkerConfig};

use crate::cli::job::{driver_config, shutdown_token};
use crate::cli::settings::Settings;
use crate::cli::{open_store, EXIT_FAILURE, EXIT_OK};

pub async fn start_worker(
    settings: &Settings,
    poll_interval_secs: u64,
    once: bool,
    annual_only: bool,
    no_root_guard: bool,
) -> Result<ExitCode> {
    let store = open_store(settings).await?;

    let mut config = WorkerConfig::new(settings.archive_root.clone(), settings.lock_dir.clone());
    config.poll_interval = Duration::from_secs(poll_interval_secs);
    config.disk_high_watermark_pct = settings.disk_high_watermark_pct;
    config.once = once;
    config.root_guard = !no_root_guard;
    if annual_only {
        config.filter = JobFilter {
            campaign_kind: Some("annual".to_string()),
            ..Default::default()
        };
    }

    let driver = CrawlerDriver::new(store.clone(), driver_config(settings));
    let pipeline = IndexingPipeline::new(
        store.clone(),
        IndexerConfig {
            auto_dedupe: settings.auto_dedupe,
        },
    );
    let worker = Worker::new(store, driver, pipeline, config);

    let cancel = shutdown_token();
    match worker.run(&cancel).await {
        Ok(()) => Ok(ExitCode::from(EXIT_OK)),
        Err(e) => {
            eprintln!("worker stopped: {e}");
            Ok(ExitCode::from(EXIT_FAILURE))
        }
    }
}

pub async fn start_watchdogs(
    settings: &Settings,
    interval_secs: u64,
    once: bool,
) -> Result<ExitCode> {
    let store = open_store(settings).await?;
    let gate = SentinelGate::new(settings.sentinel_dir.clone());

    let stall = StallDetector::new(
        store.clone(),
        gate.clone(),
        StallDetectorConfig {
            stall_threshold: settings.stall_threshold,
            lock_dir: settings.lock_dir.clone(),
            ..Default::default()
        },
    );
    let storage = StorageRecovery::new(
        store.clone(),
        gate.clone(),
        StorageRecoveryConfig {
            extra_paths: vec![settings.archive_root.clone()],
            ..Default::default()
        },
    );
    let reconciler = Reconciler::new(
        store,
        gate,
        ReconcilerConfig {
            lock_dir: settings.lock_dir.clone(),
        },
    );

    let schedule = WatchdogSchedule {
        interval: Duration::from_secs(interval_secs),
        once,
        ..Default::default()
    };
    run_watchdogs(stall, storage, reconciler, schedule, shutdown_token()).await;
    Ok(ExitCode::from(EXIT_OK))
}
