//! HealthArchive operator CLI.
//!
//! `ha` drives the archival pipeline: job creation, the single-writer
//! worker, standalone crawl/index runs, watchdogs, and snapshot
//! maintenance. Exit codes: 0 success, 1 validation or operational
//! failure, 2 missing required state.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use healtharchive_logging::{init_logging, LogConfig};

mod cli;

use cli::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "ha", about = "HealthArchive archival pipeline", version)]
struct Cli {
    /// Verbose logging to stderr (file logging is always on)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Insert the default source rows (hc, phac, cihr)
    SeedSources,

    /// Create a queued crawl job
    CreateJob(cli::job::CreateJobArgs),

    /// Run one crawl attempt for a stored job
    RunDbJob {
        #[arg(long)]
        id: i64,
    },

    /// Index a completed job's WARCs into snapshots
    IndexJob {
        #[arg(long)]
        id: i64,
    },

    /// Put a failed (or index-failed) job back on the queue's path
    RetryJob {
        #[arg(long)]
        id: i64,
    },

    /// List jobs
    ListJobs {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },

    /// Show one job in full
    ShowJob {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        json: bool,
    },

    /// Run the single-writer worker loop
    StartWorker {
        #[arg(long, default_value_t = 10)]
        poll_interval: u64,
        /// Process at most one job, then exit
        #[arg(long)]
        once: bool,
        /// Only pick annual-campaign jobs
        #[arg(long)]
        annual_only: bool,
        /// Disable the annual-output-on-root-device guardrail
        #[arg(long)]
        no_root_guard: bool,
    },

    /// Run the stall/storage/reconciler watchdog loops
    StartWatchdogs {
        #[arg(long, default_value_t = 60)]
        interval: u64,
        /// Run each loop once, then exit
        #[arg(long)]
        once: bool,
    },

    /// Patch tool options on a stored job config
    PatchJobConfig {
        #[arg(long)]
        id: i64,
        /// k=v patch against tool_options (repeatable)
        #[arg(long = "set-tool-option")]
        set_tool_option: Vec<String>,
        #[arg(long)]
        apply: bool,
    },

    /// Reset a job's retry budget
    ResetRetryCount {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        apply: bool,
    },

    /// Recover running jobs whose runtime owner is gone
    RecoverStaleJobs {
        #[arg(long)]
        apply: bool,
    },

    /// Verify consolidated WARCs against their manifest
    VerifyWarcManifest {
        #[arg(long)]
        id: i64,
        #[arg(long, default_value = "size")]
        level: String,
        #[arg(long)]
        json: bool,
    },

    /// Flag same-day duplicate snapshots
    DedupeSnapshots {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        apply: bool,
    },

    /// Reverse a dedup pass via the audit table
    RestoreDedupedSnapshots {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        apply: bool,
    },

    /// Remove temp crawl directories once WARCs are consolidated
    CleanupJob {
        #[arg(long)]
        id: i64,
        #[arg(long, default_value = "temp")]
        mode: String,
    },

    /// Recompute per-page-group link signals
    RecomputePageSignals,

    /// Rebuild the pages aggregate from snapshots
    RebuildPages,

    /// Job counts by status and running-job details
    WorkerStatus {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    // Held for the life of the process so the file writer keeps flushing.
    let _log_guard = match init_logging(LogConfig {
        app_name: "ha",
        verbose: args.verbose,
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e:#}");
            return ExitCode::from(cli::EXIT_FAILURE);
        }
    };

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(cli::EXIT_FAILURE)
        }
    }
}

async fn run(args: Cli) -> Result<ExitCode> {
    let settings = Settings::from_env()?;

    match args.command {
        Commands::SeedSources => cli::sources::seed_sources(&settings).await,
        Commands::CreateJob(create_args) => cli::job::create_job(&settings, create_args).await,
        Commands::RunDbJob { id } => cli::job::run_db_job(&settings, id).await,
        Commands::IndexJob { id } => cli::index::index_job(&settings, id).await,
        Commands::RetryJob { id } => cli::job::retry_job(&settings, id).await,
        Commands::ListJobs {
            status,
            source,
            limit,
            json,
        } => cli::jobs::list_jobs(&settings, status, source, limit, json).await,
        Commands::ShowJob { id, json } => cli::jobs::show_job(&settings, id, json).await,
        Commands::StartWorker {
            poll_interval,
            once,
            annual_only,
            no_root_guard,
        } => {
            cli::worker::start_worker(&settings, poll_interval, once, annual_only, no_root_guard)
                .await
        }
        Commands::StartWatchdogs { interval, once } => {
            cli::worker::start_watchdogs(&settings, interval, once).await
        }
        Commands::PatchJobConfig {
            id,
            set_tool_option,
            apply,
        } => cli::job::patch_job_config(&settings, id, set_tool_option, apply).await,
        Commands::ResetRetryCount { id, apply } => {
            cli::job::reset_retry_count(&settings, id, apply).await
        }
        Commands::RecoverStaleJobs { apply } => {
            cli::job::recover_stale_jobs(&settings, apply).await
        }
        Commands::VerifyWarcManifest { id, level, json } => {
            cli::index::verify_warc_manifest(&settings, id, &level, json).await
        }
        Commands::DedupeSnapshots { id, apply } => {
            cli::index::dedupe_snapshots(&settings, id, apply).await
        }
        Commands::RestoreDedupedSnapshots { id, apply } => {
            cli::index::restore_deduped_snapshots(&settings, id, apply).await
        }
        Commands::CleanupJob { id, mode } => cli::job::cleanup_job(&settings, id, &mode).await,
        Commands::RecomputePageSignals => cli::index::recompute_page_signals(&settings).await,
        Commands::RebuildPages => cli::index::rebuild_pages(&settings).await,
        Commands::WorkerStatus { json } => cli::jobs::worker_status(&settings, json).await,
    }
}
