//! Crawler driver for the HealthArchive pipeline.
//!
//! Turns a job row's stored configuration into a supervised crawler
//! subprocess run and records the outcome. The classification of an exit —
//! success, crawl failure, infra error, config error — decides whether the
//! retry budget is charged, and is the only place that decision lives.

mod classify;
mod command;
mod config;
mod driver;
mod lock;
mod process;
mod state_file;

pub use classify::{classify, Classification, ClassifyInput, OutcomeKind, EXIT_USAGE};
pub use command::build_crawler_args;
pub use config::{ConfigError, JobConfig, ToolOptions};
pub use driver::{
    count_warc_files, read_log_tail, CrawlError, CrawlReport, CrawlerDriver, DriverConfig,
    COMBINED_LOG_NAME,
};
pub use lock::{
    is_held, lock_path, pid_alive, read_holder_pid, remove_if_stale, JobLock, LockError,
};
pub use process::{run_crawler, ProcessExit};
pub use state_file::{
    read_state, state_file_path, write_state, ArchiveState, StateFileError, STATE_FILE_NAME,
};
