//! Job and snapshot store for the HealthArchive pipeline.
//!
//! SQLite-backed, single-writer by design: the worker loop owns the job
//! lifecycle, the watchdogs nudge it, and everything else reads. All status
//! changes are compare-and-set so concurrent writers fail loudly instead of
//! silently clobbering each other.

mod dedupe;
mod error;
mod models;
mod pages;
mod schema;
mod snapshots;
mod store;
mod topics;

pub use dedupe::{DedupGroup, DedupPlan, DEDUP_REASON_SAME_DAY};
pub use error::{Result, StoreError};
pub use models::{
    ArchiveJob, CleanupStatus, CrawlerStatus, JobFilter, JobStatus, NewJob, NewSnapshot, Outlink,
    Snapshot, Source, StatusCounts, Topic, TransitionFields,
};
pub use snapshots::{InsertOutcome, INSERT_BATCH_SIZE};
pub use store::{fmt_ts, parse_ts, Store, DEFAULT_SOURCES};
