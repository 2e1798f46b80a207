//! Operator command implementations.
//!
//! Exit code convention: 0 success, 1 validation or operational failure,
//! 2 missing required state (job or artifact not there at all).

pub mod index;
pub mod job;
pub mod jobs;
pub mod output;
pub mod settings;
pub mod sources;
pub mod worker;

use std::process::ExitCode;

use anyhow::Result;

use healtharchive_store::{Store, StoreError};

use settings::Settings;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MISSING_STATE: u8 = 2;

pub async fn open_store(settings: &Settings) -> Result<Store> {
    Ok(Store::open(&settings.database_url).await?)
}

/// Fetch a job, mapping "not found" to exit code 2.
pub async fn get_job_or_exit(
    store: &Store,
    job_id: i64,
) -> Result<std::result::Result<healtharchive_store::ArchiveJob, ExitCode>> {
    match store.get_job(job_id).await {
        Ok(job) => Ok(Ok(job)),
        Err(StoreError::JobNotFound(_)) => {
            eprintln!("job {job_id} does not exist");
            Ok(Err(ExitCode::from(EXIT_MISSING_STATE)))
        }
        Err(e) => Err(e.into()),
    }
}
