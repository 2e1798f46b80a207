//! Store error taxonomy.
//!
//! `Unavailable` is the connection-level failure class: callers treat it as
//! an infrastructure condition and must not consume a retry budget on it.
//! `StaleTransition` is reported to the caller and never retried internally.

use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job name already exists: {0}")]
    DuplicateName(String),

    #[error("job {job_id} is '{actual}', expected '{expected}'")]
    StaleTransition {
        job_id: i64,
        expected: String,
        actual: String,
    },

    #[error("job not found: {0}")]
    JobNotFound(i64),

    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Db(#[source] sqlx::Error),

    #[error("invalid row data: {0}")]
    InvalidRow(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => StoreError::Unavailable(err),
            other => StoreError::Db(other),
        }
    }
}

impl StoreError {
    /// True when the failure is connection-level rather than logical.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub(crate) fn from_insert(err: sqlx::Error, name: &str) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return StoreError::DuplicateName(name.to_string());
            }
        }
        err.into()
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
