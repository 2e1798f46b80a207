//! The crawler's `.archive_state.json` sidecar.
//!
//! Written by the crawler subprocess (and rarely by admin tooling) via
//! write-to-temp + rename + fsync; readers tolerate one concurrent rename.
//! The schema is part of the crawler contract: unknown fields are allowed,
//! the listed fields are stable.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STATE_FILE_NAME: &str = ".archive_state.json";

/// Delay before the single retry on a reader-side ENOENT.
const READ_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum StateFileError {
    #[error("state file not found at {0}")]
    NotFound(PathBuf),

    #[error("state file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("state file is not valid JSON at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Crawler progress counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveState {
    #[serde(default)]
    pub pages_crawled: u64,
    #[serde(default)]
    pub container_restarts: u32,
    #[serde(default)]
    pub current_workers: u32,
    pub last_progress_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stalled: bool,
    #[serde(default)]
    pub temp_dirs: Vec<String>,
}

pub fn state_file_path(output_dir: &Path) -> PathBuf {
    output_dir.join(STATE_FILE_NAME)
}

/// Read the state file, retrying once on ENOENT to ride out a concurrent
/// temp-rename by the writer.
pub fn read_state(output_dir: &Path) -> Result<ArchiveState, StateFileError> {
    let path = state_file_path(output_dir);
    match read_state_once(&path) {
        Err(StateFileError::NotFound(_)) => {
            std::thread::sleep(READ_RETRY_DELAY);
            read_state_once(&path)
        }
        other => other,
    }
}

fn read_state_once(path: &Path) -> Result<ArchiveState, StateFileError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StateFileError::NotFound(path.to_path_buf()))
        }
        Err(source) => {
            return Err(StateFileError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&contents).map_err(|source| StateFileError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomically (re)write the state file: temp file in the same directory,
/// fsync, rename over the target, fsync the directory.
pub fn write_state(output_dir: &Path, state: &ArchiveState) -> Result<(), StateFileError> {
    let path = state_file_path(output_dir);
    let tmp_path = output_dir.join(format!("{}.tmp-{}", STATE_FILE_NAME, std::process::id()));

    let io_err = |source: io::Error, at: &Path| StateFileError::Io {
        path: at.to_path_buf(),
        source,
    };

    let payload = serde_json::to_vec_pretty(state).map_err(|source| StateFileError::Malformed {
        path: path.clone(),
        source,
    })?;

    let mut tmp = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| io_err(e, &tmp_path))?;
    tmp.write_all(&payload).map_err(|e| io_err(e, &tmp_path))?;
    tmp.sync_all().map_err(|e| io_err(e, &tmp_path))?;
    drop(tmp);

    fs::rename(&tmp_path, &path).map_err(|e| io_err(e, &path))?;

    // Persist the rename itself.
    if let Ok(dir) = File::open(output_dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> ArchiveState {
        ArchiveState {
            pages_crawled: 1234,
            container_restarts: 1,
            current_workers: 4,
            last_progress_timestamp: Some(Utc::now()),
            stalled: false,
            temp_dirs: vec![".tmpabc".to_string()],
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let state = sample_state();
        write_state(dir.path(), &state).unwrap();

        let read = read_state(dir.path()).unwrap();
        assert_eq!(read.pages_crawled, 1234);
        assert_eq!(read.temp_dirs, vec![".tmpabc".to_string()]);
        // No temp files left behind.
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn rewrite_replaces_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = sample_state();
        write_state(dir.path(), &state).unwrap();

        state.pages_crawled = 5000;
        state.stalled = true;
        write_state(dir.path(), &state).unwrap();

        let read = read_state(dir.path()).unwrap();
        assert_eq!(read.pages_crawled, 5000);
        assert!(read.stalled);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            state_file_path(dir.path()),
            r#"{"pages_crawled": 10, "last_progress_timestamp": null, "future_field": 1}"#,
        )
        .unwrap();

        let read = read_state(dir.path()).unwrap();
        assert_eq!(read.pages_crawled, 10);
        assert!(read.last_progress_timestamp.is_none());
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_state(dir.path()).unwrap_err();
        assert!(matches!(err, StateFileError::NotFound(_)), "{err:?}");
    }

    #[test]
    fn truncated_json_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(state_file_path(dir.path()), r#"{"pages_crawled": 10,"#).unwrap();
        let err = read_state(dir.path()).unwrap_err();
        assert!(matches!(err, StateFileError::Malformed { .. }), "{err:?}");
    }
}
