//! Per-job filesystem locks.
//!
//! One lock file per job in a dedicated directory, created with
//! `O_CREAT|O_EXCL` and removed on release. The owner PID is written into
//! the file so a crashed worker's leftover lock can be reclaimed once the
//! PID is gone.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("job lock already held: {path}")]
    Held { path: PathBuf, holder_pid: Option<i32> },

    #[error("lock I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub fn lock_path(lock_dir: &Path, job_id: i64) -> PathBuf {
    lock_dir.join(format!("job-{job_id}.lock"))
}

/// Guard for an acquired per-job lock. Dropping unlinks the file.
#[derive(Debug)]
pub struct JobLock {
    path: PathBuf,
    released: bool,
}

impl JobLock {
    /// Acquire the lock for `job_id`, writing our PID into the file.
    pub fn acquire(lock_dir: &Path, job_id: i64) -> Result<Self, LockError> {
        fs::create_dir_all(lock_dir).map_err(|source| LockError::Io {
            path: lock_dir.to_path_buf(),
            source,
        })?;

        let path = lock_path(lock_dir, job_id);
        let result = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o664)
            .open(&path);

        match result {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", std::process::id()) {
                    warn!("Failed to write PID into lock {}: {}", path.display(), e);
                }
                debug!("Acquired job lock {}", path.display());
                Ok(Self { path, released: false })
            }
            Err(source) if source.kind() == io::ErrorKind::AlreadyExists => Err(LockError::Held {
                holder_pid: read_holder_pid(&path),
                path,
            }),
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly; errors are reported instead of swallowed.
    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        fs::remove_file(&self.path)
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove job lock {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

/// PID recorded in a lock file, if readable.
pub fn read_holder_pid(path: &Path) -> Option<i32> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

/// Whether a lock file currently exists for the job.
pub fn is_held(lock_dir: &Path, job_id: i64) -> bool {
    lock_path(lock_dir, job_id).exists()
}

/// Whether a PID refers to a live process.
///
/// `kill(pid, 0)` probes without signalling; EPERM still means alive.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Remove the job's lock file when its recorded holder is dead.
///
/// Returns true when a stale lock was removed. A lock with a live holder or
/// no lock at all is left alone.
pub fn remove_if_stale(lock_dir: &Path, job_id: i64) -> io::Result<bool> {
    let path = lock_path(lock_dir, job_id);
    let Some(pid) = read_holder_pid(&path) else {
        return Ok(false);
    };
    if pid_alive(pid) {
        return Ok(false);
    }
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!("Removed stale lock {} (pid {} is gone)", path.display(), pid);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_exclusive_and_release_unlinks() {
        let dir = tempfile::tempdir().unwrap();
        let lock = JobLock::acquire(dir.path(), 7).unwrap();
        assert!(is_held(dir.path(), 7));

        let err = JobLock::acquire(dir.path(), 7).unwrap_err();
        match err {
            LockError::Held { holder_pid, .. } => {
                assert_eq!(holder_pid, Some(std::process::id() as i32));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        lock.release().unwrap();
        assert!(!is_held(dir.path(), 7));
        let relock = JobLock::acquire(dir.path(), 7).unwrap();
        drop(relock);
        assert!(!is_held(dir.path(), 7));
    }

    #[test]
    fn stale_lock_is_reclaimed_when_holder_is_dead() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path(), 9);
        // PID far above any real pid on the test host.
        fs::write(&path, "999999999\n").unwrap();

        assert!(remove_if_stale(dir.path(), 9).unwrap());
        assert!(!path.exists());
        // Idempotent once the file is gone.
        assert!(!remove_if_stale(dir.path(), 9).unwrap());
    }

    #[test]
    fn live_holder_is_not_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = JobLock::acquire(dir.path(), 3).unwrap();
        assert!(!remove_if_stale(dir.path(), 3).unwrap());
        assert!(is_held(dir.path(), 3));
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_alive(std::process::id() as i32));
        assert!(!pid_alive(0));
    }
}
