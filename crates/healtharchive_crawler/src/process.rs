//! Crawler subprocess supervision.
//!
//! The crawler runs in its own process group with stdout/stderr streamed
//! straight into the combined log file (never buffered in memory; crawls
//! can log for hours). Shutdown is TERM to the group, a grace period, then
//! KILL.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How a supervised crawl run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// None when the process died to a signal.
    pub exit_code: Option<i32>,
    /// The hard wall-clock ceiling fired and the process was killed.
    pub timed_out: bool,
    /// Shutdown was requested and the process was terminated.
    pub cancelled: bool,
}

/// Spawn the crawler and supervise it to completion.
pub async fn run_crawler(
    binary: &Path,
    args: &[String],
    combined_log_path: &Path,
    hard_timeout: Option<Duration>,
    term_grace: Duration,
    cancel: &CancellationToken,
) -> io::Result<ProcessExit> {
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(combined_log_path)?;
    let log_for_stderr = log_file.try_clone()?;

    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_for_stderr))
        .process_group(0);

    let mut child = command.spawn()?;
    let pid = child.id().map(|id| id as i32);
    info!(pid, binary = %binary.display(), "Spawned crawler");

    // No ceiling means the crawl may legitimately run for hours.
    let ceiling = async {
        match hard_timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        status = child.wait() => {
            Ok(ProcessExit {
                exit_code: status?.code(),
                timed_out: false,
                cancelled: false,
            })
        }
        _ = cancel.cancelled() => {
            warn!(pid, "Shutdown requested; terminating crawler");
            terminate_group(&mut child, pid, term_grace).await?;
            Ok(ProcessExit {
                exit_code: None,
                timed_out: false,
                cancelled: true,
            })
        }
        _ = ceiling => {
            warn!(pid, "Wall-clock ceiling reached; terminating crawler");
            terminate_group(&mut child, pid, term_grace).await?;
            Ok(ProcessExit {
                exit_code: None,
                timed_out: true,
                cancelled: false,
            })
        }
    }
}

/// TERM the whole process group, wait out the grace period, then KILL.
async fn terminate_group(child: &mut Child, pid: Option<i32>, grace: Duration) -> io::Result<()> {
    signal_group(pid, libc::SIGTERM);

    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        status?;
        return Ok(());
    }

    signal_group(pid, libc::SIGKILL);
    child.wait().await?;
    Ok(())
}

/// Deliver a signal to the crawler's process group; falls back to nothing
/// when the pid is already gone.
fn signal_group(pid: Option<i32>, signal: i32) {
    let Some(pid) = pid else { return };
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, signal, "Failed to signal crawler process group: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh_args(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn captures_exit_code_and_log_output() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("combined.log");

        let exit = run_crawler(
            Path::new("/bin/sh"),
            &sh_args("echo crawling; echo oops >&2; exit 3"),
            &log_path,
            None,
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(exit.exit_code, Some(3));
        assert!(!exit.timed_out);
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("crawling"));
        assert!(log.contains("oops"));
    }

    #[tokio::test]
    async fn hard_timeout_kills_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("combined.log");

        let start = Instant::now();
        let exit = run_crawler(
            Path::new("/bin/sh"),
            &sh_args("sleep 30"),
            &log_path,
            Some(Duration::from_millis(300)),
            Duration::from_millis(200),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(exit.timed_out);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_terminates_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("combined.log");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let exit = run_crawler(
            Path::new("/bin/sh"),
            &sh_args("sleep 30"),
            &log_path,
            None,
            Duration::from_millis(200),
            &cancel,
        )
        .await
        .unwrap();

        assert!(exit.cancelled);
        assert!(!exit.timed_out);
    }
}
