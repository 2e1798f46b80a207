//! Worker loop integration tests with a scripted fake crawler.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use healtharchive_crawler::{CrawlerDriver, DriverConfig};
use healtharchive_indexer::{IndexerConfig, IndexingPipeline};
use healtharchive_store::{JobStatus, NewJob, Store};
use healtharchive_worker::{Worker, WorkerConfig, WorkerError};

/// A fake crawler that writes one indexable WARC and a state file.
fn success_crawler(dir: &Path) -> PathBuf {
    let path = dir.join("fake-crawler.sh");
    let html = "<html><head><title>Page</title></head><body><main><p>Health \
                guidance for Canadians, with enough words that language \
                detection has something to work with here.</p></main></body></html>";
    let http = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{html}"
    );
    let record = format!(
        "WARC/1.0\r\nWARC-Type: response\r\nWARC-Target-URI: https://www.canada.ca/en/page.html\r\n\
         WARC-Date: 2026-08-01T12:00:00Z\r\nContent-Type: application/http; msgtype=response\r\n\
         Content-Length: {}\r\n\r\n{}\r\n\r\n",
        http.len(),
        http
    );
    let script = format!(
        r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--output-dir" ]; then out="$2"; fi
  shift
done
mkdir -p "$out/warcs"
printf '%s' '{record}' | gzip > "$out/warcs/crawl.warc.gz"
cat > "$out/.archive_state.json" <<EOF
{{"pages_crawled": 1, "container_restarts": 0, "current_workers": 1,
 "last_progress_timestamp": "2026-08-01T12:00:00Z", "stalled": false, "temp_dirs": []}}
EOF
exit 0
"#
    );
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

async fn create_job(store: &Store, jobs_root: &Path, name: &str, annual: bool) -> i64 {
    store
        .create_job(NewJob {
            source_code: "hc".to_string(),
            name: name.to_string(),
            output_dir: jobs_root.join(name).display().to_string(),
            config: json!({"seeds": ["https://www.canada.ca/en/health-canada.html"]}),
            max_retries: 2,
            campaign_kind: annual.then(|| "annual".to_string()),
            campaign_year: annual.then_some(2026),
        })
        .await
        .unwrap()
}

fn worker_config(scratch: &Path) -> WorkerConfig {
    let mut config = WorkerConfig::new(scratch.join("jobs"), scratch.join("locks"));
    config.poll_interval = Duration::from_millis(50);
    config.once = true;
    // Test tempdirs live on the root device, and the test host's disk
    // usage is whatever it is.
    config.root_guard = false;
    config.disk_high_watermark_pct = 100.0;
    config
}

#[tokio::test]
async fn once_runs_crawl_then_index_end_to_end() {
    let scratch = tempfile::tempdir().unwrap();
    let jobs_root = scratch.path().join("jobs");
    std::fs::create_dir_all(&jobs_root).unwrap();

    let store = Store::open_in_memory().await.unwrap();
    store.seed_sources().await.unwrap();
    let job_id = create_job(&store, &jobs_root, "hc-20260801", false).await;

    let config = worker_config(scratch.path());
    let driver = CrawlerDriver::new(
        store.clone(),
        DriverConfig {
            lock_dir: config.lock_dir.clone(),
            crawler_bin: success_crawler(scratch.path()),
            infra_cooldown: Duration::from_secs(60),
            term_grace: Duration::from_millis(200),
        },
    );
    let pipeline = IndexingPipeline::new(store.clone(), IndexerConfig::default());
    let worker = Worker::new(store.clone(), driver, pipeline, config.clone());

    worker.run(&CancellationToken::new()).await.unwrap();

    let job = store.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Indexed);
    assert_eq!(job.indexed_pages, Some(1));

    // The lock was released at the end of crawl + index.
    assert!(!healtharchive_crawler::is_held(&config.lock_dir, job_id));
}

#[tokio::test]
async fn once_with_empty_queue_exits_cleanly() {
    let scratch = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(scratch.path().join("jobs")).unwrap();
    let store = Store::open_in_memory().await.unwrap();
    store.seed_sources().await.unwrap();

    let config = worker_config(scratch.path());
    let driver = CrawlerDriver::new(
        store.clone(),
        DriverConfig {
            lock_dir: config.lock_dir.clone(),
            crawler_bin: success_crawler(scratch.path()),
            infra_cooldown: Duration::from_secs(60),
            term_grace: Duration::from_millis(200),
        },
    );
    let pipeline = IndexingPipeline::new(store.clone(), IndexerConfig::default());
    let worker = Worker::new(store.clone(), driver, pipeline, config);

    worker.run(&CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn annual_on_root_device_trips_the_guardrail() {
    let scratch = tempfile::tempdir().unwrap();
    let jobs_root = scratch.path().join("jobs");
    std::fs::create_dir_all(&jobs_root).unwrap();

    let store = Store::open_in_memory().await.unwrap();
    store.seed_sources().await.unwrap();
    let job_id = create_job(&store, &jobs_root, "hc-20260801", true).await;

    let mut config = worker_config(scratch.path());
    // Tempdirs share the root device in this test environment, which is
    // exactly the condition the guard refuses.
    config.root_guard = true;
    let driver = CrawlerDriver::new(
        store.clone(),
        DriverConfig {
            lock_dir: config.lock_dir.clone(),
            crawler_bin: success_crawler(scratch.path()),
            infra_cooldown: Duration::from_secs(60),
            term_grace: Duration::from_millis(200),
        },
    );
    let pipeline = IndexingPipeline::new(store.clone(), IndexerConfig::default());
    let worker = Worker::new(store.clone(), driver, pipeline, config);

    let err = worker.run(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, WorkerError::AnnualOutputOnRoot { .. }), "{err:?}");

    // Guardrail refusal is not a state transition.
    let job = store.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
}

#[tokio::test]
async fn held_lock_skips_the_pick() {
    let scratch = tempfile::tempdir().unwrap();
    let jobs_root = scratch.path().join("jobs");
    std::fs::create_dir_all(&jobs_root).unwrap();

    let store = Store::open_in_memory().await.unwrap();
    store.seed_sources().await.unwrap();
    let job_id = create_job(&store, &jobs_root, "hc-20260801", false).await;

    let config = worker_config(scratch.path());
    std::fs::create_dir_all(&config.lock_dir).unwrap();
    std::fs::write(config.lock_dir.join(format!("job-{job_id}.lock")), "1\n").unwrap();

    let driver = CrawlerDriver::new(
        store.clone(),
        DriverConfig {
            lock_dir: config.lock_dir.clone(),
            crawler_bin: success_crawler(scratch.path()),
            infra_cooldown: Duration::from_secs(60),
            term_grace: Duration::from_millis(200),
        },
    );
    let pipeline = IndexingPipeline::new(store.clone(), IndexerConfig::default());
    let worker = Worker::new(store.clone(), driver, pipeline, config);

    worker.run(&CancellationToken::new()).await.unwrap();

    // Untouched: still queued, no attempt recorded.
    let job = store.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert!(job.started_at.is_none());
}

/// A crawler that fails its first invocation and succeeds afterwards.
fn flaky_crawler(dir: &Path) -> PathBuf {
    let success = success_crawler(dir);
    let path = dir.join("flaky-crawler.sh");
    let marker = dir.join("first-run-done");
    let script = format!(
        r#"#!/bin/sh
if [ ! -f "{marker}" ]; then
  touch "{marker}"
  echo "crawler gave up after too many fetch errors"
  exit 2
fi
exec "{success}" "$@"
"#,
        marker = marker.display(),
        success = success.display()
    );
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

#[tokio::test]
async fn crawl_failure_retries_and_then_indexes() {
    let scratch = tempfile::tempdir().unwrap();
    let jobs_root = scratch.path().join("jobs");
    std::fs::create_dir_all(&jobs_root).unwrap();

    let store = Store::open_in_memory().await.unwrap();
    store.seed_sources().await.unwrap();
    let job_id = create_job(&store, &jobs_root, "hc-20260801", false).await;

    let config = worker_config(scratch.path());
    let driver_config = DriverConfig {
        lock_dir: config.lock_dir.clone(),
        crawler_bin: flaky_crawler(scratch.path()),
        infra_cooldown: Duration::from_secs(60),
        term_grace: Duration::from_millis(200),
    };
    let make_worker = || {
        Worker::new(
            store.clone(),
            CrawlerDriver::new(store.clone(), driver_config.clone()),
            IndexingPipeline::new(store.clone(), IndexerConfig::default()),
            config.clone(),
        )
    };

    // First pass: the crawl fails and charges one retry.
    make_worker().run(&CancellationToken::new()).await.unwrap();
    let job = store.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Retryable);
    assert_eq!(job.retry_count, 1);

    // Second pass: the re-pick succeeds and indexing runs.
    make_worker().run(&CancellationToken::new()).await.unwrap();
    let job = store.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Indexed);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.indexed_pages, Some(1));
}
