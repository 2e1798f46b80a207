//! Database schema for the archive store.
//!
//! All timestamps are stored as TEXT in a fixed-width RFC 3339 UTC form so
//! that lexical comparison matches chronological order. `capture_timestamp`
//! is the 14-digit `YYYYMMDDhhmmss` form used in replay URLs.

pub const SCHEMA_SQL: &str = r#"
-- Sources: logical content origins, seeded once
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    label TEXT NOT NULL,
    base_url TEXT,
    stagger_offset_seconds INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- Archive jobs: one crawl attempt per row
CREATE TABLE IF NOT EXISTS archive_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_code TEXT NOT NULL REFERENCES sources(code),
    name TEXT NOT NULL UNIQUE,
    output_dir TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'queued'
        CHECK (status IN ('queued','running','completed','failed','retryable',
                          'indexed','index_failed','infra_error','infra_error_config')),
    config TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 2,
    queued_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    cleaned_at TEXT,
    index_started_at TEXT,
    cooldown_until TEXT,
    crawler_exit_code INTEGER,
    crawler_status TEXT,
    combined_log_path TEXT,
    cleanup_status TEXT NOT NULL DEFAULT 'none'
        CHECK (cleanup_status IN ('none','temp_cleaned')),
    warc_file_count INTEGER,
    indexed_pages INTEGER,
    index_error TEXT,
    campaign_kind TEXT,
    campaign_year INTEGER
);

CREATE INDEX IF NOT EXISTS idx_archive_jobs_pick
    ON archive_jobs(status, queued_at, id);

-- Snapshots: one captured page per row
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES archive_jobs(id),
    source_id INTEGER NOT NULL REFERENCES sources(id),
    url TEXT NOT NULL,
    normalized_url TEXT NOT NULL,
    normalized_url_group TEXT NOT NULL,
    capture_timestamp TEXT NOT NULL,
    warc_path TEXT NOT NULL,
    warc_record_offset INTEGER NOT NULL,
    warc_record_length INTEGER NOT NULL,
    title TEXT,
    text TEXT NOT NULL DEFAULT '',
    snippet TEXT NOT NULL DEFAULT '',
    language TEXT,
    content_hash TEXT NOT NULL,
    is_archived INTEGER,
    deduplicated INTEGER NOT NULL DEFAULT 0,
    http_status INTEGER,
    content_type TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(job_id, url, capture_timestamp)
);

CREATE INDEX IF NOT EXISTS idx_snapshots_job ON snapshots(job_id);
CREATE INDEX IF NOT EXISTS idx_snapshots_group
    ON snapshots(source_id, normalized_url_group);
CREATE INDEX IF NOT EXISTS idx_snapshots_dedup
    ON snapshots(job_id, normalized_url, content_hash);

-- Full-text search input. The four fields stay separately addressable so
-- the search API can apply per-field weights at query time; no weights are
-- baked into stored data. Contentless: rowid mirrors snapshots.id.
CREATE VIRTUAL TABLE IF NOT EXISTS snapshot_search USING fts5(
    title, snippet, url_tokens, body,
    content=''
);

-- Topics: static taxonomy, many-to-many with snapshots
CREATE TABLE IF NOT EXISTS topics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT NOT NULL UNIQUE,
    label TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS snapshot_topics (
    snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
    topic_id INTEGER NOT NULL REFERENCES topics(id),
    PRIMARY KEY (snapshot_id, topic_id)
);

-- Outbound links extracted at index time
CREATE TABLE IF NOT EXISTS snapshot_outlinks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
    target_url TEXT NOT NULL,
    target_url_group TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_outlinks_snapshot ON snapshot_outlinks(snapshot_id);
CREATE INDEX IF NOT EXISTS idx_outlinks_target ON snapshot_outlinks(target_url_group);

-- Per-page-group aggregate signals, recomputed out of band
CREATE TABLE IF NOT EXISTS page_signals (
    source_id INTEGER NOT NULL REFERENCES sources(id),
    normalized_url_group TEXT NOT NULL,
    inlink_count INTEGER NOT NULL DEFAULT 0,
    outlink_count INTEGER NOT NULL DEFAULT 0,
    pagerank REAL,
    recomputed_at TEXT NOT NULL,
    PRIMARY KEY (source_id, normalized_url_group)
);

-- Dedup audit trail; enables reversal
CREATE TABLE IF NOT EXISTS snapshot_deduplication (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    deduped_snapshot_id INTEGER NOT NULL UNIQUE REFERENCES snapshots(id),
    canonical_snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
    reason TEXT NOT NULL,
    deduped_at TEXT NOT NULL
);

-- Materialized aggregate: one row per page group per source, rebuildable
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    normalized_url_group TEXT NOT NULL,
    latest_snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
    latest_capture_timestamp TEXT NOT NULL,
    latest_url TEXT NOT NULL,
    latest_title TEXT,
    capture_count INTEGER NOT NULL,
    UNIQUE(source_id, normalized_url_group)
);
"#;
