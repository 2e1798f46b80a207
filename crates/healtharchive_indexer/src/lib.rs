//! WARC indexing pipeline for the HealthArchive snapshot store.
//!
//! Streams a completed job's WARC files into per-page snapshot rows:
//! discovery (stable `warcs/` or temp fallback), manifest verification,
//! gzip-member WARC reading with replay offsets, HTML extraction, URL
//! normalization, and idempotent batch writes.

mod discover;
mod extract;
mod manifest;
mod pipeline;
mod urlnorm;
mod warc;

pub use discover::{
    discover_artifacts, remove_temp_dirs, CrawlArtifacts, WarcLocation, STABLE_WARC_DIR,
};
pub use extract::{
    extract_page, ExtractedPage, MAX_OUTLINKS, MAX_SNIPPET_CHARS, MAX_TEXT_BYTES,
};
pub use manifest::{
    file_sha256, manifest_path, read_manifest, verify_manifest, LinkType, Manifest,
    ManifestError, ManifestRecord, VerifyEntry, VerifyLevel, VerifyReport, MANIFEST_FILE_NAME,
};
pub use pipeline::{IndexError, IndexReport, IndexerConfig, IndexingPipeline};
pub use urlnorm::{normalize_url, url_group};
pub use warc::{
    is_html, parse_http_response, HttpResponse, WarcError, WarcGzReader, WarcRecord,
};
