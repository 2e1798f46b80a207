//! Crawl artifact discovery.
//!
//! One canonical procedure turns a job's output directory into a typed
//! [`CrawlArtifacts`] value: which WARCs to read and in what order, the
//! parsed manifest and state file when present, and any warnings. Every
//! consumer takes this value instead of re-walking the directory.

use std::path::{Path, PathBuf};

use tracing::debug;

use healtharchive_crawler::{read_state, ArchiveState, StateFileError};

use crate::manifest::{read_manifest, Manifest, ManifestError};

/// Name of the stable consolidation directory inside an output dir.
pub const STABLE_WARC_DIR: &str = "warcs";

/// Where the discovered WARCs live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarcLocation {
    /// Consolidated `warcs/` directory (preferred).
    Stable,
    /// Crawler `.tmp*` directories (crawl never consolidated).
    Temp,
}

/// Everything the indexing pipeline needs to know about a finished crawl.
#[derive(Debug)]
pub struct CrawlArtifacts {
    pub location: WarcLocation,
    /// Ordered list of WARC files to read.
    pub warc_files: Vec<PathBuf>,
    /// Parsed manifest, when the stable directory carries one.
    pub manifest: Option<Manifest>,
    /// Set when a manifest exists but could not be parsed; the pipeline
    /// treats this as fatal (a present-but-broken manifest means the
    /// consolidation step was interrupted).
    pub manifest_error: Option<String>,
    pub state: Option<ArchiveState>,
    pub warnings: Vec<String>,
}

impl CrawlArtifacts {
    pub fn is_empty(&self) -> bool {
        self.warc_files.is_empty()
    }
}

/// Discover the WARC files for a job's output directory.
///
/// Prefers `warcs/` (with its manifest) and falls back to `.tmp*`
/// directories. Missing manifest or state file are warnings, not errors.
pub fn discover_artifacts(output_dir: &Path) -> std::io::Result<CrawlArtifacts> {
    let mut warnings = Vec::new();

    let state = match read_state(output_dir) {
        Ok(state) => Some(state),
        Err(StateFileError::NotFound(_)) => None,
        Err(e) => {
            warnings.push(format!("state file unreadable: {e}"));
            None
        }
    };

    let stable_dir = output_dir.join(STABLE_WARC_DIR);
    let stable_warcs = if stable_dir.is_dir() {
        sorted_warcs_in(&stable_dir)?
    } else {
        Vec::new()
    };

    if !stable_warcs.is_empty() {
        let mut manifest_error = None;
        let manifest = match read_manifest(&stable_dir) {
            Ok(manifest) => Some(manifest),
            Err(ManifestError::NotFound(_)) => {
                warnings.push("stable warcs/ has no manifest.json".to_string());
                None
            }
            Err(e) => {
                manifest_error = Some(e.to_string());
                None
            }
        };
        debug!(
            count = stable_warcs.len(),
            dir = %stable_dir.display(),
            "Discovered stable WARCs"
        );
        return Ok(CrawlArtifacts {
            location: WarcLocation::Stable,
            warc_files: stable_warcs,
            manifest,
            manifest_error,
            state,
            warnings,
        });
    }

    // Fall back to the crawler's temp directories.
    let mut temp_warcs = Vec::new();
    for entry in output_dir.read_dir()? {
        let entry = entry?;
        let path = entry.path();
        let is_temp_dir = path.is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(".tmp"));
        if is_temp_dir {
            collect_warcs_recursive(&path, &mut temp_warcs)?;
        }
    }
    temp_warcs.sort();

    if temp_warcs.is_empty() {
        warnings.push("no WARC files found in warcs/ or .tmp* directories".to_string());
    } else {
        debug!(count = temp_warcs.len(), "Discovered temp WARCs");
    }

    Ok(CrawlArtifacts {
        location: WarcLocation::Temp,
        warc_files: temp_warcs,
        manifest: None,
        manifest_error: None,
        state,
        warnings,
    })
}

fn sorted_warcs_in(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut warcs: Vec<PathBuf> = dir
        .read_dir()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_warc_gz(path))
        .collect();
    warcs.sort();
    Ok(warcs)
}

fn collect_warcs_recursive(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in dir.read_dir()? {
        let path = entry?.path();
        if path.is_dir() {
            collect_warcs_recursive(&path, out)?;
        } else if is_warc_gz(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn is_warc_gz(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(".warc.gz"))
}

/// Remove the crawler's `.tmp*` directories from an output dir.
///
/// Callers confirm first that the stable `warcs/` directory is complete
/// (manifest presence check at minimum); this only does the deleting.
/// Returns the number of directories removed.
pub fn remove_temp_dirs(output_dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in output_dir.read_dir()? {
        let entry = entry?;
        let path = entry.path();
        let is_temp = path.is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(".tmp"));
        if is_temp {
            std::fs::remove_dir_all(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
