//! The consolidated WARC directory's `manifest.json`.
//!
//! Written by the crawler when it consolidates `.tmp*` WARCs into
//! `warcs/`; verified here before indexing trusts the stable directory.
//! Verification problems are reported, not thrown: a missing file skips
//! its records, it does not abort the job.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest not found at {0}")]
    NotFound(PathBuf),

    #[error("manifest I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest is not valid JSON at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Hardlink,
    Copy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// Original path in the temp crawl directory.
    pub source_path: String,
    pub stable_name: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub link_type: LinkType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub records: Vec<ManifestRecord>,
}

/// How much of the manifest to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerifyLevel {
    Presence,
    Size,
    Hash,
}

impl VerifyLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "presence" => Some(Self::Presence),
            "size" => Some(Self::Size),
            "hash" => Some(Self::Hash),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Presence => "presence",
            Self::Size => "size",
            Self::Hash => "hash",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyEntry {
    pub stable_name: String,
    pub ok: bool,
    pub problem: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub level: String,
    pub entries: Vec<VerifyEntry>,
}

impl VerifyReport {
    pub fn all_ok(&self) -> bool {
        self.entries.iter().all(|e| e.ok)
    }
}

pub fn manifest_path(warcs_dir: &Path) -> PathBuf {
    warcs_dir.join(MANIFEST_FILE_NAME)
}

pub fn read_manifest(warcs_dir: &Path) -> Result<Manifest, ManifestError> {
    let path = manifest_path(warcs_dir);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ManifestError::NotFound(path))
        }
        Err(source) => return Err(ManifestError::Io { path, source }),
    };
    serde_json::from_str(&contents).map_err(|source| ManifestError::Malformed { path, source })
}

/// Verify each manifest entry against the stable directory at the given
/// level. Higher levels imply the lower ones.
pub fn verify_manifest(warcs_dir: &Path, manifest: &Manifest, level: VerifyLevel) -> VerifyReport {
    let entries = manifest
        .records
        .iter()
        .map(|record| verify_entry(warcs_dir, record, level))
        .collect();
    VerifyReport {
        level: level.as_str().to_string(),
        entries,
    }
}

fn verify_entry(warcs_dir: &Path, record: &ManifestRecord, level: VerifyLevel) -> VerifyEntry {
    let path = warcs_dir.join(&record.stable_name);
    let entry = |ok: bool, problem: Option<String>| VerifyEntry {
        stable_name: record.stable_name.clone(),
        ok,
        problem,
    };

    let metadata = match std::fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(_) => return entry(false, Some("file missing".to_string())),
    };

    if level >= VerifyLevel::Size && metadata.len() != record.size_bytes {
        return entry(
            false,
            Some(format!(
                "size mismatch: manifest {} bytes, file {} bytes",
                record.size_bytes,
                metadata.len()
            )),
        );
    }

    if level >= VerifyLevel::Hash {
        match file_sha256(&path) {
            Ok(actual) if actual == record.sha256 => {}
            Ok(actual) => {
                return entry(
                    false,
                    Some(format!("hash mismatch: manifest {}, file {}", record.sha256, actual)),
                )
            }
            Err(e) => return entry(false, Some(format!("unreadable: {e}"))),
        }
    }

    entry(true, None)
}

/// Streaming SHA-256 of a file.
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}
