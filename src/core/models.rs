use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core::destination::INCOMPLETE_MARKER;
use crate::error::{Result, SyncError};

/// Ordered, de-duplicated list of top-level item names under the source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    items: Vec<String>,
}

impl ArtifactSpec {
    pub fn new<I, S>(items: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = Vec::new();

        for raw in items {
            let name = validate_item_name(raw.as_ref())?;
            if !names.contains(&name) {
                names.push(name);
            }
        }

        if names.is_empty() {
            return Err(SyncError::NoItems);
        }

        Ok(Self { items: names })
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Item names must be a single plain path component so that every relative
/// path stays inside both roots.
fn validate_item_name(raw: &str) -> Result<String> {
    let invalid = |reason| SyncError::InvalidItem {
        name: raw.to_string(),
        reason,
    };

    if raw.trim().is_empty() {
        return Err(invalid("name is empty"));
    }

    let mut components = Path::new(raw).components();
    let name = match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => name.to_string_lossy().into_owned(),
        (Some(Component::Normal(_)), Some(_)) => {
            return Err(invalid("must be a direct child of the source root"));
        }
        _ => return Err(invalid("must not be absolute or relative to a parent")),
    };

    if name == INCOMPLETE_MARKER {
        return Err(invalid("name is reserved for the completion marker"));
    }

    Ok(name)
}

/// One regular file discovered during enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub source_path: PathBuf,
    /// Path relative to the source root, e.g. `public/img/logo.png`.
    pub relative_path: PathBuf,
    pub size_bytes: u64,
}

/// Result of copying a single file.
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub result: CopyResult,
}

#[derive(Debug, Clone)]
pub enum CopyResult {
    Copied {
        bytes: u64,
        /// BLAKE3 of the bytes read, when hashing was requested.
        hash: Option<[u8; 32]>,
    },
    Failed {
        message: String,
    },
}

/// A file that did not make it to the destination intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyFailure {
    pub relative_path: PathBuf,
    pub message: String,
}

/// Hash of a file computed while it was copied.
#[derive(Debug, Clone)]
pub struct FileHash {
    pub relative_path: PathBuf,
    pub hash: [u8; 32],
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Complete,
    CompletedWithFailures,
    Cancelled,
}

/// End-of-run statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub files_scanned: u64,
    pub bytes_scanned: u64,
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub scan_secs: f64,
    pub copy_secs: f64,
    /// Copy-stage throughput; scan time is excluded.
    pub throughput_mbps: f64,
    pub files_verified: Option<u64>,
    pub cancelled: bool,
    pub failures: Vec<CopyFailure>,
}

impl RunSummary {
    pub fn outcome(&self) -> RunOutcome {
        if self.cancelled {
            RunOutcome::Cancelled
        } else if self.failures.is_empty() {
            RunOutcome::Complete
        } else {
            RunOutcome::CompletedWithFailures
        }
    }
}
