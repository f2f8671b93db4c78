//! Errors that abort a sync run.
//!
//! Per-file copy problems are not errors at this level; they are collected as
//! [`CopyFailure`](crate::core::CopyFailure) records and never stop the batch.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid item name {name:?}: {reason}")]
    InvalidItem { name: String, reason: &'static str },

    #[error("no items configured")]
    NoItems,

    #[error("no destination root configured")]
    NoDestination,

    #[error("source root is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),

    #[error("missing item {name:?} under {}", .root.display())]
    MissingItem { name: String, root: PathBuf },

    #[error("failed to scan {}: {source}", .path.display())]
    Enumerate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no files found in configured items")]
    NoFiles,

    #[error("destination {} overlaps source {}", .destination.display(), .source_path.display())]
    Overlap {
        source_path: PathBuf,
        destination: PathBuf,
    },

    #[error("destination exists and is not a directory: {}", .0.display())]
    DestinationNotDirectory(PathBuf),

    #[error("failed to prepare destination {}: {source}", .path.display())]
    DestinationPrep {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to build worker pool with {workers} threads: {source}")]
    WorkerPool {
        workers: usize,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigWriteError {
    #[error("{} already exists; pass --force to overwrite", .0.display())]
    AlreadyExists(PathBuf),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
