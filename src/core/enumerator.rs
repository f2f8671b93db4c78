//! Artifact enumeration: turns the configured items into a flat file list.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{Span, debug, info, warn};

use crate::core::models::{ArtifactSpec, FileRecord};
use crate::error::{Result, SyncError};

/// A top-level item that was found under the source root.
#[derive(Debug, Clone)]
struct ResolvedItem {
    name: String,
    path: PathBuf,
    kind: ItemKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Directory,
    File { size: u64 },
    Other,
}

/// Discover every regular file inside the items of `spec`.
///
/// All items are checked for existence before any scanning starts, so a
/// missing item fails the call without touching anything. Items are then
/// walked concurrently on at most `workers_max` threads. Symlinks and special
/// files inside directories are skipped.
pub fn enumerate(
    source_root: &Path,
    spec: &ArtifactSpec,
    workers_max: usize,
) -> Result<Vec<FileRecord>> {
    if !source_root.is_dir() {
        return Err(SyncError::SourceNotDirectory(source_root.to_path_buf()));
    }

    let items = resolve_items(source_root, spec)?;

    let workers = items.len().min(workers_max).max(1);
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("scan-{i}"))
        .build()
        .map_err(|source| SyncError::WorkerPool { workers, source })?;

    debug!(workers, items = items.len(), "Scanning items");

    let span = Span::current();
    let per_item: Vec<Result<Vec<FileRecord>>> = pool.install(|| {
        items
            .par_iter()
            .map(|item| {
                let _enter = span.enter();
                scan_item(item)
            })
            .collect()
    });

    let mut records = Vec::new();
    for item_records in per_item {
        records.extend(item_records?);
    }

    Ok(records)
}

fn resolve_items(source_root: &Path, spec: &ArtifactSpec) -> Result<Vec<ResolvedItem>> {
    spec.items()
        .iter()
        .map(|name| {
            let path = source_root.join(name);

            // Top-level items follow symlinks, so a dangling link is missing.
            let metadata = fs::metadata(&path).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    SyncError::MissingItem {
                        name: name.clone(),
                        root: source_root.to_path_buf(),
                    }
                } else {
                    SyncError::Enumerate {
                        path: path.clone(),
                        source: e,
                    }
                }
            })?;

            let kind = if metadata.is_dir() {
                ItemKind::Directory
            } else if metadata.is_file() {
                ItemKind::File {
                    size: metadata.len(),
                }
            } else {
                ItemKind::Other
            };

            Ok(ResolvedItem {
                name: name.clone(),
                path,
                kind,
            })
        })
        .collect()
}

fn scan_item(item: &ResolvedItem) -> Result<Vec<FileRecord>> {
    let mut records = Vec::new();

    match item.kind {
        ItemKind::Directory => {
            scan_directory_recursive(&item.path, Path::new(&item.name), &mut records)?;
        }
        ItemKind::File { size } => records.push(FileRecord {
            source_path: item.path.clone(),
            relative_path: PathBuf::from(&item.name),
            size_bytes: size,
        }),
        ItemKind::Other => {
            warn!(item = %item.name, "Skipping item that is neither a file nor a directory");
        }
    }

    let bytes: u64 = records.iter().map(|r| r.size_bytes).sum();
    info!(item = %item.name, files = records.len(), bytes, "Scanned item");

    Ok(records)
}

fn scan_directory_recursive(
    current: &Path,
    relative: &Path,
    records: &mut Vec<FileRecord>,
) -> Result<()> {
    let entries = fs::read_dir(current).map_err(|source| SyncError::Enumerate {
        path: current.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| SyncError::Enumerate {
            path: current.to_path_buf(),
            source,
        })?;

        let path = entry.path();
        let entry_relative = relative.join(entry.file_name());

        // Use symlink_metadata to avoid following symlinks
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if metadata.is_dir() {
            scan_directory_recursive(&path, &entry_relative, records)?;
        } else if metadata.is_file() {
            records.push(FileRecord {
                source_path: path,
                relative_path: entry_relative,
                size_bytes: metadata.len(),
            });
        } else {
            debug!(path = %path.display(), "Skipping symlink or special file");
        }
    }

    Ok(())
}
