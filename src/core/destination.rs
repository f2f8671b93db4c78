//! Destination root preparation and the in-progress marker.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::core::models::ArtifactSpec;
use crate::error::{Result, SyncError};

/// Present in the destination root while a run is in flight or after a run
/// that did not finish cleanly.
pub const INCOMPLETE_MARKER: &str = ".deploy-sync-incomplete";

/// Refuse destinations that would be cleared into the source or copied into
/// themselves: the destination may not contain the source root, nor live
/// inside any configured item.
pub fn check_overlap(source_root: &Path, spec: &ArtifactSpec, destination: &Path) -> Result<()> {
    let source = normalize(source_root);
    let dest = normalize(destination);

    let overlap = || SyncError::Overlap {
        source_path: source_root.to_path_buf(),
        destination: destination.to_path_buf(),
    };

    if source.starts_with(&dest) {
        return Err(overlap());
    }

    for name in spec.items() {
        if dest.starts_with(normalize(&source_root.join(name))) {
            return Err(overlap());
        }
    }

    Ok(())
}

/// Canonicalize the longest existing prefix of `path` and resolve the rest
/// lexically, so paths that do not exist yet still compare correctly.
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };

    let mut existing = absolute.clone();
    let mut tail = Vec::new();
    let mut resolved = loop {
        if let Ok(canonical) = fs::canonicalize(&existing) {
            break canonical;
        }
        match existing.components().next_back() {
            Some(last @ (Component::Normal(_) | Component::ParentDir | Component::CurDir)) => {
                tail.push(last.as_os_str().to_os_string());
                existing.pop();
            }
            _ => return absolute,
        }
    };

    // Nothing in the tail exists, so `..` cannot cross a symlink here.
    for part in tail.iter().rev() {
        if part == ".." {
            resolved.pop();
        } else if part != "." {
            resolved.push(part);
        }
    }

    resolved
}

/// Create the destination root, or empty it if it already exists, then drop
/// the in-progress marker into it.
pub fn prepare(destination: &Path) -> Result<()> {
    let prep_err = |source: io::Error| SyncError::DestinationPrep {
        path: destination.to_path_buf(),
        source,
    };

    // The root itself may be a symlink to the real deploy directory.
    match fs::metadata(destination) {
        Ok(metadata) if metadata.is_dir() => {
            let removed = clear_directory(destination).map_err(prep_err)?;
            info!(
                destination = %destination.display(),
                removed,
                "Cleared existing destination"
            );
        }
        Ok(_) => return Err(SyncError::DestinationNotDirectory(destination.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(destination).map_err(prep_err)?;
            info!(destination = %destination.display(), "Created destination");
        }
        Err(e) => return Err(prep_err(e)),
    }

    fs::write(destination.join(INCOMPLETE_MARKER), b"").map_err(prep_err)?;
    Ok(())
}

/// Remove every entry directly under `dir`. Symlinks are unlinked, never
/// followed. Returns the number of top-level entries removed.
fn clear_directory(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            remove_file_or_link(&path, &file_type)?;
        }

        debug!(path = %path.display(), "Removed stale entry");
        removed += 1;
    }

    Ok(removed)
}

#[cfg(windows)]
fn remove_file_or_link(path: &Path, file_type: &fs::FileType) -> io::Result<()> {
    use std::os::windows::fs::FileTypeExt;

    if file_type.is_symlink_dir() {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(not(windows))]
fn remove_file_or_link(path: &Path, _file_type: &fs::FileType) -> io::Result<()> {
    fs::remove_file(path)
}

/// Remove the in-progress marker after a clean run.
pub fn mark_complete(destination: &Path) -> io::Result<()> {
    match fs::remove_file(destination.join(INCOMPLETE_MARKER)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

pub fn is_marked_incomplete(destination: &Path) -> bool {
    destination.join(INCOMPLETE_MARKER).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_destination_with_parents() {
        let temp = tempdir().unwrap();
        let dest = temp.path().join("deploy/site/current");

        prepare(&dest).unwrap();

        assert!(dest.is_dir());
        assert!(is_marked_incomplete(&dest));
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 1);
    }

    #[test]
    fn clears_stale_files_and_directories() {
        let temp = tempdir().unwrap();
        let dest = temp.path().join("dest");
        fs::create_dir_all(dest.join("old_dir/nested")).unwrap();
        fs::write(dest.join("old.txt"), b"stale").unwrap();
        fs::write(dest.join("old_dir/nested/file"), b"stale").unwrap();

        prepare(&dest).unwrap();

        assert!(!dest.join("old.txt").exists());
        assert!(!dest.join("old_dir").exists());
        assert!(is_marked_incomplete(&dest));
    }

    #[cfg(unix)]
    #[test]
    fn clearing_does_not_follow_symlinks() {
        use std::os::unix::fs::symlink;

        let temp = tempdir().unwrap();
        let keep = temp.path().join("keep");
        let dest = temp.path().join("dest");
        fs::create_dir_all(&keep).unwrap();
        fs::write(keep.join("precious.txt"), b"keep me").unwrap();
        fs::create_dir_all(&dest).unwrap();
        symlink(&keep, dest.join("link")).unwrap();

        prepare(&dest).unwrap();

        assert!(!dest.join("link").exists());
        assert!(keep.join("precious.txt").exists());
    }

    #[test]
    fn rejects_file_as_destination() {
        let temp = tempdir().unwrap();
        let dest = temp.path().join("dest");
        fs::write(&dest, b"not a dir").unwrap();

        let err = prepare(&dest).unwrap_err();
        assert!(matches!(err, SyncError::DestinationNotDirectory(_)));
    }

    #[test]
    fn mark_complete_is_idempotent() {
        let temp = tempdir().unwrap();
        prepare(temp.path()).unwrap();

        mark_complete(temp.path()).unwrap();
        assert!(!is_marked_incomplete(temp.path()));
        mark_complete(temp.path()).unwrap();
    }

    #[test]
    fn overlap_detection() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("app");
        fs::create_dir_all(root.join("public")).unwrap();
        let spec = ArtifactSpec::new(["public"]).unwrap();

        // Destination is the source root or one of its ancestors.
        assert!(check_overlap(&root, &spec, &root).is_err());
        assert!(check_overlap(&root, &spec, temp.path()).is_err());
        // Destination nested inside an item, even if it does not exist yet.
        assert!(check_overlap(&root, &spec, &root.join("public/out")).is_err());
        // Siblings and unrelated directories under the root are fine.
        assert!(check_overlap(&root, &spec, &temp.path().join("deploy")).is_ok());
        assert!(check_overlap(&root, &spec, &root.join("deploy-out")).is_ok());
    }

    #[test]
    fn overlap_detection_resolves_parent_components_in_missing_tail() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("app");
        fs::create_dir_all(root.join("public")).unwrap();
        let spec = ArtifactSpec::new(["public"]).unwrap();

        let through_missing = root.join("nope/../public/out");
        assert!(check_overlap(&root, &spec, &through_missing).is_err());
        assert!(check_overlap(&root, &spec, &root.join("nope/../..")).is_err());

        let outside = root.join("nope/../../deploy");
        assert!(check_overlap(&root, &spec, &outside).is_ok());
    }
}
