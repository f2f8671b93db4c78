use std::fmt::Write;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::core::models::{CopyFailure, FileHash};

const HASH_BUFFER_SIZE: usize = 128 * 1024;

/// Result of a verification pass
#[derive(Debug, Default)]
pub struct VerifyResult {
    pub files_verified: u64,
    pub bytes_verified: u64,
    pub mismatches: Vec<FileMismatch>,
}

/// Details of a file that failed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMismatch {
    pub relative_path: PathBuf,
    pub reason: MismatchReason,
}

/// Reason a file failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    /// BLAKE3 hash of source and destination differ
    HashMismatch,
    /// File was copied but is no longer in the destination
    MissingInDestination,
}

impl MismatchReason {
    fn as_str(self) -> &'static str {
        match self {
            MismatchReason::HashMismatch => "hash mismatch",
            MismatchReason::MissingInDestination => "missing in destination",
        }
    }
}

impl From<FileMismatch> for CopyFailure {
    fn from(m: FileMismatch) -> Self {
        CopyFailure {
            relative_path: m.relative_path,
            message: format!("Verification failed: {}", m.reason.as_str()),
        }
    }
}

/// Verify destination files against hashes computed during the copy.
///
/// Only destination files are read; source bytes were hashed as they were
/// copied. Every mismatch is collected rather than stopping at the first.
pub fn verify_from_hashes(destination: &Path, file_hashes: &[FileHash]) -> VerifyResult {
    let total = file_hashes.len() as u64;

    info!(total_files = total, "Starting hash verification");

    let mut result = VerifyResult::default();

    for fh in file_hashes {
        let dest_path = destination.join(&fh.relative_path);

        debug!(file = %fh.relative_path.display(), "Verifying file");

        if !dest_path.exists() {
            result.mismatches.push(FileMismatch {
                relative_path: fh.relative_path.clone(),
                reason: MismatchReason::MissingInDestination,
            });
            continue;
        }

        match hash_file_sync(&dest_path) {
            Ok(dest_hash) if dest_hash.as_bytes() == &fh.hash => {
                result.files_verified += 1;
                result.bytes_verified += fh.size;
            }
            Ok(_) => result.mismatches.push(FileMismatch {
                relative_path: fh.relative_path.clone(),
                reason: MismatchReason::HashMismatch,
            }),
            Err(e) => {
                debug!(
                    file = %fh.relative_path.display(),
                    error = %e,
                    "Failed to hash destination file"
                );
                result.mismatches.push(FileMismatch {
                    relative_path: fh.relative_path.clone(),
                    reason: MismatchReason::HashMismatch,
                });
            }
        }
    }

    if result.mismatches.is_empty() {
        info!(
            files_verified = result.files_verified,
            bytes_verified = result.bytes_verified,
            "Verification complete"
        );
    } else {
        warn!("{}", format_mismatch_error(&result.mismatches));
    }

    result
}

/// Mismatches spelled out individually in the summary warning.
const LISTED_MISMATCHES: usize = 10;

fn hash_file_sync(path: &Path) -> io::Result<blake3::Hash> {
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, File::open(path)?);
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize())
}

fn format_mismatch_error(mismatches: &[FileMismatch]) -> String {
    let mut msg = format!("{} file(s) failed verification", mismatches.len());

    for m in mismatches.iter().take(LISTED_MISMATCHES) {
        let _ = write!(msg, "\n  {}: {}", m.relative_path.display(), m.reason.as_str());
    }

    let unlisted = mismatches.len().saturating_sub(LISTED_MISMATCHES);
    if unlisted > 0 {
        let _ = write!(msg, "\n  ({unlisted} more not shown)");
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Helper to create a FileHash from content
    fn make_hash(relative_path: &str, content: &[u8]) -> FileHash {
        let hash = blake3::hash(content);
        FileHash {
            relative_path: PathBuf::from(relative_path),
            hash: *hash.as_bytes(),
            size: content.len() as u64,
        }
    }

    #[test]
    fn test_verify_from_hashes_success() {
        let temp = tempdir().unwrap();
        let dest = temp.path().join("dest");

        std::fs::create_dir_all(dest.join("public")).unwrap();
        std::fs::write(dest.join("server.js"), b"hello world").unwrap();
        std::fs::write(dest.join("public/nested.txt"), b"nested content").unwrap();

        let file_hashes = vec![
            make_hash("server.js", b"hello world"),
            make_hash("public/nested.txt", b"nested content"),
        ];

        let result = verify_from_hashes(&dest, &file_hashes);
        assert!(result.mismatches.is_empty());
        assert_eq!(result.files_verified, 2);
        assert_eq!(result.bytes_verified, 25);
    }

    #[test]
    fn test_verify_from_hashes_collects_all_mismatches() {
        let temp = tempdir().unwrap();
        let dest = temp.path().join("dest");
        std::fs::create_dir_all(&dest).unwrap();

        std::fs::write(dest.join("a.txt"), b"wrong a").unwrap();
        // b.txt is missing
        std::fs::write(dest.join("c.txt"), b"content c").unwrap();

        let file_hashes = vec![
            make_hash("a.txt", b"content a"),
            make_hash("b.txt", b"content b"),
            make_hash("c.txt", b"content c"),
        ];

        let result = verify_from_hashes(&dest, &file_hashes);
        assert_eq!(result.files_verified, 1);
        assert_eq!(
            result.mismatches,
            vec![
                FileMismatch {
                    relative_path: PathBuf::from("a.txt"),
                    reason: MismatchReason::HashMismatch,
                },
                FileMismatch {
                    relative_path: PathBuf::from("b.txt"),
                    reason: MismatchReason::MissingInDestination,
                },
            ]
        );
    }

    #[test]
    fn test_mismatch_converts_to_copy_failure() {
        let failure = CopyFailure::from(FileMismatch {
            relative_path: PathBuf::from("public/a.txt"),
            reason: MismatchReason::MissingInDestination,
        });
        assert_eq!(failure.relative_path, PathBuf::from("public/a.txt"));
        assert_eq!(failure.message, "Verification failed: missing in destination");
    }

    #[test]
    fn test_format_mismatch_error_truncates() {
        let mismatches: Vec<_> = (0..12)
            .map(|i| FileMismatch {
                relative_path: PathBuf::from(format!("f{i}")),
                reason: MismatchReason::HashMismatch,
            })
            .collect();

        let msg = format_mismatch_error(&mismatches);
        assert!(msg.starts_with("12 file(s) failed verification"));
        assert!(msg.contains("f9: hash mismatch"));
        assert!(!msg.contains("f10:"));
        assert!(msg.ends_with("(2 more not shown)"));
    }

    #[test]
    fn test_hash_file_sync_reports_io_errors() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("server.js");

        let err = hash_file_sync(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        std::fs::write(&path, b"require('next')").unwrap();
        assert_eq!(hash_file_sync(&path).unwrap(), blake3::hash(b"require('next')"));
    }
}
