//! The sync run: enumerate, prepare the destination, copy, optionally verify.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::context::RunContext;
use crate::core::copier::{self, CopyOptions};
use crate::core::destination;
use crate::core::enumerator::enumerate;
use crate::core::models::{ArtifactSpec, CopyFailure, FileRecord, RunSummary};
use crate::core::progress::to_mb;
use crate::core::verifier::verify_from_hashes;
use crate::error::{Result, SyncError};

/// Enumerate the configured items without touching the destination.
pub fn scan(ctx: &RunContext) -> Result<Vec<FileRecord>> {
    let config = &ctx.config;
    let spec = ArtifactSpec::new(&config.items)?;

    let records = enumerate(&config.source_root, &spec, config.scan_workers_max)?;
    if records.is_empty() {
        return Err(SyncError::NoFiles);
    }

    Ok(records)
}

/// Run one full sync.
///
/// Every pre-flight check (item names, missing items, empty file set, overlap)
/// happens before the destination is modified. Per-file copy failures and
/// cancellation do not produce an `Err`; they are reported in the summary.
pub fn run(ctx: &RunContext) -> Result<RunSummary> {
    let config = &ctx.config;
    let destination_root = config
        .destination_root
        .as_deref()
        .ok_or(SyncError::NoDestination)?;
    let source_root = config.source_root.as_path();

    let run_id = Uuid::now_v7();
    let started_at = Utc::now();
    let span = info_span!(
        "sync_run",
        %run_id,
        source = %source_root.display(),
        destination = %destination_root.display()
    );
    let _enter = span.enter();

    let spec = ArtifactSpec::new(&config.items)?;

    info!(items = ?spec.items(), "Scanning source");
    let scan_start = Instant::now();
    let records = enumerate(source_root, &spec, config.scan_workers_max)?;
    let scan_elapsed = scan_start.elapsed();

    if records.is_empty() {
        return Err(SyncError::NoFiles);
    }

    let bytes_scanned: u64 = records.iter().map(|r| r.size_bytes).sum();
    info!(
        files = records.len(),
        total_mb = format!("{:.2}", to_mb(bytes_scanned)),
        elapsed_secs = format!("{:.2}", scan_elapsed.as_secs_f64()),
        "Scan complete"
    );

    destination::check_overlap(source_root, &spec, destination_root)?;

    // Nothing has been removed yet; a shutdown during the scan stops here.
    if ctx.cancel.is_cancelled() {
        warn!("Run cancelled before the destination was prepared; nothing changed");
        return Ok(RunSummary {
            run_id,
            started_at,
            source_root: source_root.to_path_buf(),
            destination_root: destination_root.to_path_buf(),
            files_scanned: records.len() as u64,
            bytes_scanned,
            files_copied: 0,
            bytes_copied: 0,
            scan_secs: scan_elapsed.as_secs_f64(),
            copy_secs: 0.0,
            throughput_mbps: 0.0,
            files_verified: None,
            cancelled: true,
            failures: Vec::new(),
        });
    }

    destination::prepare(destination_root)?;

    let options = CopyOptions {
        workers_min: config.copy_workers_min,
        workers_max: config.copy_workers_max,
        progress_every: config.progress_every,
        sync_files: config.sync_files,
        hash_files: config.verify,
    };
    let report = copier::copy_all(&records, destination_root, &options, &ctx.cancel)?;

    let mut failures = report.failures.clone();
    let mut files_verified = None;
    if config.verify && !report.cancelled {
        let verified = verify_from_hashes(destination_root, &report.hashes);
        files_verified = Some(verified.files_verified);
        failures.extend(verified.mismatches.into_iter().map(Into::into));
    }

    let mut summary = RunSummary {
        run_id,
        started_at,
        source_root: source_root.to_path_buf(),
        destination_root: destination_root.to_path_buf(),
        files_scanned: records.len() as u64,
        bytes_scanned,
        files_copied: report.files_copied,
        bytes_copied: report.bytes_copied,
        scan_secs: scan_elapsed.as_secs_f64(),
        copy_secs: report.elapsed.as_secs_f64(),
        throughput_mbps: report.throughput_mbps(),
        files_verified,
        cancelled: report.cancelled,
        failures,
    };

    finish(destination_root, &mut summary);
    Ok(summary)
}

/// Clear the in-progress marker only for a clean run and log the outcome.
/// A marker that cannot be removed is reported as a failure, since the
/// destination still reads as incomplete.
fn finish(destination_root: &Path, summary: &mut RunSummary) {
    if summary.cancelled {
        warn!(
            files_copied = summary.files_copied,
            files_scanned = summary.files_scanned,
            "Run cancelled; destination left marked incomplete"
        );
        return;
    }

    if !summary.failures.is_empty() {
        warn!(
            failed = summary.failures.len(),
            files_copied = summary.files_copied,
            "Run completed with failures; destination left marked incomplete"
        );
        return;
    }

    if let Err(e) = destination::mark_complete(destination_root) {
        warn!(error = %e, "Failed to remove in-progress marker");
        summary.failures.push(CopyFailure {
            relative_path: PathBuf::from(destination::INCOMPLETE_MARKER),
            message: format!("Failed to remove in-progress marker: {e}"),
        });
        return;
    }

    info!(
        files_copied = summary.files_copied,
        copied_mb = format!("{:.2}", to_mb(summary.bytes_copied)),
        elapsed_secs = format!("{:.2}", summary.copy_secs),
        speed_mbps = format!("{:.2}", summary.throughput_mbps),
        "Sync complete"
    );
}
