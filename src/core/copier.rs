//! Parallel copy of enumerated files into the destination root.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rayon::ThreadPoolBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, error, info, warn};

use crate::core::models::{CopyFailure, CopyOutcome, CopyResult, FileHash, FileRecord};
use crate::core::progress::{ProgressTracker, throughput_mbps, to_mb};
use crate::error::{Result, SyncError};

/// Buffer size for file I/O operations (128KB for optimal throughput)
const BUFFER_SIZE: usize = 128 * 1024;

/// Files per worker before the pool grows by one thread.
const FILES_PER_WORKER: usize = 100;

#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub workers_min: usize,
    pub workers_max: usize,
    /// Log a progress line every N completions.
    pub progress_every: u64,
    /// Whether to fsync each file after writing (safer but slower)
    pub sync_files: bool,
    /// Hash file contents while copying, for later verification.
    pub hash_files: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            workers_min: 4,
            workers_max: 16,
            progress_every: 100,
            sync_files: false,
            hash_files: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct CopyReport {
    pub files_total: u64,
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub workers: usize,
    pub elapsed: Duration,
    pub failures: Vec<CopyFailure>,
    pub hashes: Vec<FileHash>,
    /// Cancellation arrived before every file was attempted.
    pub cancelled: bool,
}

impl CopyReport {
    pub fn throughput_mbps(&self) -> f64 {
        throughput_mbps(self.bytes_copied, self.elapsed)
    }
}

/// Pool size for `file_count` files: one worker per hundred files, held
/// within `[min, max]`.
pub fn worker_count(file_count: usize, min: usize, max: usize) -> usize {
    let min = min.max(1);
    let max = max.max(min);
    file_count.div_ceil(FILES_PER_WORKER).clamp(min, max)
}

/// Shared state of one copy stage. Workers pull tasks by index from a queue
/// sorted largest-first.
struct CopyJob<'a> {
    tasks: Vec<&'a FileRecord>,
    next: AtomicUsize,
    destination: &'a Path,
    options: &'a CopyOptions,
    cancel: &'a CancellationToken,
    progress: ProgressTracker,
    failures: Mutex<Vec<CopyFailure>>,
    hashes: Mutex<Vec<FileHash>>,
}

impl CopyJob<'_> {
    fn run_worker(&self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let index = self.next.fetch_add(1, Ordering::Relaxed);
            let Some(record) = self.tasks.get(index) else {
                break;
            };

            let outcome = copy_record(record, self.destination, self.options);
            self.finish(record, outcome);
        }
    }

    fn finish(&self, record: &FileRecord, outcome: CopyOutcome) {
        let snapshot = match outcome.result {
            CopyResult::Copied { bytes, hash } => {
                debug!(file = %record.relative_path.display(), bytes, "Copied file");

                if let Some(hash) = hash {
                    lock(&self.hashes).push(FileHash {
                        relative_path: record.relative_path.clone(),
                        hash,
                        size: bytes,
                    });
                }

                self.progress.record_success(bytes)
            }
            CopyResult::Failed { message } => {
                error!(
                    file = %outcome.source_path.display(),
                    dest = %outcome.dest_path.display(),
                    error = %message,
                    "Failed to copy file"
                );

                lock(&self.failures).push(CopyFailure {
                    relative_path: record.relative_path.clone(),
                    message,
                });

                self.progress.record_failure()
            }
        };

        if let Some(snapshot) = snapshot {
            info!(
                completed = snapshot.completed,
                total = snapshot.total_files,
                percent = format!("{:.1}", snapshot.percentage()),
                copied_mb = format!("{:.2}", snapshot.copied_mb()),
                "Copy progress"
            );
        }
    }
}

/// A poisoned lock only means another worker panicked mid-push; the data is
/// still a plain list.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Copy every record to `destination/<relative_path>` on a bounded pool.
///
/// A failing file is logged and recorded in the report, never aborting the
/// others. Cancellation stops workers from taking new files; copies already
/// running complete.
pub fn copy_all(
    records: &[FileRecord],
    destination: &Path,
    options: &CopyOptions,
    cancel: &CancellationToken,
) -> Result<CopyReport> {
    let mut tasks: Vec<&FileRecord> = records.iter().collect();
    tasks.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));

    let workers = worker_count(tasks.len(), options.workers_min, options.workers_max);
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("copy-{i}"))
        .build()
        .map_err(|source| SyncError::WorkerPool { workers, source })?;

    let total_bytes: u64 = records.iter().map(|r| r.size_bytes).sum();
    info!(
        files = records.len(),
        total_mb = format!("{:.2}", to_mb(total_bytes)),
        workers,
        "Starting copy"
    );

    let job = CopyJob {
        tasks,
        next: AtomicUsize::new(0),
        destination,
        options,
        cancel,
        progress: ProgressTracker::new(records.len() as u64, options.progress_every),
        failures: Mutex::new(Vec::new()),
        hashes: Mutex::new(Vec::new()),
    };

    let start_time = Instant::now();
    // Pool threads do not inherit the caller's span.
    let span = Span::current();
    pool.scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|_| {
                let _enter = span.enter();
                job.run_worker();
            });
        }
    });
    let elapsed = start_time.elapsed();

    let files_total = records.len() as u64;
    let completed = job.progress.completed();
    let cancelled = completed < files_total;
    if cancelled {
        warn!(
            completed,
            remaining = files_total - completed,
            "Copy cancelled before all files were attempted"
        );
    }

    let report = CopyReport {
        files_total,
        files_copied: job.progress.succeeded(),
        bytes_copied: job.progress.bytes_copied(),
        workers,
        elapsed,
        failures: job.failures.into_inner().unwrap_or_else(|p| p.into_inner()),
        hashes: job.hashes.into_inner().unwrap_or_else(|p| p.into_inner()),
        cancelled,
    };

    info!(
        files_copied = report.files_copied,
        failed = report.failures.len(),
        elapsed_secs = format!("{:.2}", elapsed.as_secs_f64()),
        speed_mbps = format!("{:.2}", report.throughput_mbps()),
        "Copy stage complete"
    );

    Ok(report)
}

fn copy_record(record: &FileRecord, destination: &Path, options: &CopyOptions) -> CopyOutcome {
    let dest_path = destination.join(&record.relative_path);

    let result = ensure_parent(&dest_path)
        .and_then(|()| copy_single_file(&record.source_path, &dest_path, options));

    CopyOutcome {
        source_path: record.source_path.clone(),
        dest_path,
        result: match result {
            Ok((bytes, hash)) => CopyResult::Copied { bytes, hash },
            Err(message) => CopyResult::Failed { message },
        },
    }
}

/// `create_dir_all` tolerates directories created concurrently by other
/// workers.
fn ensure_parent(dest: &Path) -> Result<(), String> {
    match dest.parent() {
        Some(parent) => fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create parent directory: {}", e)),
        None => Ok(()),
    }
}

/// Copy a single file with metadata preservation.
///
/// Returns bytes written and, if requested, the BLAKE3 hash of the bytes read.
/// Permissions and timestamps are part of a correct copy, so failing to apply
/// them fails the file.
fn copy_single_file(
    source: &Path,
    dest: &Path,
    options: &CopyOptions,
) -> Result<(u64, Option<[u8; 32]>), String> {
    let source_metadata =
        fs::metadata(source).map_err(|e| format!("Failed to read source metadata: {}", e))?;

    let source_file =
        File::open(source).map_err(|e| format!("Failed to open source file: {}", e))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, source_file);

    let dest_file =
        File::create(dest).map_err(|e| format!("Failed to create destination file: {}", e))?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest_file);

    let mut hasher = options.hash_files.then(blake3::Hasher::new);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes_written: u64 = 0;

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| format!("Failed to read from source: {}", e))?;

        if bytes_read == 0 {
            break;
        }

        writer
            .write_all(&buffer[..bytes_read])
            .map_err(|e| format!("Failed to write to destination: {}", e))?;

        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&buffer[..bytes_read]);
        }

        bytes_written += bytes_read as u64;
    }

    let inner = writer
        .into_inner()
        .map_err(|e| format!("Failed to flush destination file: {}", e.error()))?;

    if options.sync_files {
        inner
            .sync_all()
            .map_err(|e| format!("Failed to sync file: {}", e))?;
    }
    drop(inner);

    fs::set_permissions(dest, source_metadata.permissions())
        .map_err(|e| format!("Failed to set file permissions: {}", e))?;

    let atime = filetime::FileTime::from_last_access_time(&source_metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&source_metadata);
    filetime::set_file_times(dest, atime, mtime)
        .map_err(|e| format!("Failed to preserve file timestamps: {}", e))?;

    Ok((bytes_written, hasher.map(|h| *h.finalize().as_bytes())))
}
