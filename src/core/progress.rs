//! Shared progress counters for the copy stage.
//!
//! Workers report every finished file here. Counters are atomics so that
//! concurrent completions are never lost or double counted; the tracker
//! decides which completions deserve a progress line.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug)]
pub struct ProgressTracker {
    total_files: u64,
    report_every: u64,
    completed: AtomicU64,
    succeeded: AtomicU64,
    bytes_copied: AtomicU64,
}

/// Point-in-time view handed out when a progress line is due.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: u64,
    pub total_files: u64,
    pub bytes_copied: u64,
}

impl ProgressSnapshot {
    pub fn percentage(&self) -> f64 {
        if self.total_files == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total_files as f64 * 100.0
    }

    pub fn copied_mb(&self) -> f64 {
        to_mb(self.bytes_copied)
    }
}

impl ProgressTracker {
    pub fn new(total_files: u64, report_every: u64) -> Self {
        Self {
            total_files,
            report_every: report_every.max(1),
            completed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
        }
    }

    /// Record a successful copy. Returns a snapshot when a progress line is due.
    pub fn record_success(&self, bytes: u64) -> Option<ProgressSnapshot> {
        self.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.complete_one()
    }

    /// Record a failed copy. Failures still advance the completion count.
    pub fn record_failure(&self) -> Option<ProgressSnapshot> {
        self.complete_one()
    }

    fn complete_one(&self) -> Option<ProgressSnapshot> {
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;

        if completed % self.report_every == 0 || completed == self.total_files {
            Some(ProgressSnapshot {
                completed,
                total_files: self.total_files,
                bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
            })
        } else {
            None
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Acquire)
    }

    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied.load(Ordering::Acquire)
    }
}

pub fn to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// MB/s over `elapsed`; zero for an instantaneous stage.
pub fn throughput_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { to_mb(bytes) / secs } else { 0.0 }
}
