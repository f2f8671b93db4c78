pub mod copier;
pub mod destination;
pub mod enumerator;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod verifier;

pub use copier::{CopyOptions, CopyReport, copy_all, worker_count};
pub use enumerator::enumerate;
pub use models::{
    ArtifactSpec, CopyFailure, CopyOutcome, CopyResult, FileHash, FileRecord, RunOutcome,
    RunSummary,
};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use verifier::{VerifyResult, verify_from_hashes};
