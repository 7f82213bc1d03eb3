use std::fmt;

use crate::burst::BatchPlan;

/// Pipeline processing stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Calibration,
    Indexing,
    Batching,
    Reconstruction,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calibration => write!(f, "Building calibration"),
            Self::Indexing => write!(f, "Indexing data frames"),
            Self::Batching => write!(f, "Writing bursts"),
            Self::Reconstruction => write!(f, "Reconstructing"),
        }
    }
}

/// Thread-safe progress reporting for the pipeline.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new stage has started for `profile`. `total_items` is the number of
    /// work items in this stage (bursts, jobs), if known.
    fn begin_stage(&self, _profile: &str, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// `items_done` work items within the current stage have completed.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// No-op progress reporter, used when the caller does not supply one.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// How a profile's run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileStatus {
    /// Ran to completion; individual bursts may still have failed.
    Active,
    /// Empty directory, pattern or date fields. No jobs, not an error.
    Inactive,
    /// Rejected at load time.
    Invalid,
    /// Calibration or indexing failed, so no bursts were attempted.
    Aborted,
}

impl fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Invalid => write!(f, "invalid"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Per-profile outcome of a pipeline run.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileReport {
    pub name: String,
    pub status: ProfileStatus,
    pub succeeded: usize,
    pub failed: usize,
    /// Bursts that could not be named or written, so never dispatched.
    pub skipped_bursts: usize,
    /// Trailing frames that did not fill a burst.
    pub skipped_frames: usize,
    pub cancelled: usize,
    /// One human-readable line per failure.
    pub failures: Vec<String>,
}

impl ProfileReport {
    pub fn new(name: &str, status: ProfileStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            succeeded: 0,
            failed: 0,
            skipped_bursts: 0,
            skipped_frames: 0,
            cancelled: 0,
            failures: Vec::new(),
        }
    }

    /// Invalid or aborted profiles, and any failed burst, count as failure.
    pub fn has_failures(&self) -> bool {
        matches!(self.status, ProfileStatus::Invalid | ProfileStatus::Aborted)
            || self.failed > 0
            || self.skipped_bursts > 0
    }
}

/// Dry-run result for one profile: what batching would write.
#[derive(Debug)]
pub struct ProfilePlan {
    pub name: String,
    pub data_frames: usize,
    pub plan: BatchPlan,
}
