use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::burst::Burst;
use crate::error::ReconstructionFailure;

use super::command::{InitFiles, LaunchCommand};
use super::launcher::RunningProcess;

/// Output of one successful reconstruction.
#[derive(Clone, Debug, PartialEq)]
pub struct SpeckledBurst {
    pub batch: usize,
    pub index: usize,
    pub path: PathBuf,
}

/// Pending -> Running -> Succeeded | Failed. Terminal states are final.
#[derive(Clone, Debug, PartialEq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded(SpeckledBurst),
    Failed(ReconstructionFailure),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded(_) => write!(f, "succeeded"),
            Self::Failed(_) => write!(f, "failed"),
        }
    }
}

/// One invocation of the reconstruction program for one burst.
pub struct ReconstructionJob {
    pub profile: String,
    pub burst: Burst,
    pub command: LaunchCommand,
    pub init: InitFiles,
    pub expected_output: PathBuf,
    /// Launches so far, including retries.
    pub attempts: u32,
    pub(crate) state: JobState,
    pub(crate) process: Option<Box<dyn RunningProcess>>,
}

impl ReconstructionJob {
    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn batch(&self) -> usize {
        self.burst.batch
    }

    pub fn index(&self) -> usize {
        self.burst.index
    }

    pub(crate) fn fail(&mut self, reason: crate::error::FailureReason) {
        self.process = None;
        self.state = JobState::Failed(ReconstructionFailure {
            batch: self.burst.batch,
            index: self.burst.index,
            reason,
        });
    }
}

impl fmt::Debug for ReconstructionJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconstructionJob")
            .field("profile", &self.profile)
            .field("batch", &self.burst.batch)
            .field("index", &self.burst.index)
            .field("command", &self.command.to_string())
            .field("expected_output", &self.expected_output)
            .field("attempts", &self.attempts)
            .field("state", &self.state)
            .finish()
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Final result of one job as reported to the orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    Succeeded(SpeckledBurst),
    Failed(ReconstructionFailure),
    /// Cancelled before or while running.
    Cancelled { batch: usize, index: usize },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}
