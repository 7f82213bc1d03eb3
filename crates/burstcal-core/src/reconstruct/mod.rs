//! Speckle reconstruction: one external process per burst, supervised until
//! it exits and its output is verified.

pub mod command;
mod dispatcher;
mod job;
pub mod launcher;

pub use command::{InitFiles, LaunchCommand};
pub use dispatcher::ReconstructionDispatcher;
pub use job::{CancelToken, JobOutcome, JobState, ReconstructionJob, SpeckledBurst};
pub use launcher::{ProcessExit, ProcessLauncher, RunningProcess, SystemLauncher};
