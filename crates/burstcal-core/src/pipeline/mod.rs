mod orchestrator;
mod types;

pub use orchestrator::PipelineOrchestrator;
pub use types::{
    NoOpReporter, PipelineStage, ProfilePlan, ProfileReport, ProfileStatus, ProgressReporter,
};
