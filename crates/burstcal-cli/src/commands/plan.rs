use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use burstcal_core::pipeline::PipelineOrchestrator;
use burstcal_core::reconstruct::SystemLauncher;
use clap::Args;

use super::load_store;

#[derive(Args)]
pub struct PlanArgs {
    /// Pipeline config file (TOML)
    pub config: PathBuf,

    /// Profile to plan, e.g. ZYLA
    #[arg(short, long)]
    pub profile: String,
}

pub fn run(args: &PlanArgs) -> Result<ExitCode> {
    let store = load_store(&args.config)?;
    let orchestrator = PipelineOrchestrator::new(store, Arc::new(SystemLauncher));
    let plan = orchestrator
        .plan_profile(&args.profile)
        .with_context(|| format!("Cannot plan profile {}", args.profile))?;

    crate::summary::print_plan(&plan);

    if plan.plan.failures.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
