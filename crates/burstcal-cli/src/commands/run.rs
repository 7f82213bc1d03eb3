use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use burstcal_core::pipeline::PipelineOrchestrator;
use burstcal_core::reconstruct::SystemLauncher;
use clap::Args;
use tracing::info;

use super::load_store;
use crate::progress::BarReporter;

#[derive(Args)]
pub struct RunArgs {
    /// Pipeline config file (TOML)
    pub config: PathBuf,

    /// Profiles to run (repeatable). Runs every profile when omitted.
    #[arg(short, long)]
    pub profile: Vec<String>,

    /// Reconstruction jobs to run at once, overriding maxConcurrentJobs
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Relaunches of a failed job, overriding maxRetries
    #[arg(long)]
    pub retries: Option<u32>,
}

pub fn run(args: &RunArgs) -> Result<ExitCode> {
    let store = load_store(&args.config)?;

    let mut policy = store.policy.clone();
    if let Some(jobs) = args.jobs {
        policy.max_concurrent_jobs = jobs;
    }
    if let Some(retries) = args.retries {
        policy.max_retries = retries;
    }
    policy.validate().context("Invalid run policy")?;

    crate::summary::print_run_header(&args.config, &policy);
    info!(
        config = %args.config.display(),
        profiles = store.names().len(),
        jobs = policy.max_concurrent_jobs,
        retries = policy.max_retries,
        "Starting run"
    );

    let reporter = Arc::new(BarReporter::new());
    let mut orchestrator = PipelineOrchestrator::new(store, Arc::new(SystemLauncher))
        .with_policy(policy)
        .with_reporter(reporter.clone());

    let reports = if args.profile.is_empty() {
        orchestrator.run_all()
    } else {
        let mut reports = Vec::with_capacity(args.profile.len());
        for name in &args.profile {
            reports.push(
                orchestrator
                    .run_profile(name)
                    .with_context(|| format!("Cannot run profile {name}"))?,
            );
        }
        reports
    };
    reporter.finish();

    crate::summary::print_run_summary(&reports);

    if reports.iter().any(|r| r.has_failures()) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
