use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use super::load_store;

#[derive(Args)]
pub struct CheckArgs {
    /// Pipeline config file (TOML)
    pub config: PathBuf,
}

pub fn run(args: &CheckArgs) -> Result<ExitCode> {
    let store = load_store(&args.config)?;
    crate::summary::print_check_summary(&store);

    if store.rejected().next().is_some() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
