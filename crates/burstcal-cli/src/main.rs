mod commands;
mod progress;
mod summary;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "burstcal", about = "Burst calibration and speckle reconstruction driver")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a config file, listing every profile
    Check(commands::check::CheckArgs),
    /// Show the bursts a profile would produce, without writing anything
    Plan(commands::plan::PlanArgs),
    /// Calibrate, batch and reconstruct one or more profiles
    Run(commands::run::RunArgs),
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "burstcal=debug,burstcal_core=debug,warn"
    } else {
        "burstcal=info,burstcal_core=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Check(args) => commands::check::run(args),
        Commands::Plan(args) => commands::plan::run(args),
        Commands::Run(args) => commands::run::run(args),
    }
}
