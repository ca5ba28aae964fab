//! ## taktsim-cli
//! **Scenario runner entrypoint**
//!
//! Loads a YAML scenario, brings the simulation graph up through the
//! launcher, and reports the run result. Exit code 0 means the run
//! succeeded; 1 means validation or execution failed.

use std::process::ExitCode;

use clap::Parser;
use taktsim_telemetry::EventLogger;

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    EventLogger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => commands::run_scenario_mode(run_args).await,
    }
}
