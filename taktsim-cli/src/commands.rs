// taktsim-cli/src/commands.rs

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use opentelemetry::KeyValue;
use tracing::error;

use taktsim_config::ScenarioConfig;
use taktsim_engine::SimulationLauncher;
use taktsim_telemetry::EventLogger;

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a simulation scenario from a YAML file
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to the scenario YAML file
    pub scenario: PathBuf,

    /// Override the scenario seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Validate the scenario and print a summary without executing
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

pub async fn run_scenario_mode(args: RunArgs) -> ExitCode {
    let mut scenario = match ScenarioConfig::load_from_path(&args.scenario) {
        Ok(scenario) => scenario,
        Err(e) => {
            error!("failed to load scenario {}: {e}", args.scenario.display());
            eprintln!("ERROR: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(seed) = args.seed {
        println!(
            "Overriding seed: {} -> {seed}",
            scenario.simulation.seed
        );
        scenario.simulation.seed = seed;
    }

    if args.dry_run {
        return dry_run(&scenario);
    }

    let mut launcher = SimulationLauncher::new(scenario);
    let result = launcher.run().await;

    if result.success {
        println!("\nRun complete:");
        println!("  Virtual time: {:.2}s", result.virtual_time_sec);
        println!("  Wall time: {:.2}s", result.duration_sec);
        println!("  Steps: {}", result.step_count);
        if result.duration_sec > 0.0 {
            println!(
                "  Speedup: {:.1}x",
                result.virtual_time_sec / result.duration_sec
            );
        }
        EventLogger::log_event(
            "run_complete",
            vec![
                KeyValue::new("virtual_time_sec", result.virtual_time_sec.to_string()),
                KeyValue::new("steps", result.step_count.to_string()),
            ],
        )
        .await;
        ExitCode::SUCCESS
    } else {
        let message = result
            .error_message
            .unwrap_or_else(|| "unknown error".into());
        eprintln!("\nRun FAILED:\n{message}");
        EventLogger::log_event("run_failed", vec![KeyValue::new("error", message)]).await;
        ExitCode::FAILURE
    }
}

fn dry_run(scenario: &ScenarioConfig) -> ExitCode {
    let launcher = SimulationLauncher::new(scenario.clone());
    let errors = launcher.validate();

    if !errors.is_empty() {
        eprintln!("Scenario validation FAILED:");
        for error in errors {
            eprintln!("  - {error}");
        }
        return ExitCode::FAILURE;
    }

    println!("Scenario validation passed");
    println!("\nScenario summary:");
    println!("  Duration: {}s", scenario.simulation.duration_s);
    println!("  Seed: {}", scenario.simulation.seed);
    println!("  Time quantum: {}us", scenario.simulation.time_quantum_us);
    println!("  Nodes: {}", scenario.nodes.len());
    if let Some(network) = &scenario.network {
        println!("  Network model: {:?}", network.model);
        if !network.links.is_empty() {
            println!("  Configured links: {}", network.links.len());
        }
    }
    if let Some(ml) = &scenario.ml_inference {
        println!("  ML placement: {:?}", ml.placement);
    }
    println!("\n(Run without --dry-run to execute)");
    ExitCode::SUCCESS
}
