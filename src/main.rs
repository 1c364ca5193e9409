use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use machine_staging::connect_reservations;
use machine_staging::domain::distribution::distribution_engine::DistributionEngine;
use machine_staging::domain::distribution::progress::{BatchEvent, ProgressEvent, TransferOutcome};
use machine_staging::domain::machine::machine_id::MachineId;
use machine_staging::domain::planning::assignment_planner;
use machine_staging::domain::reservation::reservation_state::ReservationState;
use machine_staging::domain::reservation::reservation_sync::ChangeOrigin;
use machine_staging::domain::staging;
use machine_staging::domain::staging_config::StagingConfig;
use machine_staging::logger;

#[derive(Debug, Parser)]
#[command(name = "machine-staging", version, about = "Stage job files onto a shared pool of worker machines")]
struct Cli {
    /// Staging configuration (JSON).
    #[arg(short, long, default_value = "staging.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the reservation state of every machine.
    Status,

    /// Toggle the reservation of one or more machines.
    Toggle {
        #[arg(required = true)]
        machines: Vec<MachineId>,
    },

    /// Print reservation changes as they arrive.
    Watch,

    /// Reserve machines, copy one file to each and release them again.
    Stage {
        /// Machines to stage, e.g. `1,4,7`.
        #[arg(short, long, value_delimiter = ',', required = true)]
        machines: Vec<MachineId>,

        /// Files to distribute, in machine order.
        #[arg(short, long, num_args = 1.., required = true)]
        files: Vec<PathBuf>,

        /// Overrides `maxConcurrency` of the configuration.
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Keep the machines reserved after staging.
        #[arg(long)]
        keep_reserved: bool,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        StagingConfig::load(&cli.config).with_context(|| format!("failed to load configuration '{}'", cli.config.display()))?
    } else {
        StagingConfig::default()
    };
    logger::init(&config.log_dir);

    if !cli.config.exists() {
        log::warn!("No configuration at '{}'; using a pool of {} machines without destinations.", cli.config.display(), config.machine_count());
    }

    match cli.command {
        Command::Status => status(&config),
        Command::Toggle { machines } => toggle(&config, &machines),
        Command::Watch => watch(&config),
        Command::Stage { machines, files, max_concurrency, keep_reserved } => {
            stage(&config, &machines, &files, max_concurrency.unwrap_or(config.max_concurrency), keep_reserved)
        }
    }
}

fn render_state(state: ReservationState) -> colored::ColoredString {
    match state {
        ReservationState::Reserved => state.to_string().yellow(),
        ReservationState::Available => state.to_string().green(),
    }
}

fn status(config: &StagingConfig) -> anyhow::Result<ExitCode> {
    let sync = connect_reservations(config)?;
    for (machine, state) in sync.snapshot() {
        println!("Machine {}: {}", machine, render_state(state));
    }
    Ok(ExitCode::SUCCESS)
}

fn toggle(config: &StagingConfig, machines: &[MachineId]) -> anyhow::Result<ExitCode> {
    let sync = connect_reservations(config)?;
    for machine in machines {
        let state = sync.toggle(*machine).with_context(|| format!("failed to toggle machine {}", machine))?;
        println!("Machine {}: {}", machine, render_state(state));
    }
    Ok(ExitCode::SUCCESS)
}

fn watch(config: &StagingConfig) -> anyhow::Result<ExitCode> {
    let sync = connect_reservations(config)?;
    let changes = sync.watch();

    println!("Watching {} machines, press Ctrl-C to stop.", sync.machine_count());
    for change in changes.iter() {
        let origin = match change.origin {
            ChangeOrigin::Local => "local",
            ChangeOrigin::Remote => "remote",
        };
        println!("Machine {}: {} ({})", change.machine, render_state(change.state), origin);
    }
    Ok(ExitCode::SUCCESS)
}

fn stage(
    config: &StagingConfig,
    machines: &[MachineId],
    files: &[PathBuf],
    max_concurrency: usize,
    keep_reserved: bool,
) -> anyhow::Result<ExitCode> {
    let sync = connect_reservations(config)?;

    let assignments = assignment_planner::plan(machines.iter().copied(), files);
    for assignment in &assignments {
        match &assignment.file {
            Some(file) => println!("Machine {} <- {}", assignment.machine, file.display()),
            None => println!("Machine {} <- {}", assignment.machine, "no file".dimmed()),
        }
    }

    let engine = DistributionEngine::from_config(config);
    let mut last_decile: HashMap<MachineId, u32> = HashMap::new();

    let report = staging::stage(&sync, &engine, &assignments, max_concurrency, keep_reserved, |event| match event {
        BatchEvent::Transfer { machine, event: ProgressEvent::Progress(fraction) } => {
            let decile = (fraction * 10.0).floor() as u32;
            if last_decile.insert(*machine, decile) != Some(decile) {
                println!("Machine {}: {:>3.0}%", machine, fraction * 100.0);
            }
        }
        BatchEvent::Transfer { machine, event: ProgressEvent::Failed(reason) } => {
            println!("Machine {}: {}", machine, reason.to_string().red());
        }
        BatchEvent::Completed(_) => {}
    })?;

    println!("\nBatch {} finished in {:.1?}", report.batch_id, report.elapsed);
    for (machine, outcome) in &report.outcomes {
        let line = match outcome {
            TransferOutcome::Succeeded => "staged".green(),
            TransferOutcome::NoFileAssigned => "no file assigned".dimmed(),
            TransferOutcome::Failed(reason) => reason.to_string().red(),
            other => format!("{:?}", other).normal(),
        };
        println!("  Machine {}: {}", machine, line);
    }

    Ok(if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
