mod analysis;
mod attachment;
mod calibration;
mod config;
mod curve;
mod engine;
mod estimator;
mod history;
mod lumps;
mod manager;
mod model;
mod stable;
mod stats;
mod trajectory;
mod walk;

use crate::manager::Manager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    /// Simulation directory holding `config.toml` and the historical data.
    #[arg(long)]
    sim_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fit the calibration functions and save them to `calibration.json`.
    Fit,

    /// Create new runs and simulate them.
    Create {
        #[arg(long, default_value_t = 1)]
        n_runs: usize,
    },

    /// Continue a run from its checkpoint.
    Resume {
        #[arg(long)]
        run_idx: usize,
    },

    /// Analyze the trajectories of every run.
    Analyze,

    /// Remove analysis results.
    Clean,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.sim_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Fit => mgr.fit_calibration()?,
        Command::Create { n_runs } => mgr.create_runs(n_runs)?,
        Command::Resume { run_idx } => mgr.resume_run(run_idx)?,
        Command::Analyze => mgr.analyze_sim()?,
        Command::Clean => mgr.clean_sim()?,
    }

    Ok(())
}
