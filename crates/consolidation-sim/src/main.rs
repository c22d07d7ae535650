//! Consolidation simulator
//!
//! Runs the consolidation engine against a synthetic datacenter and prints
//! a JSON run summary on stdout. Structured logs go to stderr.

mod config;
mod kernel;

use anyhow::{bail, Context, Result};
use clap::Parser;
use consolidation_lib::qtable::QTable;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Consolidation simulator
#[derive(Parser)]
#[command(name = "consolidation-sim")]
#[command(author, version, about = "Simulate VM consolidation policies on a virtual datacenter", long_about = None)]
pub struct Cli {
    /// Configuration file, JSON, TOML or YAML (can also be set via CONSOLIDATION_CONFIG_FILE)
    #[arg(long, short, env = "CONSOLIDATION_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Override the random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the simulated duration in seconds
    #[arg(long)]
    pub duration: Option<f64>,

    /// Start the Q-learning selector from a saved table
    #[arg(long)]
    pub q_table_in: Option<PathBuf>,

    /// Save the learned Q-table after the run
    #[arg(long)]
    pub q_table_out: Option<PathBuf>,

    /// Print the Prometheus exposition after the summary
    #[arg(long)]
    pub metrics: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = config::SimConfig::load(cli.config.as_deref())?;
    if let Some(seed) = cli.seed {
        config.engine.seed = seed;
    }
    if let Some(duration) = cli.duration {
        config.duration = duration;
    }
    config.validate()?;
    info!(
        hosts = config.host_count(),
        vms = config.vm_count(),
        seed = config.engine.seed,
        duration = config.duration,
        "Simulation configured"
    );

    let q_table = match &cli.q_table_in {
        Some(path) => {
            let table = load_q_table(path)?;
            let rl = &config.engine.reinforcement;
            if table.states() != rl.state_count || table.actions() != rl.action_count {
                bail!(
                    "Q-table {} is {}x{}, configuration expects {}x{}",
                    path.display(),
                    table.states(),
                    table.actions(),
                    rl.state_count,
                    rl.action_count
                );
            }
            Some(table)
        }
        None => None,
    };

    let mut simulation = kernel::Simulation::new(config, q_table)?;
    let summary = simulation.run()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if cli.metrics {
        print!("{}", simulation.context().metrics().render()?);
    }

    if let Some(path) = &cli.q_table_out {
        let table = simulation.take_q_table();
        let json = serde_json::to_string(&table)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write Q-table to {}", path.display()))?;
        info!(path = %path.display(), "Q-table saved");
    }

    Ok(())
}

fn load_q_table(path: &Path) -> Result<QTable> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read Q-table {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse Q-table {}", path.display()))
}
