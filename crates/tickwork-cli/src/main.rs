//! Tickwork CLI
//!
//! Host simulator for the tick-driven scheduler: drives heartbeats at a
//! fixed rate, registers demo work, and prints the engine's diagnostics.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "tickwork")]
#[command(about = "Tick-driven task scheduler simulator", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a demo workload on a live dispatcher
    Simulate {
        /// Scheduler config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of ticks to simulate
        #[arg(short, long, default_value_t = 100)]
        ticks: u64,
        /// Override ticks per second
        #[arg(long)]
        tps: Option<u32>,
    },

    /// Print the effective configuration
    Config {
        /// Scheduler config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate { config, ticks, tps } => {
            commands::simulate::execute(config.as_deref(), ticks, tps)
        }
        Commands::Config { config } => commands::config::execute(config.as_deref()),
    }
}
