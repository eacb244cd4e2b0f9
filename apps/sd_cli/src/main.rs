// apps/sd_cli/src/main.rs

//! SnowDrive command line interface
//!
//! # Layer
//!
//! Layer 4: Application. Reads the run configuration, wires a forcing
//! producer, the integrator and an output sink into the engine pipeline.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// SnowDrive snowpack simulation driver
#[derive(Parser)]
#[command(name = "snowdrive")]
#[command(author = "SnowDrive Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Streaming snowpack simulation driver", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation
    Run(commands::run::RunArgs),
    /// Show configuration and build information
    Info(commands::info::InfoArgs),
    /// Validate a configuration file
    Validate(commands::validate::ValidateArgs),
}

fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&cli.log_level))
        .with_target(false)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args),
        Commands::Info(args) => commands::info::execute(args),
        Commands::Validate(args) => commands::validate::execute(args),
    }
}
