// apps/sd_cli/src/commands/info.rs

//! Info command
//!
//! Prints build information and, with a configuration, the run plan the
//! engine would execute.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use sd_config::RunConfig;
use sd_engine::{EscalationPolicy, InitSource, LadderLevel, RunSchedule, TimestepLadder};
use tracing::info;

use super::load_config;

/// Info arguments
#[derive(Args)]
pub struct InfoArgs {
    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the configuration as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the info command
pub fn execute(args: InfoArgs) -> Result<()> {
    info!("=== SnowDrive info ===");
    print_build_info();

    if let Some(path) = &args.config {
        let config = load_config(path)?;
        println!();
        if args.json {
            println!("{}", config.to_json()?);
        } else {
            print_run_plan(&config)?;
        }
    }
    Ok(())
}

fn print_build_info() {
    println!("=== Build ===");
    println!("snowdrive {}", env!("CARGO_PKG_VERSION"));
    println!(
        "Layers: foundation {}, config {}, forcing {}, io {}, engine {}",
        sd_foundation::LAYER,
        sd_config::LAYER,
        sd_forcing::LAYER,
        sd_io::LAYER,
        sd_engine::LAYER
    );
    println!("Platform: {} / {}", std::env::consts::OS, std::env::consts::ARCH);
}

fn print_run_plan(config: &RunConfig) -> Result<()> {
    let schedule = RunSchedule::from_config(config)?;
    let ladder = TimestepLadder::from_config(config)?;
    let policy = EscalationPolicy::from(&config.escalation);

    println!("=== Run plan ===");
    println!("Period:      {} to {}", config.time.start, config.time.end);
    println!(
        "Steps:       {} × {} min",
        schedule.last_step(),
        config.time.time_step
    );
    let flushes = (1..=schedule.last_step())
        .filter(|j| schedule.is_output_step(*j))
        .count();
    println!(
        "Output:      every {} h, {} flushes, mode {}",
        config.output.frequency, flushes, config.output.mode
    );
    println!("Domain:      {} x {}", config.domain.ny, config.domain.nx);
    println!("Model type:  {:?}", config.init.model_type);
    match InitSource::select(&config.init) {
        Ok(source) => println!("Init:        {}", source),
        Err(e) => println!("Init:        invalid ({})", e),
    }
    println!(
        "Execution:   {}",
        if config.forcing.threaded {
            format!("concurrent, {} timesteps ahead", config.forcing.max_ahead)
        } else {
            "pull".to_string()
        }
    );

    println!();
    println!("Timestep ladder:");
    for level in LadderLevel::ALL {
        let l = ladder.level(level);
        println!(
            "  {:?}: {} min × {}, threshold {} kg/m², output {:#x}",
            level, l.minutes, l.intervals, l.threshold, l.output
        );
    }

    println!();
    println!("Escalation:");
    println!(
        "  reset depths {} / {} m, relaxed thresholds {:?}, {} relaxed attempts, reset temperature {}",
        policy.depth_level1,
        policy.depth_level2,
        policy.relaxed_thresholds,
        policy.max_consecutive_relaxations,
        policy.reset_temperature
    );
    Ok(())
}
