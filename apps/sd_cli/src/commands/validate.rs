// apps/sd_cli/src/commands/validate.rs

//! Validate command
//!
//! Loads the configuration and checks everything a run would trip over
//! before the first step: referenced files, the timestep ladder, output
//! variable names, the init source and the forcing table coverage.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Args;
use sd_config::RunConfig;
use sd_engine::{InitSource, TimestepLadder};
use sd_forcing::csv::{load_forcing_table, CsvConfig};
use sd_forcing::ForcingVariable;
use sd_io::StateField;
use tracing::info;

use super::load_config;

/// Validate arguments
#[derive(Args)]
pub struct ValidateArgs {
    /// Configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

#[derive(Default)]
struct ValidationResult {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl ValidationResult {
    fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn is_ok(&self, strict: bool) -> bool {
        self.errors.is_empty() && (!strict || self.warnings.is_empty())
    }
}

/// Execute the validate command
pub fn execute(args: ValidateArgs) -> Result<()> {
    info!("=== SnowDrive config validation ===");
    let config = load_config(&args.config)?;

    let mut result = ValidationResult::default();
    check_config(&config, &mut result);
    print_result(&result);

    if !result.is_ok(args.strict) {
        bail!(
            "validation failed: {} errors, {} warnings",
            result.errors.len(),
            result.warnings.len()
        );
    }
    println!("Configuration is valid");
    Ok(())
}

fn check_config(config: &RunConfig, result: &mut ValidationResult) {
    if let Err(e) = TimestepLadder::from_config(config) {
        result.add_error(e.to_string());
    }
    if let Err(e) = StateField::parse_list(&config.output.variables) {
        result.add_error(e.to_string());
    }

    match InitSource::select(&config.init) {
        Ok(InitSource::File { path, .. }) => require_file(&path, "init file", result),
        Ok(InitSource::CrashRestart { hour, .. }) => {
            if config.init.model_type.is_in_memory() {
                require_file(&config.archive_path(), "restart archive", result);
            } else {
                require_file(
                    &sd_io::snow_image_path(&config.output.directory, hour),
                    "restart snow image",
                    result,
                );
            }
        }
        Ok(InitSource::Zero) => result.add_warning("no init file, starting from a zero state"),
        Err(e) => result.add_error(e.to_string()),
    }

    if let Some(path) = &config.domain.topo_file {
        require_file(path, "topo file", result);
    }
    if let Some(path) = &config.update.file {
        require_file(path, "depth update file", result);
    }

    match &config.forcing.file {
        None => result.add_warning("no forcing table configured"),
        Some(path) => check_forcing(config, path, result),
    }
}

fn require_file(path: &Path, what: &str, result: &mut ValidationResult) {
    if !path.exists() {
        result.add_error(format!("{} not found: {}", what, path.display()));
    }
}

fn check_forcing(config: &RunConfig, path: &Path, result: &mut ValidationResult) {
    let table = match load_forcing_table(path, &CsvConfig::default()) {
        Ok(t) => t,
        Err(e) => {
            result.add_error(e.to_string());
            return;
        }
    };

    for variable in ForcingVariable::streamed() {
        if !table.variables().contains(&variable) {
            result.add_error(format!("forcing table has no '{}' column", variable));
        }
    }
    if let Some((first, last)) = table.span() {
        if first > config.time.start || last < config.time.end {
            result.add_warning(format!(
                "forcing table covers {} to {}, run is {} to {}; missing steps read as zeros",
                first, last, config.time.start, config.time.end
            ));
        }
    }
}

fn print_result(result: &ValidationResult) {
    for e in &result.errors {
        println!("  ERROR   {}", e);
    }
    for w in &result.warnings {
        println!("  WARNING {}", w);
    }
    println!(
        "{} errors, {} warnings",
        result.errors.len(),
        result.warnings.len()
    );
}
