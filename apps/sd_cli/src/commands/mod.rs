// apps/sd_cli/src/commands/mod.rs

//! Subcommands

pub mod info;
pub mod run;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use sd_config::RunConfig;

/// Load and validate a run configuration
pub fn load_config(path: &Path) -> Result<RunConfig> {
    RunConfig::from_file(path).with_context(|| format!("cannot load config {}", path.display()))
}
