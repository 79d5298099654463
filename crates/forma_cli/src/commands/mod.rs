//! CLI command definitions.
//!
//! This module defines the command structure for the forma CLI.
//! Each subcommand reads one or more blueprints and runs part of the
//! synthesis pipeline on the resulting app.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use forma_blueprint::{BlueprintBuilder, BlueprintReader};
use forma_core::{App, SynthConfig};

pub mod graph;
pub mod synth;
pub mod validate;

/// forma - construct composition and template synthesis
#[derive(Parser)]
#[command(name = "forma")]
#[command(version, about = "forma - construct composition and template synthesis")]
#[command(long_about = r#"
forma composes deployable stacks from YAML blueprints and synthesizes
one deployment template per stack plus an assembly manifest.

WORKFLOWS:
  synth      → Synthesize templates and the manifest into a directory
  validate   → Check blueprints and the construct tree without writing files
  graph      → Print stack deployment order and per-stack resource order

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Validation failure
  4 - Blueprint error
  5 - Synthesis error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synthesize blueprints into templates and a manifest
    Synth(synth::SynthArgs),

    /// Validate blueprints without producing output
    Validate(validate::ValidateArgs),

    /// Print the deployment order
    Graph(graph::GraphArgs),
}

/// Read, merge and build the blueprints at `paths`.
pub fn load_app(paths: &[PathBuf]) -> Result<App> {
    let blueprint = BlueprintReader::read_paths(paths).context("Failed to read blueprints")?;
    debug!(
        "Loaded blueprint '{}' with {} stack(s)",
        blueprint.name,
        blueprint.stacks.len()
    );
    BlueprintBuilder::new(&blueprint)
        .build()
        .with_context(|| format!("Failed to build blueprint '{}'", blueprint.name))
}

/// Load the synthesis configuration, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> Result<SynthConfig> {
    match path {
        Some(path) => SynthConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None => Ok(SynthConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config, SynthConfig::default());
    }
}
