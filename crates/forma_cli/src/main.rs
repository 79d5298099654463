//! forma CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Validation failure
//! - 4: Blueprint error
//! - 5: Synthesis error

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

use forma_blueprint::BlueprintError;
use forma_core::CoreError;

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const BLUEPRINT_ERROR: u8 = 4;
    pub const SYNTH_ERROR: u8 = 5;
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(if e.use_stderr() {
                ExitCodes::INVALID_ARGS
            } else {
                ExitCodes::SUCCESS
            });
        }
    };

    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Synth(args) => commands::synth::execute(args),
        Commands::Validate(args) => commands::validate::execute(args),
        Commands::Graph(args) => commands::graph::execute(args),
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "forma=debug"
    } else if quiet {
        "forma=warn"
    } else {
        "forma=info"
    };

    let mut filter = EnvFilter::from_default_env();
    for directive in [level, "warn"] {
        if let Ok(directive) = directive.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    // Already initialized in tests; keep going.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();
}

/// Pick the exit code from the first library error in the chain.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(err) = cause.downcast_ref::<BlueprintError>() {
            return match err {
                BlueprintError::Invalid(_) => ExitCodes::VALIDATION_FAILURE,
                BlueprintError::Core(CoreError::ValidationFailed(_)) => {
                    ExitCodes::VALIDATION_FAILURE
                }
                BlueprintError::Core(_) => ExitCodes::SYNTH_ERROR,
                _ => ExitCodes::BLUEPRINT_ERROR,
            };
        }
        if let Some(err) = cause.downcast_ref::<CoreError>() {
            return match err {
                CoreError::ValidationFailed(_) => ExitCodes::VALIDATION_FAILURE,
                CoreError::InvalidConfiguration(_) => ExitCodes::INVALID_ARGS,
                _ => ExitCodes::SYNTH_ERROR,
            };
        }
    }
    ExitCodes::GENERAL_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use forma_core::ValidationMessage;

    #[test]
    fn test_categorize_error() {
        let validation: anyhow::Error =
            CoreError::ValidationFailed(vec![ValidationMessage::new("App/Stack", "bad")]).into();
        assert_eq!(categorize_error(&validation), ExitCodes::VALIDATION_FAILURE);

        let blueprint = Err::<(), _>(BlueprintError::InvalidReference {
            reference: "${Ref:}".to_string(),
            reason: "empty".to_string(),
        })
        .context("Failed to load blueprint")
        .unwrap_err();
        assert_eq!(categorize_error(&blueprint), ExitCodes::BLUEPRINT_ERROR);

        let cycle: anyhow::Error = CoreError::ExportCycle(vec!["A".into(), "B".into()]).into();
        assert_eq!(categorize_error(&cycle), ExitCodes::SYNTH_ERROR);

        assert_eq!(
            categorize_error(&anyhow::anyhow!("disk full")),
            ExitCodes::GENERAL_ERROR
        );
    }
}
