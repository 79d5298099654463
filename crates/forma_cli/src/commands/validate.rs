//! Validate command - Check blueprints and the construct tree.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use forma_blueprint::{BlueprintBuilder, BlueprintError, BlueprintReader, BlueprintValidator};
use forma_core::{CoreError, Synthesizer};

use super::load_config;

#[derive(Args)]
pub struct ValidateArgs {
    /// Blueprint files or directories
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Synthesis configuration file (YAML)
    #[arg(short, long, env = "FORMA_CONFIG")]
    config: Option<PathBuf>,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let blueprint =
        BlueprintReader::read_paths(&args.paths).context("Failed to read blueprints")?;
    info!("Validating blueprint: {}", blueprint.name);

    println!("📋 Validating blueprint...");
    let result = BlueprintValidator::validate(&blueprint);
    for warning in &result.warnings {
        println!("   ⚠️  {}", warning);
    }
    if !result.valid {
        println!("   ❌ Blueprint validation failed:");
        for error in &result.errors {
            println!("      - {}", error);
        }
        return Err(BlueprintError::Invalid(result.errors).into());
    }
    println!("   ✅ Blueprint validation passed");

    println!("🌳 Validating construct tree...");
    let mut app = BlueprintBuilder::new(&blueprint).build()?;
    let messages = Synthesizer::new(config).validate(&mut app)?;
    if !messages.is_empty() {
        println!("   ❌ {} validation error(s):", messages.len());
        for message in &messages {
            println!("      - {}", message);
        }
        return Err(CoreError::ValidationFailed(messages).into());
    }
    println!("   ✅ Construct validation passed");

    println!();
    println!("✅ All validations passed!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn run(yaml: &str) -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        fs::write(&path, yaml).unwrap();
        execute(ValidateArgs {
            paths: vec![path],
            config: None,
        })
    }

    #[test]
    fn test_valid_blueprint_passes() {
        let yaml = r#"
name: shop
stacks:
  - id: Storage
    resources:
      - id: Bucket
        type: AWS::S3::Bucket
"#;
        run(yaml).unwrap();
    }

    #[test]
    fn test_colliding_logical_ids_fail() {
        let yaml = r#"
name: shop
stacks:
  - id: Storage
    resources:
      - id: Primary
        type: AWS::S3::Bucket
        logical_id: Bucket
      - id: Secondary
        type: AWS::S3::Bucket
        logical_id: Bucket
"#;
        let err = run(yaml).unwrap_err();
        match err.downcast_ref::<CoreError>() {
            Some(CoreError::ValidationFailed(messages)) => assert_eq!(messages.len(), 1),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_blueprint_errors_reported() {
        let yaml = r#"
name: shop
stacks:
  - id: Storage
    resources:
      - id: Bucket
        type: not-a-type
"#;
        let err = run(yaml).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BlueprintError>(),
            Some(BlueprintError::Invalid(_))
        ));
    }
}
