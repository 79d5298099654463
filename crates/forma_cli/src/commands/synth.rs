//! Synth command - Write templates and the assembly manifest.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::info;

use forma_core::{AnnotationLevel, OutputFormat, Synthesizer};

use super::{load_app, load_config};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum TemplateFormat {
    Json,
    Yaml,
}

impl From<TemplateFormat> for OutputFormat {
    fn from(format: TemplateFormat) -> Self {
        match format {
            TemplateFormat::Json => OutputFormat::Json,
            TemplateFormat::Yaml => OutputFormat::Yaml,
        }
    }
}

#[derive(Args)]
pub struct SynthArgs {
    /// Blueprint files or directories
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Directory to write templates and the manifest into
    #[arg(short, long, default_value = "forma.out")]
    output: PathBuf,

    /// Synthesis configuration file (YAML)
    #[arg(short, long, env = "FORMA_CONFIG")]
    config: Option<PathBuf>,

    /// Template format, overriding the configuration
    #[arg(short, long, value_enum)]
    format: Option<TemplateFormat>,
}

pub fn execute(args: SynthArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(format) = args.format {
        config = config.with_output_format(format.into());
    }
    let format = config.output_format;

    let mut app = load_app(&args.paths)?;
    let assembly = Synthesizer::new(config)
        .synthesize(&mut app)
        .context("Synthesis failed")?;

    fs::create_dir_all(&args.output).with_context(|| {
        format!("Failed to create output directory {}", args.output.display())
    })?;

    println!("🔨 Synthesizing {} stack(s)...", assembly.stacks.len());
    for stack in &assembly.stacks {
        let path = args.output.join(&stack.template_file);
        let rendered = stack.render(format)?;
        fs::write(&path, rendered)
            .with_context(|| format!("Failed to write template {}", path.display()))?;
        println!("   📄 {} → {}", stack.name, path.display());
    }

    let manifest_path = args.output.join(MANIFEST_FILE);
    fs::write(&manifest_path, assembly.manifest.to_json()?)
        .with_context(|| format!("Failed to write manifest {}", manifest_path.display()))?;
    info!("Wrote manifest to {:?}", manifest_path);

    for message in &assembly.manifest.messages {
        let marker = match message.level {
            AnnotationLevel::Info => "ℹ️ ",
            AnnotationLevel::Warning => "⚠️ ",
            AnnotationLevel::Error => "❌",
        };
        println!("   {} [{}] {}", marker, message.path, message.message);
    }

    println!();
    println!("✅ Synthesized into {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use forma_core::{AssemblyManifest, Template};
    use tempfile::tempdir;

    const BLUEPRINT: &str = r#"
name: shop
stacks:
  - id: Storage
    resources:
      - id: Bucket
        type: AWS::S3::Bucket
  - id: Compute
    resources:
      - id: Handler
        type: AWS::Lambda::Function
        properties:
          Bucket: ${Ref:Storage/Bucket}
"#;

    #[test]
    fn test_synth_writes_templates_and_manifest() {
        let dir = tempdir().unwrap();
        let blueprint = dir.path().join("shop.yaml");
        fs::write(&blueprint, BLUEPRINT).unwrap();
        let output = dir.path().join("out");

        execute(SynthArgs {
            paths: vec![blueprint],
            output: output.clone(),
            config: None,
            format: None,
        })
        .unwrap();

        let manifest =
            AssemblyManifest::from_json(&fs::read_to_string(output.join(MANIFEST_FILE)).unwrap())
                .unwrap();
        assert_eq!(manifest.deployment_order, vec!["Storage", "Compute"]);
        assert_eq!(manifest.exports.len(), 1);

        let compute = Template::from_json(
            &fs::read_to_string(output.join("Compute.template.json")).unwrap(),
        )
        .unwrap();
        assert!(compute.resources.contains_key("Handler"));
    }

    #[test]
    fn test_synth_yaml_format_from_config() {
        let dir = tempdir().unwrap();
        let blueprint = dir.path().join("shop.yaml");
        fs::write(&blueprint, BLUEPRINT).unwrap();
        let config = dir.path().join("forma.yaml");
        fs::write(&config, "output_format: yaml\ntooling: null\n").unwrap();
        let output = dir.path().join("out");

        execute(SynthArgs {
            paths: vec![blueprint],
            output: output.clone(),
            config: Some(config),
            format: None,
        })
        .unwrap();

        let storage = fs::read_to_string(output.join("Storage.template.yaml")).unwrap();
        assert!(storage.contains("AWS::S3::Bucket"));
        assert!(!storage.contains("ToolingVersion"));
    }

    #[test]
    fn test_missing_blueprint_fails() {
        let dir = tempdir().unwrap();
        let result = execute(SynthArgs {
            paths: vec![dir.path().join("missing.yaml")],
            output: dir.path().join("out"),
            config: None,
            format: Some(TemplateFormat::Json),
        });
        assert!(result.is_err());
        assert!(!dir.path().join("out").exists());
    }
}
