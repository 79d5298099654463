//! Synthesis configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// How a consumer stack reads a value exported by another stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrossStackMode {
    /// `{"Fn::ImportValue": "<export name>"}` in the consumer.
    #[default]
    ImportValue,
    /// A `String` parameter in the consumer, fed by the orchestrator.
    Parameter,
}

/// Serialization format for templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
        }
    }
}

/// Tooling version check emitted into every template.
///
/// Adds a parameter resolving `ssm_parameter` at deploy time and a rule
/// asserting that the deployed tooling is not one of the known-bad versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolingRequirement {
    pub parameter_name: String,
    pub ssm_parameter: String,
    pub unsupported_versions: Vec<String>,
}

impl Default for ToolingRequirement {
    fn default() -> Self {
        Self {
            parameter_name: "ToolingVersion".to_string(),
            ssm_parameter: "/forma/tooling/version".to_string(),
            unsupported_versions: vec!["1".to_string(), "2".to_string(), "3".to_string()],
        }
    }
}

/// Options for one synthesis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Maximum nesting of token resolutions for a single value.
    pub max_resolve_depth: usize,
    /// Record each resource's construct path in its template metadata.
    pub path_metadata: bool,
    pub cross_stack: CrossStackMode,
    /// `None` disables the tooling version check.
    pub tooling: Option<ToolingRequirement>,
    pub output_format: OutputFormat,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            max_resolve_depth: 64,
            path_metadata: true,
            cross_stack: CrossStackMode::default(),
            tooling: Some(ToolingRequirement::default()),
            output_format: OutputFormat::default(),
        }
    }
}

impl SynthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from YAML. Missing fields take their defaults.
    pub fn from_yaml_str(content: &str) -> CoreResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::InvalidConfiguration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn with_max_resolve_depth(mut self, depth: usize) -> Self {
        self.max_resolve_depth = depth;
        self
    }

    pub fn with_path_metadata(mut self, enabled: bool) -> Self {
        self.path_metadata = enabled;
        self
    }

    pub fn with_cross_stack(mut self, mode: CrossStackMode) -> Self {
        self.cross_stack = mode;
        self
    }

    pub fn with_tooling(mut self, tooling: Option<ToolingRequirement>) -> Self {
        self.tooling = tooling;
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.max_resolve_depth == 0 {
            return Err(CoreError::InvalidConfiguration(
                "max_resolve_depth must be at least 1".to_string(),
            ));
        }
        if let Some(tooling) = &self.tooling {
            if tooling.parameter_name.is_empty()
                || !tooling.parameter_name.chars().all(|c| c.is_ascii_alphanumeric())
            {
                return Err(CoreError::InvalidConfiguration(format!(
                    "tooling parameter name '{}' must be alphanumeric",
                    tooling.parameter_name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SynthConfig::default();
        assert_eq!(config.max_resolve_depth, 64);
        assert!(config.path_metadata);
        assert_eq!(config.cross_stack, CrossStackMode::ImportValue);
        assert!(config.tooling.is_some());
        assert_eq!(config.output_format, OutputFormat::Json);
    }

    #[test]
    fn test_from_yaml_fills_missing_fields() {
        let config = SynthConfig::from_yaml_str(
            "max_resolve_depth: 8\ncross_stack: parameter\ntooling: null\noutput_format: yaml\n",
        )
        .unwrap();
        assert_eq!(config.max_resolve_depth, 8);
        assert_eq!(config.cross_stack, CrossStackMode::Parameter);
        assert!(config.tooling.is_none());
        assert_eq!(config.output_format, OutputFormat::Yaml);
        assert!(config.path_metadata);
    }

    #[test]
    fn test_zero_depth_rejected() {
        let err = SynthConfig::from_yaml_str("max_resolve_depth: 0").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_builder() {
        let config = SynthConfig::new()
            .with_max_resolve_depth(4)
            .with_path_metadata(false)
            .with_tooling(None);
        assert_eq!(config.max_resolve_depth, 4);
        assert!(!config.path_metadata);
        assert!(config.tooling.is_none());
    }
}
