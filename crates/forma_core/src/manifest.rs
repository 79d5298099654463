//! Cloud assembly manifest: what a deployment orchestrator needs to deploy
//! the synthesized stacks in order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::tree::AnnotationLevel;

pub const MANIFEST_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyManifest {
    pub version: String,
    /// Per-stack artifacts keyed by stack name, in deployment order.
    pub artifacts: IndexMap<String, StackArtifactEntry>,
    pub deployment_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<ExportPairing>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ManifestMessage>,
}

impl Default for AssemblyManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            artifacts: IndexMap::new(),
            deployment_order: Vec::new(),
            exports: Vec::new(),
            messages: Vec::new(),
        }
    }
}

impl AssemblyManifest {
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn has_warnings(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.level == AnnotationLevel::Warning)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackArtifactEntry {
    pub template_file: String,
    pub construct_path: String,
    /// Names of stacks that must be deployed first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

/// Which consumer reads which export, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportPairing {
    pub export_name: String,
    pub producer_stack: String,
    pub output_id: String,
    pub consumer_stack: String,
    /// Consumer parameter to feed with the export, in parameter mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMessage {
    pub level: AnnotationLevel,
    pub path: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_json_shape() {
        let mut manifest = AssemblyManifest::default();
        manifest.artifacts.insert(
            "Storage".to_string(),
            StackArtifactEntry {
                template_file: "Storage.template.json".to_string(),
                construct_path: "Storage".to_string(),
                dependencies: vec![],
            },
        );
        manifest.deployment_order.push("Storage".to_string());
        manifest.messages.push(ManifestMessage {
            level: AnnotationLevel::Warning,
            path: "Empty".to_string(),
            message: "stack has no resources".to_string(),
        });

        let value: serde_json::Value = serde_json::from_str(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(value["version"], "1.0.0");
        assert_eq!(value["artifacts"]["Storage"]["template_file"], "Storage.template.json");
        assert!(value.get("exports").is_none());
        assert_eq!(value["messages"][0]["level"], "warning");
        assert!(manifest.has_warnings());
        assert_eq!(AssemblyManifest::from_json(&manifest.to_json().unwrap()).unwrap(), manifest);
    }
}
