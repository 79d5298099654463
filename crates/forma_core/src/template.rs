//! Serialized template model.
//!
//! Sections keep insertion order ([`IndexMap`]); the synthesizer inserts
//! entries in a deterministic order, so serializing the same tree twice
//! gives identical bytes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::construct::RemovalPolicy;
use crate::error::CoreResult;

/// One stack's template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, ParameterEntry>,
    #[serde(default)]
    pub resources: IndexMap<String, ResourceEntry>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, OutputEntry>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub rules: IndexMap<String, RuleEntry>,
}

impl Template {
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> CoreResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_json(content: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceEntry {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, Json>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<RemovalPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<RemovalPolicy>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Json>,
}

impl ResourceEntry {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: serde_json::Map::new(),
            depends_on: Vec::new(),
            condition: None,
            deletion_policy: None,
            update_replace_policy: None,
            metadata: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterEntry {
    #[serde(rename = "Type")]
    pub parameter_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<Json>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_echo: bool,
}

impl ParameterEntry {
    pub fn new(parameter_type: impl Into<String>) -> Self {
        Self {
            parameter_type: parameter_type.into(),
            default: None,
            description: None,
            allowed_values: Vec::new(),
            no_echo: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutputEntry {
    pub value: Json,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_condition: Option<Json>,
    pub assertions: Vec<AssertionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssertionEntry {
    pub assert: Json,
    pub assert_description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_sections_omitted() {
        let mut template = Template::default();
        template
            .resources
            .insert("Bucket".to_string(), ResourceEntry::new("AWS::S3::Bucket"));

        let value: Json = serde_json::from_str(&template.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"Resources": {"Bucket": {"Type": "AWS::S3::Bucket"}}}));
    }

    #[test]
    fn test_resource_options_serialized() {
        let mut entry = ResourceEntry::new("AWS::RDS::DBInstance");
        entry.depends_on = vec!["Subnets".to_string()];
        entry.deletion_policy = Some(RemovalPolicy::Snapshot);
        entry.properties.insert("Engine".to_string(), json!("postgres"));

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({
                "Type": "AWS::RDS::DBInstance",
                "Properties": {"Engine": "postgres"},
                "DependsOn": ["Subnets"],
                "DeletionPolicy": "Snapshot"
            })
        );
    }

    #[test]
    fn test_output_export_shape() {
        let output = OutputEntry {
            value: json!({"Ref": "Bucket"}),
            description: None,
            export: Some(ExportName {
                name: "Storage:Bucket".to_string(),
            }),
            condition: None,
        };
        assert_eq!(
            serde_json::to_value(&output).unwrap(),
            json!({"Value": {"Ref": "Bucket"}, "Export": {"Name": "Storage:Bucket"}})
        );
    }

    #[test]
    fn test_resource_order_preserved() {
        let mut template = Template::default();
        for id in ["Zeta", "Alpha", "Mid"] {
            template
                .resources
                .insert(id.to_string(), ResourceEntry::new("Custom::Thing"));
        }
        let text = template.to_json().unwrap();
        let zeta = text.find("Zeta").unwrap();
        let alpha = text.find("Alpha").unwrap();
        let mid = text.find("Mid").unwrap();
        assert!(zeta < alpha && alpha < mid);

        let parsed = Template::from_json(&text).unwrap();
        assert_eq!(parsed, template);
    }
}
