//! Data models for blueprint documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use forma_core::RemovalPolicy;

/// Root of a blueprint document: an app made of stacks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tags applied to every resource of the app.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub stacks: Vec<StackSpec>,
}

impl Blueprint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_stack(mut self, stack: StackSpec) -> Self {
        self.stacks.push(stack);
        self
    }

    /// Combine several documents into one app.
    ///
    /// The first document provides the name and description; tags and
    /// stacks are concatenated in order.
    pub fn merge(blueprints: Vec<Blueprint>) -> Blueprint {
        let mut iter = blueprints.into_iter();
        let Some(mut merged) = iter.next() else {
            return Blueprint::default();
        };
        for blueprint in iter {
            for (key, value) in blueprint.tags {
                merged.tags.entry(key).or_insert(value);
            }
            merged.stacks.extend(blueprint.stacks);
        }
        merged
    }

    pub fn stack(&self, id: &str) -> Option<&StackSpec> {
        self.stacks.iter().find(|s| s.id == id)
    }
}

/// A deployable stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackSpec {
    pub id: String,
    /// Deployed name; derived from the id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputSpec>,
}

impl StackSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_resource(mut self, resource: ResourceSpec) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn with_group(mut self, group: GroupSpec) -> Self {
        self.groups.push(group);
        self
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }
}

/// A grouping of resources without a template representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupSpec>,
    /// Paths this whole group depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl GroupSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_resource(mut self, resource: ResourceSpec) -> Self {
        self.resources.push(resource);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Json>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<RemovalPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<RemovalPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Json>,
    /// Pinned logical id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_id: Option<String>,
}

impl ResourceSpec {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            ..Self::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Json) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_dependency(mut self, path: impl Into<String>) -> Self {
        self.depends_on.push(path.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub id: String,
    #[serde(rename = "type", default = "default_parameter_type")]
    pub parameter_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<Json>,
    #[serde(default)]
    pub no_echo: bool,
}

fn default_parameter_type() -> String {
    "String".to_string()
}

impl ParameterSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parameter_type: default_parameter_type(),
            default: None,
            description: None,
            allowed_values: Vec::new(),
            no_echo: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub id: String,
    pub value: Json,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl OutputSpec {
    pub fn new(id: impl Into<String>, value: impl Into<Json>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            description: None,
            export_name: None,
            condition: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blueprint_from_yaml() {
        let yaml = r#"
name: shop
tags:
  team: payments
stacks:
  - id: Storage
    resources:
      - id: Orders
        type: AWS::DynamoDB::Table
        deletion_policy: Retain
        properties:
          BillingMode: PAY_PER_REQUEST
    parameters:
      - id: Environment
        default: dev
"#;
        let blueprint: Blueprint = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(blueprint.name, "shop");
        let storage = blueprint.stack("Storage").unwrap();
        let orders = &storage.resources[0];
        assert_eq!(orders.resource_type, "AWS::DynamoDB::Table");
        assert_eq!(orders.deletion_policy, Some(RemovalPolicy::Retain));
        assert_eq!(orders.properties["BillingMode"], Json::from("PAY_PER_REQUEST"));
        assert_eq!(storage.parameters[0].parameter_type, "String");
    }

    #[test]
    fn test_merge_keeps_first_name_and_concatenates_stacks() {
        let a = Blueprint::new("shop").with_stack(StackSpec::new("A"));
        let mut b = Blueprint::new("ignored").with_stack(StackSpec::new("B"));
        b.tags.insert("team".to_string(), "payments".to_string());

        let merged = Blueprint::merge(vec![a, b]);
        assert_eq!(merged.name, "shop");
        assert_eq!(merged.stacks.len(), 2);
        assert_eq!(merged.tags["team"], "payments");
        assert_eq!(Blueprint::merge(vec![]), Blueprint::default());
    }
}
