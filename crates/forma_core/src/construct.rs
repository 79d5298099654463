//! Typed construct handles and the capabilities they expose.
//!
//! Handles are thin wrappers around a [`NodeId`]. Cross-cutting behaviour is
//! expressed through capability traits rather than a type hierarchy:
//!
//! - [`Construct`]: has a node in the tree.
//! - [`Referenceable`]: exposes a primary identifier (`Ref`).
//! - [`HasAttributes`]: exposes named attributes (`Fn::GetAtt`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::token::Token;
use crate::tree::{App, NodeId, NodeKind};
use crate::value::Value;

/// Anything with a node in the construct tree.
pub trait Construct {
    fn node_id(&self) -> NodeId;

    fn path(&self, app: &App) -> String {
        app.path(self.node_id())
    }

    /// Declare that this construct depends on `other`.
    fn add_dependency(&self, app: &mut App, other: &dyn Construct) -> CoreResult<()> {
        app.add_dependency(self.node_id(), other.node_id())
    }
}

impl Construct for NodeId {
    fn node_id(&self) -> NodeId {
        *self
    }
}

/// Constructs that can be referenced by their primary identifier.
pub trait Referenceable: Construct {
    fn reference(&self, app: &mut App) -> Token {
        app.reference(self.node_id())
    }
}

/// Constructs exposing named attributes.
pub trait HasAttributes: Construct {
    fn attribute(&self, app: &mut App, name: &str) -> Token {
        app.get_att(self.node_id(), name)
    }

    fn list_attribute(&self, app: &mut App, name: &str) -> Token {
        app.get_att_list(self.node_id(), name)
    }
}

/// Policy applied when a resource is deleted or replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalPolicy {
    Delete,
    Retain,
    Snapshot,
    RetainExceptOnCreate,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackProps {
    /// Deployed name; derived from the construct path when absent.
    pub stack_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceProps {
    pub resource_type: String,
    pub properties: BTreeMap<String, Value>,
    /// Raw overrides applied to the resolved properties, by dotted path.
    pub overrides: Vec<(String, Value)>,
    pub deletion_policy: Option<RemovalPolicy>,
    pub update_replace_policy: Option<RemovalPolicy>,
    pub condition: Option<String>,
}

impl ResourceProps {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: BTreeMap::new(),
            overrides: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
            condition: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterProps {
    pub parameter_type: String,
    pub default: Option<Value>,
    pub description: Option<String>,
    pub allowed_values: Vec<Value>,
    pub no_echo: bool,
}

impl Default for ParameterProps {
    fn default() -> Self {
        Self {
            parameter_type: "String".to_string(),
            default: None,
            description: None,
            allowed_values: Vec::new(),
            no_echo: false,
        }
    }
}

impl ParameterProps {
    pub fn with_type(mut self, parameter_type: impl Into<String>) -> Self {
        self.parameter_type = parameter_type.into();
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputProps {
    pub value: Value,
    pub description: Option<String>,
    pub export_name: Option<String>,
    pub condition: Option<String>,
}

impl OutputProps {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            description: None,
            export_name: None,
            condition: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_export_name(mut self, export_name: impl Into<String>) -> Self {
        self.export_name = Some(export_name.into());
        self
    }
}

/// One assertion of a template rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleAssertion {
    pub assert: Value,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleProps {
    pub rule_condition: Option<Value>,
    pub assertions: Vec<RuleAssertion>,
}

/// A deployable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stack(NodeId);

impl Stack {
    /// Create a stack directly under the app root.
    pub fn new(app: &mut App, id: &str) -> CoreResult<Self> {
        let root = app.root();
        Self::with_props(app, &root, id, StackProps::default())
    }

    pub fn with_props(
        app: &mut App,
        scope: &dyn Construct,
        id: &str,
        props: StackProps,
    ) -> CoreResult<Self> {
        app.add_child(scope.node_id(), id, NodeKind::Stack(props))
            .map(Self)
    }
}

impl Construct for Stack {
    fn node_id(&self) -> NodeId {
        self.0
    }
}

/// Grouping construct with no template representation of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Group(NodeId);

impl Group {
    pub fn new(app: &mut App, scope: &dyn Construct, id: &str) -> CoreResult<Self> {
        app.add_child(scope.node_id(), id, NodeKind::Group).map(Self)
    }
}

impl Construct for Group {
    fn node_id(&self) -> NodeId {
        self.0
    }
}

/// A raw template resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfnResource(NodeId);

impl CfnResource {
    /// Create a resource of `resource_type` (e.g. `AWS::S3::Bucket`).
    pub fn new(
        app: &mut App,
        scope: &dyn Construct,
        id: &str,
        resource_type: &str,
    ) -> CoreResult<Self> {
        validate_resource_type(app, scope.node_id(), id, resource_type)?;
        app.add_child(
            scope.node_id(),
            id,
            NodeKind::Resource(ResourceProps::new(resource_type)),
        )
        .map(Self)
    }

    /// Wrap an existing resource node.
    pub fn from_node(app: &App, node: NodeId) -> CoreResult<Self> {
        match app.get(node).map(|n| n.kind()) {
            Some(NodeKind::Resource(_)) => Ok(Self(node)),
            Some(_) => Err(CoreError::InvalidState(format!(
                "'{}' is not a resource",
                app.display_path(node)
            ))),
            None => Err(CoreError::NodeNotFound(node.to_string())),
        }
    }

    pub fn set_property(
        &self,
        app: &mut App,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        let key = key.into();
        if crate::encoding::contains_token(&key) {
            return Err(CoreError::MalformedProperty {
                path: app.display_path(self.0),
                message: format!("property name '{}' contains a token", key),
            });
        }
        self.props_mut(app)?.properties.insert(key, value.into());
        Ok(())
    }

    /// Override a value in the resolved properties by dotted path.
    pub fn add_property_override(
        &self,
        app: &mut App,
        path: impl Into<String>,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        let path = path.into();
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(CoreError::MalformedProperty {
                path: app.display_path(self.0),
                message: format!("invalid override path '{}'", path),
            });
        }
        self.props_mut(app)?.overrides.push((path, value.into()));
        Ok(())
    }

    /// Set both deletion and update-replace policies.
    pub fn apply_removal_policy(&self, app: &mut App, policy: RemovalPolicy) -> CoreResult<()> {
        let props = self.props_mut(app)?;
        props.deletion_policy = Some(policy);
        props.update_replace_policy = Some(policy);
        Ok(())
    }

    pub fn set_deletion_policy(&self, app: &mut App, policy: RemovalPolicy) -> CoreResult<()> {
        self.props_mut(app)?.deletion_policy = Some(policy);
        Ok(())
    }

    pub fn set_update_replace_policy(&self, app: &mut App, policy: RemovalPolicy) -> CoreResult<()> {
        self.props_mut(app)?.update_replace_policy = Some(policy);
        Ok(())
    }

    pub fn set_condition(&self, app: &mut App, condition: impl Into<String>) -> CoreResult<()> {
        self.props_mut(app)?.condition = Some(condition.into());
        Ok(())
    }

    fn props_mut<'a>(&self, app: &'a mut App) -> CoreResult<&'a mut ResourceProps> {
        match app.kind_mut(self.0)? {
            NodeKind::Resource(props) => Ok(props),
            _ => Err(CoreError::InvalidState(format!(
                "node {} is not a resource",
                self.0
            ))),
        }
    }
}

impl Construct for CfnResource {
    fn node_id(&self) -> NodeId {
        self.0
    }
}

impl Referenceable for CfnResource {}
impl HasAttributes for CfnResource {}

/// A template parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfnParameter(NodeId);

impl CfnParameter {
    pub fn new(
        app: &mut App,
        scope: &dyn Construct,
        id: &str,
        props: ParameterProps,
    ) -> CoreResult<Self> {
        app.add_child(scope.node_id(), id, NodeKind::Parameter(props))
            .map(Self)
    }

    /// The parameter's value, embeddable in strings.
    pub fn value_as_string(&self, app: &mut App) -> String {
        self.reference(app).as_string()
    }
}

impl Construct for CfnParameter {
    fn node_id(&self) -> NodeId {
        self.0
    }
}

impl Referenceable for CfnParameter {}

/// A template output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfnOutput(NodeId);

impl CfnOutput {
    pub fn new(app: &mut App, scope: &dyn Construct, id: &str, props: OutputProps) -> CoreResult<Self> {
        app.add_child(scope.node_id(), id, NodeKind::Output(props))
            .map(Self)
    }
}

impl Construct for CfnOutput {
    fn node_id(&self) -> NodeId {
        self.0
    }
}

/// A template rule with assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfnRule(NodeId);

impl CfnRule {
    pub fn new(app: &mut App, scope: &dyn Construct, id: &str, props: RuleProps) -> CoreResult<Self> {
        app.add_child(scope.node_id(), id, NodeKind::Rule(props))
            .map(Self)
    }

    pub fn add_assertion(
        &self,
        app: &mut App,
        assert: impl Into<Value>,
        description: impl Into<String>,
    ) -> CoreResult<()> {
        match app.kind_mut(self.0)? {
            NodeKind::Rule(props) => {
                props.assertions.push(RuleAssertion {
                    assert: assert.into(),
                    description: description.into(),
                });
                Ok(())
            }
            _ => Err(CoreError::InvalidState(format!(
                "node {} is not a rule",
                self.0
            ))),
        }
    }
}

impl Construct for CfnRule {
    fn node_id(&self) -> NodeId {
        self.0
    }
}

/// Resource types look like `Provider::Service::Type` (or `Custom::Name`).
fn validate_resource_type(app: &App, scope: NodeId, id: &str, resource_type: &str) -> CoreResult<()> {
    let segments: Vec<&str> = resource_type.split("::").collect();
    let well_formed = segments.len() >= 2
        && segments
            .iter()
            .all(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()));
    if well_formed {
        return Ok(());
    }
    let scope_path = app.path(scope);
    let path = if scope_path.is_empty() {
        id.to_string()
    } else {
        format!("{}/{}", scope_path, id)
    };
    Err(CoreError::MalformedProperty {
        path,
        message: format!("malformed resource type '{}'", resource_type),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_resource_type_is_a_construction_error() {
        let mut app = App::new();
        let stack = Stack::new(&mut app, "S").unwrap();

        let err = CfnResource::new(&mut app, &stack, "Bad", "NotAType").unwrap_err();
        assert!(matches!(err, CoreError::MalformedProperty { ref path, .. } if path == "S/Bad"));

        assert!(CfnResource::new(&mut app, &stack, "Custom", "Custom::Thing").is_ok());
    }

    #[test]
    fn test_removal_policy_sets_both_policies() {
        let mut app = App::new();
        let stack = Stack::new(&mut app, "S").unwrap();
        let table = CfnResource::new(&mut app, &stack, "Table", "AWS::DynamoDB::Table").unwrap();
        table.apply_removal_policy(&mut app, RemovalPolicy::Retain).unwrap();

        let NodeKind::Resource(props) = app.kind(table.node_id()) else {
            panic!("expected resource");
        };
        assert_eq!(props.deletion_policy, Some(RemovalPolicy::Retain));
        assert_eq!(props.update_replace_policy, Some(RemovalPolicy::Retain));
    }

    #[test]
    fn test_property_name_with_token_rejected() {
        let mut app = App::new();
        let stack = Stack::new(&mut app, "S").unwrap();
        let queue = CfnResource::new(&mut app, &stack, "Queue", "AWS::SQS::Queue").unwrap();
        let token = app.synthesis_time();

        let err = queue
            .set_property(&mut app, format!("Key{}", token), "v")
            .unwrap_err();
        assert!(matches!(err, CoreError::MalformedProperty { .. }));
    }

    #[test]
    fn test_from_node_checks_kind() {
        let mut app = App::new();
        let stack = Stack::new(&mut app, "S").unwrap();
        let queue = CfnResource::new(&mut app, &stack, "Queue", "AWS::SQS::Queue").unwrap();

        assert!(CfnResource::from_node(&app, queue.node_id()).is_ok());
        assert!(CfnResource::from_node(&app, stack.node_id()).is_err());
    }
}
