//! Builds a construct tree from a blueprint.

use std::collections::BTreeMap;

use serde_json::Value as Json;
use tracing::{debug, info, warn};

use forma_core::{
    App, CfnOutput, CfnParameter, CfnResource, Construct, Group, NodeId, OutputProps,
    ParameterProps, Stack, StackProps, Tag, Token, Value,
};

use crate::error::{BlueprintError, BlueprintResult};
use crate::expression::{self, Expression};
use crate::models::{Blueprint, GroupSpec, ResourceSpec, StackSpec};
use crate::validator::BlueprintValidator;

/// Turns a [`Blueprint`] into an [`App`] ready for synthesis.
///
/// Constructs are created first and wired afterwards, so references and
/// dependencies may point at constructs declared later in the document or
/// in another stack.
pub struct BlueprintBuilder<'a> {
    blueprint: &'a Blueprint,
}

impl<'a> BlueprintBuilder<'a> {
    pub fn new(blueprint: &'a Blueprint) -> Self {
        Self { blueprint }
    }

    pub fn build(&self) -> BlueprintResult<App> {
        let validation = BlueprintValidator::validate(self.blueprint);
        for warning in &validation.warnings {
            warn!("{}", warning);
        }
        if !validation.valid {
            return Err(BlueprintError::Invalid(validation.errors));
        }

        info!("Building app '{}'", self.blueprint.name);
        let mut app = App::new();
        let root = app.root();

        let mut stacks = Vec::with_capacity(self.blueprint.stacks.len());
        for spec in &self.blueprint.stacks {
            let stack = Stack::with_props(
                &mut app,
                &root,
                &spec.id,
                StackProps {
                    stack_name: spec.stack_name.clone(),
                    description: spec.description.clone(),
                },
            )?;
            self.declare_stack(&mut app, stack, spec)?;
            stacks.push(stack);
        }

        for (stack, spec) in stacks.iter().zip(&self.blueprint.stacks) {
            let mut wiring = Wiring {
                app: &mut app,
                stack: *stack,
                stack_id: &spec.id,
            };
            wiring.wire_resources(&spec.id, &spec.resources)?;
            for group in &spec.groups {
                wiring.wire_group(&spec.id, group)?;
            }
            for output in &spec.outputs {
                let value = wiring.convert(&output.value)?;
                let mut props = OutputProps::new(value);
                props.description = output.description.clone();
                props.export_name = output.export_name.clone();
                props.condition = output.condition.clone();
                CfnOutput::new(wiring.app, stack, &output.id, props)?;
            }
        }

        // Registered after the stack tags; the first tag for a key wins.
        for (key, value) in &self.blueprint.tags {
            app.add_aspect(root, Tag::new(key, value))?;
        }

        debug!("Built app with {} nodes", app.len());
        Ok(app)
    }

    /// Create the stack's parameters, resources and groups.
    fn declare_stack(&self, app: &mut App, stack: Stack, spec: &StackSpec) -> BlueprintResult<()> {
        for parameter in &spec.parameters {
            let mut props = ParameterProps::default().with_type(&parameter.parameter_type);
            props.default = parameter.default.clone().map(Value::from);
            props.description = parameter.description.clone();
            props.allowed_values = parameter
                .allowed_values
                .iter()
                .cloned()
                .map(Value::from)
                .collect();
            props.no_echo = parameter.no_echo;
            CfnParameter::new(app, &stack, &parameter.id, props)?;
        }

        declare_resources(app, stack.node_id(), &spec.resources)?;
        for group in &spec.groups {
            declare_group(app, stack.node_id(), group)?;
        }

        for (key, value) in &spec.tags {
            app.add_aspect(stack.node_id(), Tag::new(key, value))?;
        }
        Ok(())
    }
}

fn declare_resources(app: &mut App, scope: NodeId, resources: &[ResourceSpec]) -> BlueprintResult<()> {
    for spec in resources {
        let resource = CfnResource::new(app, &scope, &spec.id, &spec.resource_type)?;
        if let Some(policy) = spec.deletion_policy {
            resource.set_deletion_policy(app, policy)?;
        }
        if let Some(policy) = spec.update_replace_policy {
            resource.set_update_replace_policy(app, policy)?;
        }
        if let Some(condition) = &spec.condition {
            resource.set_condition(app, condition)?;
        }
        if let Some(logical_id) = &spec.logical_id {
            app.override_logical_id(resource.node_id(), logical_id)?;
        }
    }
    Ok(())
}

fn declare_group(app: &mut App, scope: NodeId, spec: &GroupSpec) -> BlueprintResult<()> {
    let group = Group::new(app, &scope, &spec.id)?;
    declare_resources(app, group.node_id(), &spec.resources)?;
    for child in &spec.groups {
        declare_group(app, group.node_id(), child)?;
    }
    Ok(())
}

/// Second pass: properties, metadata and dependencies of one stack.
struct Wiring<'w> {
    app: &'w mut App,
    stack: Stack,
    stack_id: &'w str,
}

impl Wiring<'_> {
    fn wire_resources(&mut self, parent: &str, resources: &[ResourceSpec]) -> BlueprintResult<()> {
        for spec in resources {
            let path = format!("{}/{}", parent, spec.id);
            let node = self.find(&path)?;
            let resource = CfnResource::from_node(self.app, node)?;

            for (key, value) in &spec.properties {
                let value = self.convert(value)?;
                resource.set_property(self.app, key, value)?;
            }
            for (key, value) in &spec.metadata {
                let value = self.convert(value)?;
                self.app.add_metadata(node, key, value)?;
            }
            self.wire_dependencies(node, &spec.depends_on)?;
        }
        Ok(())
    }

    fn wire_group(&mut self, parent: &str, spec: &GroupSpec) -> BlueprintResult<()> {
        let path = format!("{}/{}", parent, spec.id);
        let node = self.find(&path)?;
        self.wire_dependencies(node, &spec.depends_on)?;
        self.wire_resources(&path, &spec.resources)?;
        for child in &spec.groups {
            self.wire_group(&path, child)?;
        }
        Ok(())
    }

    fn wire_dependencies(&mut self, node: NodeId, depends_on: &[String]) -> BlueprintResult<()> {
        for dependency in depends_on {
            let target = self.lookup(dependency)?;
            self.app.add_dependency(node, target)?;
        }
        Ok(())
    }

    /// Convert a document value, turning reference expressions into tokens.
    fn convert(&mut self, value: &Json) -> BlueprintResult<Value> {
        Ok(match value {
            Json::String(s) => self.convert_string(s)?,
            Json::Array(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.convert(item))
                    .collect::<BlueprintResult<_>>()?,
            ),
            Json::Object(map) => {
                let mut converted = BTreeMap::new();
                for (key, item) in map {
                    converted.insert(key.clone(), self.convert(item)?);
                }
                Value::Map(converted)
            }
            other => Value::from(other.clone()),
        })
    }

    fn convert_string(&mut self, s: &str) -> BlueprintResult<Value> {
        let expressions = expression::parse(s)?;
        if expressions.is_empty() {
            return Ok(Value::from(s));
        }

        if let [only] = expressions.as_slice() {
            if only.start == 0 && only.end == s.len() {
                return Ok(Value::Token(self.token(only)?));
            }
        }

        let mut out = String::with_capacity(s.len());
        let mut cursor = 0;
        for expression in &expressions {
            out.push_str(&s[cursor..expression.start]);
            out.push_str(&self.token(expression)?.as_string());
            cursor = expression.end;
        }
        out.push_str(&s[cursor..]);
        Ok(Value::String(out))
    }

    fn token(&mut self, expression: &Expression) -> BlueprintResult<Token> {
        let target = self.lookup(&expression.path)?;
        Ok(match &expression.attribute {
            Some(attribute) => self.app.get_att(target, attribute),
            None => self.app.reference(target),
        })
    }

    /// Resolve a stack-relative or absolute path.
    fn lookup(&self, path: &str) -> BlueprintResult<NodeId> {
        expression::candidate_paths(self.stack_id, path)
            .iter()
            .find_map(|candidate| self.app.find_by_path(candidate))
            .ok_or_else(|| BlueprintError::UnknownReference {
                reference: path.to_string(),
                scope: self.stack_id.to_string(),
            })
    }

    fn find(&self, path: &str) -> BlueprintResult<NodeId> {
        self.app
            .find_by_path(path)
            .ok_or_else(|| BlueprintError::UnknownReference {
                reference: path.to_string(),
                scope: self.app.path(self.stack.node_id()),
            })
    }
}
