//! Blueprint validation utilities.
//!
//! Structural checks that can be made on the document alone, before any
//! construct is created. Everything found is reported at once.

use std::collections::{BTreeSet, HashSet};

use serde_json::Value as Json;

use crate::expression;
use crate::models::{Blueprint, GroupSpec, ResourceSpec, StackSpec};

/// Validation result with details.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Validator for blueprint documents.
pub struct BlueprintValidator;

impl BlueprintValidator {
    /// Validate a whole blueprint.
    pub fn validate(blueprint: &Blueprint) -> ValidationResult {
        let mut result = ValidationResult::new();

        if blueprint.name.trim().is_empty() {
            result.add_error("Blueprint name cannot be empty");
        }
        if blueprint.stacks.is_empty() {
            result.add_warning(format!("Blueprint '{}' defines no stacks", blueprint.name));
        }

        let mut stack_ids = HashSet::new();
        for stack in &blueprint.stacks {
            if !stack_ids.insert(stack.id.as_str()) {
                result.add_error(format!("Duplicate stack id '{}'", stack.id));
            }
        }

        let paths = known_paths(blueprint);
        for stack in &blueprint.stacks {
            result.merge(Self::validate_stack(stack, &paths));
        }

        result
    }

    /// Validate one stack against the set of paths defined by the blueprint.
    pub fn validate_stack(stack: &StackSpec, paths: &BTreeSet<String>) -> ValidationResult {
        let mut result = ValidationResult::new();
        check_id(&mut result, "Stack", &stack.id);

        let mut siblings = HashSet::new();
        let ids = stack
            .parameters
            .iter()
            .map(|p| p.id.as_str())
            .chain(stack.resources.iter().map(|r| r.id.as_str()))
            .chain(stack.groups.iter().map(|g| g.id.as_str()))
            .chain(stack.outputs.iter().map(|o| o.id.as_str()));
        for id in ids {
            check_id(&mut result, "Construct", id);
            if !siblings.insert(id) {
                result.add_error(format!("Duplicate id '{}' in stack '{}'", id, stack.id));
            }
        }

        if stack.resources.is_empty() && stack.groups.iter().all(group_is_empty) {
            result.add_warning(format!("Stack '{}' has no resources", stack.id));
        }

        for parameter in &stack.parameters {
            if parameter.parameter_type.trim().is_empty() {
                result.add_error(format!(
                    "Parameter '{}/{}' has an empty type",
                    stack.id, parameter.id
                ));
            }
        }

        for resource in &stack.resources {
            result.merge(Self::validate_resource(stack, &stack.id, resource, paths));
        }
        for group in &stack.groups {
            result.merge(Self::validate_group(stack, &stack.id, group, paths));
        }

        for output in &stack.outputs {
            let location = format!("{}/{}", stack.id, output.id);
            if output.value.is_null() {
                result.add_error(format!("Output '{}' has no value", location));
            }
            check_expressions(&mut result, &stack.id, &location, &output.value, paths);
        }

        result
    }

    fn validate_group(
        stack: &StackSpec,
        parent: &str,
        group: &GroupSpec,
        paths: &BTreeSet<String>,
    ) -> ValidationResult {
        let mut result = ValidationResult::new();
        let location = format!("{}/{}", parent, group.id);

        let mut siblings = HashSet::new();
        for id in group
            .resources
            .iter()
            .map(|r| r.id.as_str())
            .chain(group.groups.iter().map(|g| g.id.as_str()))
        {
            check_id(&mut result, "Construct", id);
            if !siblings.insert(id) {
                result.add_error(format!("Duplicate id '{}' in group '{}'", id, location));
            }
        }

        check_dependencies(&mut result, &stack.id, &location, &group.depends_on, paths);

        for resource in &group.resources {
            result.merge(Self::validate_resource(stack, &location, resource, paths));
        }
        for child in &group.groups {
            result.merge(Self::validate_group(stack, &location, child, paths));
        }
        result
    }

    fn validate_resource(
        stack: &StackSpec,
        parent: &str,
        resource: &ResourceSpec,
        paths: &BTreeSet<String>,
    ) -> ValidationResult {
        let mut result = ValidationResult::new();
        let location = format!("{}/{}", parent, resource.id);

        if !is_resource_type(&resource.resource_type) {
            result.add_error(format!(
                "Resource '{}' has malformed type '{}'",
                location, resource.resource_type
            ));
        }

        if let Some(logical_id) = &resource.logical_id {
            if logical_id.is_empty() || !logical_id.chars().all(|c| c.is_ascii_alphanumeric()) {
                result.add_error(format!(
                    "Resource '{}' has non-alphanumeric logical id '{}'",
                    location, logical_id
                ));
            }
        }

        check_dependencies(&mut result, &stack.id, &location, &resource.depends_on, paths);

        for value in resource.properties.values().chain(resource.metadata.values()) {
            check_expressions(&mut result, &stack.id, &location, value, paths);
        }
        result
    }
}

fn check_id(result: &mut ValidationResult, what: &str, id: &str) {
    if id.trim().is_empty() {
        result.add_error(format!("{} id cannot be empty", what));
    } else if id.contains('/') {
        result.add_error(format!("{} id '{}' must not contain '/'", what, id));
    }
}

fn group_is_empty(group: &GroupSpec) -> bool {
    group.resources.is_empty() && group.groups.iter().all(group_is_empty)
}

fn is_resource_type(resource_type: &str) -> bool {
    let segments: Vec<&str> = resource_type.split("::").collect();
    segments.len() >= 2
        && segments
            .iter()
            .all(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()))
}

fn resolves(stack: &str, path: &str, paths: &BTreeSet<String>) -> Option<String> {
    expression::candidate_paths(stack, path)
        .into_iter()
        .find(|candidate| paths.contains(candidate))
}

fn check_dependencies(
    result: &mut ValidationResult,
    stack: &str,
    location: &str,
    depends_on: &[String],
    paths: &BTreeSet<String>,
) {
    for dependency in depends_on {
        match resolves(stack, dependency, paths) {
            Some(target) if target == location => {
                result.add_error(format!("'{}' cannot depend on itself", location));
            }
            Some(_) => {}
            None => result.add_error(format!(
                "'{}' depends on unknown construct '{}'",
                location, dependency
            )),
        }
    }
}

fn check_expressions(
    result: &mut ValidationResult,
    stack: &str,
    location: &str,
    value: &Json,
    paths: &BTreeSet<String>,
) {
    match value {
        Json::String(s) => match expression::parse(s) {
            Ok(expressions) => {
                for expression in expressions {
                    if resolves(stack, &expression.path, paths).is_none() {
                        result.add_error(format!(
                            "'{}' references unknown construct '{}'",
                            location, expression.path
                        ));
                    }
                }
            }
            Err(e) => result.add_error(format!("'{}': {}", location, e)),
        },
        Json::Array(items) => {
            for item in items {
                check_expressions(result, stack, location, item, paths);
            }
        }
        Json::Object(map) => {
            for (key, item) in map {
                if expression::contains_expression(key) {
                    result.add_error(format!(
                        "'{}': property name '{}' cannot contain a reference",
                        location, key
                    ));
                }
                check_expressions(result, stack, location, item, paths);
            }
        }
        Json::Null | Json::Bool(_) | Json::Number(_) => {}
    }
}

/// Absolute paths of every construct the blueprint defines.
pub fn known_paths(blueprint: &Blueprint) -> BTreeSet<String> {
    fn add_group(paths: &mut BTreeSet<String>, parent: &str, group: &GroupSpec) {
        let path = format!("{}/{}", parent, group.id);
        for resource in &group.resources {
            paths.insert(format!("{}/{}", path, resource.id));
        }
        for child in &group.groups {
            add_group(paths, &path, child);
        }
        paths.insert(path);
    }

    let mut paths = BTreeSet::new();
    for stack in &blueprint.stacks {
        paths.insert(stack.id.clone());
        for id in stack
            .parameters
            .iter()
            .map(|p| &p.id)
            .chain(stack.resources.iter().map(|r| &r.id))
            .chain(stack.outputs.iter().map(|o| &o.id))
        {
            paths.insert(format!("{}/{}", stack.id, id));
        }
        for group in &stack.groups {
            add_group(&mut paths, &stack.id, group);
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutputSpec, StackSpec};
    use serde_json::json;

    fn blueprint() -> Blueprint {
        Blueprint::new("shop")
            .with_stack(
                StackSpec::new("Storage")
                    .with_resource(ResourceSpec::new("Bucket", "AWS::S3::Bucket")),
            )
            .with_stack(
                StackSpec::new("Compute").with_resource(
                    ResourceSpec::new("Handler", "AWS::Lambda::Function")
                        .with_property("Bucket", json!("${Ref:Storage/Bucket}")),
                ),
            )
    }

    #[test]
    fn test_valid_blueprint() {
        let result = BlueprintValidator::validate(&blueprint());
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_unknown_reference_and_dependency() {
        let mut bp = blueprint();
        bp.stacks[1].resources[0]
            .properties
            .insert("Queue".to_string(), json!("${GetAtt:Missing.Arn}"));
        bp.stacks[1].resources[0].depends_on.push("Nowhere".to_string());

        let result = BlueprintValidator::validate(&bp);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_duplicates_and_bad_types() {
        let mut bp = blueprint();
        bp.stacks.push(StackSpec::new("Storage"));
        bp.stacks[0]
            .resources
            .push(ResourceSpec::new("Bucket", "NotAType"));

        let result = BlueprintValidator::validate(&bp);
        assert!(result.errors.iter().any(|e| e.contains("Duplicate stack id")));
        assert!(result.errors.iter().any(|e| e.contains("Duplicate id 'Bucket'")));
        assert!(result.errors.iter().any(|e| e.contains("malformed type")));
        assert!(result.warnings.iter().any(|w| w.contains("no resources")));
    }

    #[test]
    fn test_self_dependency_and_null_output() {
        let mut bp = blueprint();
        bp.stacks[0].resources[0].depends_on.push("Bucket".to_string());
        bp.stacks[0].outputs.push(OutputSpec::new("Nothing", Json::Null));

        let result = BlueprintValidator::validate(&bp);
        assert_eq!(result.errors.len(), 2, "{:?}", result.errors);
    }

    #[test]
    fn test_known_paths_include_groups() {
        let mut bp = blueprint();
        bp.stacks[0].groups.push(
            GroupSpec::new("Network").with_resource(ResourceSpec::new("Vpc", "AWS::EC2::VPC")),
        );
        let paths = known_paths(&bp);
        assert!(paths.contains("Storage/Network"));
        assert!(paths.contains("Storage/Network/Vpc"));
        assert!(paths.contains("Compute/Handler"));
    }
}
