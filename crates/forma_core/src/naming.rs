//! Deterministic identifiers derived from construct paths.
//!
//! Logical ids are computed from the path components below the owning stack:
//!
//! 1. `Default` components are dropped entirely.
//! 2. A single remaining component is used as-is (alphanumerics only).
//! 3. Otherwise the id is a human-readable part (alphanumerics of every
//!    component except `Resource`, truncated) followed by the first 8
//!    uppercase hex digits of SHA-256 over the `/`-joined components.
//!
//! The hash function is part of the output contract: changing it renames
//! every deployed resource.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};
use crate::synth::ValidationMessage;
use crate::tree::{App, NodeId, NodeKind, TraversalOrder};

const HIDDEN_ID: &str = "Default";
const HIDDEN_FROM_HUMAN: &str = "Resource";
const HASH_LEN: usize = 8;
const MAX_HUMAN_LEN: usize = 240;
const MAX_STACK_NAME_LEN: usize = 128;

/// Logical id for a node given its path components below its stack.
pub fn logical_id(components: &[&str]) -> String {
    let components: Vec<&str> = components
        .iter()
        .copied()
        .filter(|c| *c != HIDDEN_ID)
        .collect();

    if components.len() == 1 {
        let single = remove_non_alphanumeric(components[0]);
        if !single.is_empty() {
            return single;
        }
    }

    let mut human: String = components
        .iter()
        .filter(|c| **c != HIDDEN_FROM_HUMAN)
        .map(|c| remove_non_alphanumeric(c))
        .collect();
    human.truncate(MAX_HUMAN_LEN);
    if human.is_empty() {
        human.push_str("Construct");
    }

    format!("{}{}", human, path_hash(&components))
}

/// First 8 uppercase hex digits of SHA-256 over the `/`-joined components.
pub fn path_hash(components: &[&str]) -> String {
    let digest = Sha256::digest(components.join("/").as_bytes());
    let mut hash = hex::encode_upper(digest);
    hash.truncate(HASH_LEN);
    hash
}

/// Default deployed name of a stack from its path components.
pub fn stack_name(components: &[&str]) -> String {
    let joined = components
        .iter()
        .filter(|c| **c != HIDDEN_ID)
        .map(|c| {
            c.chars()
                .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-')
                .collect::<String>()
        })
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if joined.len() <= MAX_STACK_NAME_LEN {
        return joined;
    }
    let hash = path_hash(components);
    let mut truncated = joined;
    truncated.truncate(MAX_STACK_NAME_LEN - HASH_LEN - 1);
    format!("{}-{}", truncated, hash)
}

/// Output id used to export a referenced value from its producing stack.
pub fn export_output_id(logical_id: &str, attribute: &crate::token::Attribute) -> String {
    let (kind, attr) = match attribute {
        crate::token::Attribute::Ref => ("Ref", String::new()),
        crate::token::Attribute::GetAtt { name, .. } => ("FnGetAtt", remove_non_alphanumeric(name)),
    };
    let hash = path_hash(&[logical_id, attribute.name()]);
    format!("ExportsOutput{}{}{}{}", kind, logical_id, attr, hash)
}

/// Export name published by the producing stack.
pub fn export_name(stack_name: &str, output_id: &str) -> String {
    format!("{}:{}", stack_name, output_id)
}

fn remove_non_alphanumeric(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Identifiers computed for one app: stack names and per-node logical ids.
#[derive(Debug, Clone, Default)]
pub struct LogicalIds {
    logical_ids: BTreeMap<NodeId, String>,
    stack_names: BTreeMap<NodeId, String>,
}

impl LogicalIds {
    /// Compute identifiers for every stack and template element.
    ///
    /// Returns collisions (duplicate logical ids within a stack, duplicate
    /// stack names) as validation messages instead of failing, so they can be
    /// reported together with other validation errors.
    pub fn compute(app: &App) -> (Self, Vec<ValidationMessage>) {
        let mut ids = Self::default();
        let mut messages = Vec::new();
        let mut seen_stack_names: BTreeMap<String, NodeId> = BTreeMap::new();

        for stack in app.stacks() {
            let name = match app.kind(stack) {
                NodeKind::Stack(props) => props.stack_name.clone(),
                _ => None,
            }
            .unwrap_or_else(|| {
                let path = app.path(stack);
                stack_name(&path.split('/').collect::<Vec<_>>())
            });

            if let Some(existing) = seen_stack_names.get(&name) {
                messages.push(ValidationMessage::new(
                    app.path(stack),
                    format!(
                        "stack name '{}' is already used by '{}'",
                        name,
                        app.path(*existing)
                    ),
                ));
            } else {
                seen_stack_names.insert(name.clone(), stack);
            }
            ids.stack_names.insert(stack, name);

            let stack_depth = app.scopes(stack).len();
            let mut seen: BTreeMap<String, NodeId> = BTreeMap::new();
            for node in app.descendants(stack, TraversalOrder::PreOrder) {
                if !app.kind(node).has_logical_id() || app.stack_of(node) != Some(stack) {
                    continue;
                }
                let id = match app.node(node).logical_id_override() {
                    Some(id) => id.to_string(),
                    None => {
                        let components: Vec<&str> = app
                            .scopes(node)
                            .into_iter()
                            .skip(stack_depth)
                            .map(|n| app.node(n).id())
                            .collect();
                        logical_id(&components)
                    }
                };

                if let Some(existing) = seen.get(&id) {
                    messages.push(ValidationMessage::new(
                        app.path(node),
                        format!(
                            "logical id '{}' collides with '{}'",
                            id,
                            app.path(*existing)
                        ),
                    ));
                } else {
                    seen.insert(id.clone(), node);
                }
                ids.logical_ids.insert(node, id);
            }
        }

        (ids, messages)
    }

    pub fn logical_id(&self, node: NodeId) -> Option<&str> {
        self.logical_ids.get(&node).map(String::as_str)
    }

    pub fn stack_name(&self, stack: NodeId) -> Option<&str> {
        self.stack_names.get(&stack).map(String::as_str)
    }

    /// Logical id of a node, or an error naming its path.
    pub fn require_logical_id(&self, app: &App, node: NodeId) -> CoreResult<&str> {
        self.logical_id(node).ok_or_else(|| {
            CoreError::InvalidState(format!(
                "'{}' ({}) has no logical id; only resources, parameters, outputs and rules do",
                app.display_path(node),
                app.kind(node).label()
            ))
        })
    }

    pub fn require_stack_name(&self, app: &App, stack: NodeId) -> CoreResult<&str> {
        self.stack_name(stack).ok_or_else(|| {
            CoreError::InvalidState(format!("'{}' is not a stack", app.display_path(stack)))
        })
    }
}
