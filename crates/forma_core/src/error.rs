//! Error types for the core engine.

use thiserror::Error;

use crate::synth::ValidationMessage;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while building or synthesizing a construct tree.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Duplicate construct id '{id}' under '{parent}'")]
    DuplicateId { parent: String, id: String },

    #[error("Invalid construct id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("Malformed property at '{path}': {message}")]
    MalformedProperty { path: String, message: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation failed with {} error(s):\n{}", .0.len(), render_messages(.0))]
    ValidationFailed(Vec<ValidationMessage>),

    #[error("Unresolvable token '{token}' at '{path}'")]
    UnresolvableToken { token: String, path: String },

    #[error("Circular or runaway token resolution at '{path}': depth {depth} exceeded ({chain})")]
    RunawayResolution {
        path: String,
        depth: usize,
        chain: String,
    },

    #[error("Resolver for token '{token}' failed at '{path}': {message}")]
    ResolverFailed {
        token: String,
        path: String,
        message: String,
    },

    #[error("Token in map key '{key}' at '{path}'; keys must be concrete strings")]
    TokenInMapKey { key: String, path: String },

    #[error("Unresolved reference to {reference} from '{path}'")]
    UnresolvedReference { reference: String, path: String },

    #[error("Cannot export {attribute} of '{producer}' for use in stack '{consumer}': {reason}")]
    UnexportableValue {
        attribute: String,
        producer: String,
        consumer: String,
        reason: String,
    },

    #[error("Import/export cycle between stacks: {}", render_cycle(.0))]
    ExportCycle(Vec<String>),

    #[error("Dependency cycle: {}", render_cycle(.cycle))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoreError {
    /// Validation messages carried by a `ValidationFailed` error.
    pub fn validation_messages(&self) -> &[ValidationMessage] {
        match self {
            CoreError::ValidationFailed(messages) => messages,
            _ => &[],
        }
    }
}

fn render_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}

fn render_messages(messages: &[ValidationMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("  - {}", m))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_rendering_closes_the_loop() {
        let err = CoreError::DependencyCycle {
            cycle: vec!["S/X".into(), "S/Y".into(), "S/Z".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle: S/X -> S/Y -> S/Z -> S/X");
    }

    #[test]
    fn test_validation_failed_lists_every_message() {
        let err = CoreError::ValidationFailed(vec![
            ValidationMessage::new("A", "first"),
            ValidationMessage::new("B", "second"),
        ]);
        let text = err.to_string();
        assert!(text.contains("2 error(s)"));
        assert!(text.contains("[A] first"));
        assert!(text.contains("[B] second"));
        assert_eq!(err.validation_messages().len(), 2);
    }
}
