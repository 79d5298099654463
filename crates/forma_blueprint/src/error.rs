//! Error types for blueprint loading.

use std::path::PathBuf;
use thiserror::Error;

use forma_core::CoreError;

/// Result type alias for blueprint operations.
pub type BlueprintResult<T> = Result<T, BlueprintError>;

/// Errors that can occur while reading or building a blueprint.
#[derive(Error, Debug)]
pub enum BlueprintError {
    #[error("Blueprint not found at path: {0}")]
    NotFound(PathBuf),

    #[error("Invalid blueprint format in file {path}: {message}")]
    InvalidFormat { path: PathBuf, message: String },

    #[error("Unknown reference '{reference}' in stack '{scope}'")]
    UnknownReference { reference: String, scope: String },

    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Blueprint validation failed:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),

    #[error("Construct error: {0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
