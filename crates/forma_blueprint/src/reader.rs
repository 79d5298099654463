//! Blueprint file reading utilities.

use std::fs;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{BlueprintError, BlueprintResult};
use crate::models::Blueprint;

/// Reader for blueprint files.
pub struct BlueprintReader;

impl BlueprintReader {
    /// Parse a blueprint from YAML content.
    pub fn read_str(content: &str) -> BlueprintResult<Blueprint> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read a blueprint from a file path.
    pub fn read_file(path: impl AsRef<Path>) -> BlueprintResult<Blueprint> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(BlueprintError::NotFound(path.to_path_buf()));
        }
        debug!("Reading blueprint from {:?}", path);

        let content = fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| BlueprintError::InvalidFormat {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Read every `*.yaml`/`*.yml` file under `dir`, in file name order.
    pub fn read_dir(dir: impl AsRef<Path>) -> BlueprintResult<Vec<Blueprint>> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(BlueprintError::NotFound(dir.to_path_buf()));
        }

        let mut blueprints = Vec::new();
        for entry in WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file()
                && path
                    .extension()
                    .map_or(false, |ext| ext == "yaml" || ext == "yml")
            {
                blueprints.push(Self::read_file(path)?);
            }
        }
        debug!("Read {} blueprint file(s) from {:?}", blueprints.len(), dir);
        Ok(blueprints)
    }

    /// Read files and directories, merging everything into one blueprint.
    pub fn read_paths<P: AsRef<Path>>(paths: &[P]) -> BlueprintResult<Blueprint> {
        let mut blueprints = Vec::new();
        for path in paths {
            let path = path.as_ref();
            if path.is_dir() {
                blueprints.extend(Self::read_dir(path)?);
            } else {
                blueprints.push(Self::read_file(path)?);
            }
        }
        Ok(Blueprint::merge(blueprints))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_str_rejects_missing_name() {
        assert!(BlueprintReader::read_str("stacks: []").is_err());
        assert_eq!(BlueprintReader::read_str("name: app").unwrap().name, "app");
    }

    #[test]
    fn test_read_file_missing() {
        let err = BlueprintReader::read_file("/nonexistent/forma.yaml").unwrap_err();
        assert!(matches!(err, BlueprintError::NotFound(_)));
    }
}
