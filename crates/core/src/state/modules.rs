//! Managed modules list: a YAML sequence of repository names.

use crate::error::{Result, SyncError};
use std::path::Path;

/// Read the ordered module names from `path`.
///
/// A missing, empty or non-list file is a setup error.
pub fn read_managed_modules(path: &Path) -> Result<Vec<String>> {
    let empty = || SyncError::EmptyModuleList(path.to_path_buf());

    let contents = std::fs::read_to_string(path).map_err(|_| empty())?;
    let modules: Vec<String> = serde_yaml_ng::from_str::<Option<Vec<String>>>(&contents)
        .map_err(|e| {
            tracing::error!(path = %path.display(), "Error reading in modules: {}", e);
            empty()
        })?
        .unwrap_or_default()
        .into_iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();

    if modules.is_empty() {
        return Err(empty());
    }
    Ok(modules)
}
