//! Path validation: keeps built-in file tools inside the workspace.

use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside the workspace")]
    OutsideWorkspace { path: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// Resolve `requested` against `workspace` and make sure it stays inside.
///
/// Relative paths are joined onto the workspace; absolute paths must already
/// point into it. `..` components are rejected outright. Existing paths (or
/// the nearest existing ancestor) are canonicalized so symlinks cannot escape.
pub fn resolve_in_workspace(
    workspace: &Path,
    requested: &str,
) -> Result<PathBuf, PathValidationError> {
    let requested_path = Path::new(requested);
    if requested_path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(PathValidationError::PathTraversal {
            path: requested.into(),
        });
    }

    let root = workspace
        .canonicalize()
        .map_err(|e| PathValidationError::CanonicalizeFailed {
            path: workspace.display().to_string(),
            reason: e.to_string(),
        })?;

    let joined = if requested_path.is_absolute() {
        requested_path.to_path_buf()
    } else {
        root.join(requested_path)
    };

    // Canonicalize the deepest existing ancestor, then re-append the rest.
    let mut existing = joined.as_path();
    let mut rest = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_owned());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = existing
        .canonicalize()
        .map_err(|e| PathValidationError::CanonicalizeFailed {
            path: requested.into(),
            reason: e.to_string(),
        })?;
    for name in rest.into_iter().rev() {
        resolved.push(name);
    }

    if !resolved.starts_with(&root) {
        return Err(PathValidationError::OutsideWorkspace {
            path: requested.into(),
        });
    }
    Ok(resolved)
}
