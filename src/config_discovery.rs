use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::CONFIG_FILE_NAME;

/// Discovers the project root by traversing up the directory tree
///
/// The project root is the nearest ancestor (or `start_dir` itself) that
/// contains a `weft.toml`.
pub fn discover_project_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();

    loop {
        if current.join(CONFIG_FILE_NAME).exists() {
            return Some(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Resolves the project root for a command
///
/// An explicit directory wins. Otherwise the root is discovered from the
/// current directory, and the current directory itself is used when no
/// `weft.toml` exists anywhere above it.
pub fn resolve_project_root(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        let path = PathBuf::from(dir);
        return path
            .canonicalize()
            .with_context(|| format!("Project directory not found: {}", dir));
    }

    let current_dir =
        std::env::current_dir().context("Failed to get current directory for project discovery")?;

    match discover_project_root(&current_dir) {
        Some(root) => {
            tracing::debug!(root = %root.display(), "discovered project root");
            Ok(root)
        }
        None => {
            tracing::debug!("no weft.toml found, using current directory as project root");
            Ok(current_dir)
        }
    }
}
