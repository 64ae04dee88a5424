//! Small filesystem and git helpers shared across commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Creates a directory (and parents) if it does not already exist.
pub fn create_dir_if_missing(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory {}", path.display()))
}

/// Removes a directory tree, treating a missing directory as success.
pub fn remove_dir_all_if_exists(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(());
    }
    std::fs::remove_dir_all(path)
        .with_context(|| format!("failed to remove directory {}", path.display()))
}

/// Asks git for the repository toplevel containing `cwd`.
///
/// Returns `None` when `cwd` is not inside a repository or git is not
/// installed; workspace discovery then falls back to the filesystem root.
pub async fn git_root(cwd: &Path) -> Option<PathBuf> {
    let output = tokio::process::Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(cwd)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let raw = String::from_utf8(output.stdout).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_missing_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-there");
        assert!(remove_dir_all_if_exists(&missing).is_ok());
    }

    #[test]
    fn create_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a").join("b");
        create_dir_if_missing(&target).unwrap();
        create_dir_if_missing(&target).unwrap();
        assert!(target.is_dir());
    }
}
