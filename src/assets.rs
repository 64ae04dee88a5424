//! The depot home directory and managed workspace configuration.
//!
//! Depot keeps its bundled helper modules and config templates in a home
//! directory (`$DEPOT_HOME`, defaulting to `~/.depot`). Workspaces receive
//! the config set as symlinks into that directory, and a fence line in
//! `.gitignore` separates depot-managed entries from user-authored ones.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::util;

pub const HOME_ENV_VAR: &str = "DEPOT_HOME";

/// The fence: everything below this line in `.gitignore` is regenerated.
pub const GITIGNORE_FENCE: &str = "# Managed by depot";

/// Config files symlinked from the asset directory into a workspace root.
pub const MANAGED_CONFIGS: &[&str] = &[
    "tsconfig.json",
    ".eslintrc.cjs",
    ".prettierrc.cjs",
    "vitest.config.ts",
];

/// Generated directories that always belong below the fence.
const GENERATED_ENTRIES: &[&str] = &["node_modules/", "dist/"];

/// Location of depot's bundled modules and config templates.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    root: PathBuf,
}

impl GlobalConfig {
    pub fn load() -> Result<Self> {
        let root = match std::env::var_os(HOME_ENV_VAR) {
            Some(dir) => PathBuf::from(dir),
            None => home::home_dir()
                .context("could not determine a home directory")?
                .join(".depot"),
        };
        debug!(root = %root.display(), "depot home");
        Ok(GlobalConfig { root })
    }

    #[cfg(test)]
    pub fn at(root: PathBuf) -> Self {
        GlobalConfig { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bundled JS modules; pushed onto children's `NODE_PATH`.
    pub fn node_path(&self) -> PathBuf {
        self.root.join("node_modules")
    }

    /// Bundled executables (the helper tools depot drives).
    pub fn bindir(&self) -> PathBuf {
        self.root.join("node_modules").join(".bin")
    }

    /// Config templates that get symlinked into workspaces.
    pub fn asset_dir(&self) -> PathBuf {
        self.root.join("assets")
    }
}

/// Symlinks every missing managed config into the workspace root. Existing
/// files are left alone, whether managed or user-authored. Returns the
/// names currently present as managed symlinks.
pub fn install_configs(ws_root: &Path, config: &GlobalConfig) -> Result<Vec<String>> {
    let asset_dir = config.asset_dir();
    let mut managed = Vec::new();
    for name in MANAGED_CONFIGS {
        let source = asset_dir.join(name);
        let dest = ws_root.join(name);
        if !dest.exists() && source.exists() {
            symlink(&source, &dest)
                .with_context(|| format!("failed to link {}", dest.display()))?;
        }
        if is_managed(&dest, config) {
            managed.push((*name).to_string());
        }
    }
    Ok(managed)
}

/// True iff `path` is a symlink pointing into the depot asset directory.
pub fn is_managed(path: &Path, config: &GlobalConfig) -> bool {
    match std::fs::read_link(path) {
        Ok(target) => target.starts_with(config.asset_dir()),
        Err(_) => false,
    }
}

/// Removes every managed config symlink under `dir`.
pub fn remove_managed_configs(dir: &Path, config: &GlobalConfig) -> Result<()> {
    for name in MANAGED_CONFIGS {
        let path = dir.join(name);
        if is_managed(&path, config) {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
    }
    Ok(())
}

/// Rewrites everything after the fence line in `<ws_root>/.gitignore`,
/// preserving the user-authored section above it. Applying the same
/// managed set twice yields identical file contents.
pub fn rewrite_gitignore(ws_root: &Path, managed: &[String]) -> Result<()> {
    let path = ws_root.join(".gitignore");
    let existing = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(_) => String::new(),
    };

    let user_section = existing
        .split(GITIGNORE_FENCE)
        .next()
        .unwrap_or("")
        .trim_end();

    let mut out = String::new();
    if !user_section.is_empty() {
        out.push_str(user_section);
        out.push_str("\n\n");
    }
    out.push_str(GITIGNORE_FENCE);
    out.push('\n');
    for entry in GENERATED_ENTRIES {
        out.push_str(entry);
        out.push('\n');
    }
    for name in managed {
        out.push_str(name);
        out.push('\n');
    }

    util::create_dir_if_missing(ws_root)?;
    std::fs::write(&path, out).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(unix)]
fn symlink(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

#[cfg(windows)]
fn symlink(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(source, dest)
}
