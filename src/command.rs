//! Top-level commands and their per-package / per-workspace halves.
//!
//! A command is a tagged variant with a small capability surface: whether
//! it is order-independent, and which of the package and workspace halves
//! it implements. The scheduler only talks to this surface.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::debug;

use crate::assets::{self, GlobalConfig};
use crate::build::BuildCommand;
use crate::logger::Logger;
use crate::package::{Package, Platform, Target};
use crate::process::{self, Runner};
use crate::util;
use crate::workspace::Workspace;

/// Shared machinery handed to every running command.
pub struct Context {
    pub runner: Runner,
    pub logger: Arc<Logger>,
}

pub enum Command {
    Build(BuildCommand),
    Clean(CleanCommand),
    Doc(DocCommand),
    Fix(FixCommand),
    Fmt(FmtCommand),
    Init(InitCommand),
    Test(TestCommand),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Build(_) => "build",
            Command::Clean(_) => "clean",
            Command::Doc(_) => "doc",
            Command::Fix(_) => "fix",
            Command::Fmt(_) => "fmt",
            Command::Init(_) => "init",
            Command::Test(_) => "test",
        }
    }

    /// True when per-package runs have no ordering constraints.
    pub fn parallel(&self) -> bool {
        match self {
            Command::Build(build) => build.parallel(),
            Command::Clean(_) | Command::Fix(_) | Command::Fmt(_) => true,
            Command::Doc(_) | Command::Init(_) | Command::Test(_) => false,
        }
    }

    pub fn applies_to_packages(&self) -> bool {
        matches!(
            self,
            Command::Build(_) | Command::Clean(_) | Command::Fix(_) | Command::Fmt(_)
        )
    }

    pub fn applies_to_workspace(&self) -> bool {
        matches!(
            self,
            Command::Clean(_) | Command::Doc(_) | Command::Init(_) | Command::Test(_)
        )
    }

    pub async fn run_pkg(&self, pkg: &Package, cx: &Context) -> Result<bool> {
        match self {
            Command::Build(build) => build.run_pkg(pkg, cx).await,
            Command::Clean(clean) => clean.run_pkg(pkg),
            Command::Fix(fix) => fix.run_pkg(pkg, cx).await,
            Command::Fmt(fmt) => fmt.run_pkg(pkg, cx).await,
            Command::Doc(_) | Command::Init(_) | Command::Test(_) => Ok(true),
        }
    }

    pub async fn run_ws(&self, ws: &Workspace, cx: &Context) -> Result<bool> {
        match self {
            Command::Clean(clean) => clean.run_ws(ws),
            Command::Doc(doc) => doc.run_ws(ws, cx).await,
            Command::Init(init) => init.run_ws(ws, cx).await,
            Command::Test(test) => test.run_ws(ws, cx).await,
            Command::Build(_) | Command::Fix(_) | Command::Fmt(_) => Ok(true),
        }
    }
}

/// Removes generated files; `-a` also drops managed config symlinks.
pub struct CleanCommand {
    pub all: bool,
    pub config: GlobalConfig,
}

impl CleanCommand {
    fn run_pkg(&self, pkg: &Package) -> Result<bool> {
        util::remove_dir_all_if_exists(pkg.path("dist"))?;
        util::remove_dir_all_if_exists(pkg.path("node_modules"))?;
        if self.all {
            assets::remove_managed_configs(&pkg.dir, &self.config)?;
        }
        Ok(true)
    }

    fn run_ws(&self, ws: &Workspace) -> Result<bool> {
        util::remove_dir_all_if_exists(ws.root.join("node_modules"))?;
        if self.all {
            assets::remove_managed_configs(&ws.root, &self.config)?;
        }
        Ok(true)
    }
}

/// Generates library documentation with typedoc.
pub struct DocCommand {
    pub extra: Vec<String>,
}

impl DocCommand {
    async fn run_ws(&self, ws: &Workspace, cx: &Context) -> Result<bool> {
        cx.runner
            .run("typedoc", &self.extra, &ws.root, process::stdout_sink())
            .await
    }
}

/// Applies the linter's automatic fixes; order-independent across
/// packages.
pub struct FixCommand {
    pub extra: Vec<String>,
}

impl FixCommand {
    async fn run_pkg(&self, pkg: &Package, cx: &Context) -> Result<bool> {
        let mut args = vec![
            "--fix".to_string(),
            "--ext".to_string(),
            ".js,.ts,.tsx".to_string(),
            "src".to_string(),
        ];
        args.extend(self.extra.iter().cloned());
        // Remaining lint errors are expected here; like `build`, lint
        // status does not decide the outcome.
        let clean = pkg
            .spawn(&cx.runner, "eslint", &args, process::stdout_sink())
            .await?;
        debug!(pkg = %pkg.name, clean, "fix finished");
        Ok(true)
    }
}

/// Formats sources with prettier; order-independent across packages.
pub struct FmtCommand {
    pub extra: Vec<String>,
}

impl FmtCommand {
    async fn run_pkg(&self, pkg: &Package, cx: &Context) -> Result<bool> {
        let mut args = vec![
            "--write".to_string(),
            "{src,tests}/**/*.{ts,tsx}".to_string(),
        ];
        args.extend(self.extra.iter().cloned());
        pkg.spawn(&cx.runner, "prettier", &args, process::stdout_sink())
            .await
    }
}

/// Installs dependencies and wires up the managed workspace configs.
pub struct InitCommand {
    pub config: GlobalConfig,
    pub extra: Vec<String>,
}

impl InitCommand {
    async fn run_ws(&self, ws: &Workspace, cx: &Context) -> Result<bool> {
        let mut args = vec!["install".to_string()];
        args.extend(self.extra.iter().cloned());
        let ok = cx
            .runner
            .run("pnpm", &args, &ws.root, process::stdout_sink())
            .await?;

        let managed = assets::install_configs(&ws.root, &self.config)?;
        assets::rewrite_gitignore(&ws.root, &managed)?;
        Ok(ok)
    }
}

/// Runs the workspace test suite when a runner config is present.
pub struct TestCommand {
    pub extra: Vec<String>,
}

const TEST_CONFIGS: &[&str] = &["vitest.config.ts", "vitest.config.mts", "vitest.config.js"];

impl TestCommand {
    async fn run_ws(&self, ws: &Workspace, cx: &Context) -> Result<bool> {
        if !TEST_CONFIGS
            .iter()
            .any(|name| ws.root.join(name).exists())
        {
            debug!("no test runner config at the workspace root; skipping");
            return Ok(true);
        }
        let mut args = vec!["run".to_string()];
        args.extend(self.extra.iter().cloned());
        cx.runner
            .run("vitest", &args, &ws.root, process::stdout_sink())
            .await
    }
}

/// Scaffolds a new package (or a workspace containing one, with `-w`).
pub fn scaffold(
    cwd: &Path,
    name: &str,
    target: Target,
    platform: Platform,
    workspace: bool,
) -> Result<()> {
    let pkg_dir = if workspace {
        let root = cwd.join(name);
        util::create_dir_if_missing(&root)?;
        std::fs::write(
            root.join("package.json"),
            format!("{{\n  \"name\": \"{name}\",\n  \"private\": true\n}}\n"),
        )?;
        root.join("packages").join(name)
    } else {
        cwd.join(name)
    };
    util::create_dir_if_missing(pkg_dir.join("src"))?;

    let entry = match (target, platform) {
        (Target::Lib, _) => "lib.ts",
        (Target::Bin, Platform::Node) => "main.ts",
        (Target::Bin, Platform::Browser) | (Target::Site, _) => "index.tsx",
    };
    std::fs::write(pkg_dir.join("src").join(entry), "export {};\n")
        .context("failed to write entry source file")?;

    // Record the platform when the entry basename alone would infer the
    // wrong one.
    let inferred = match entry {
        "lib.ts" | "main.ts" => Platform::Node,
        _ => Platform::Browser,
    };
    let depot_section = if platform != inferred {
        let platform = match platform {
            Platform::Browser => "browser",
            Platform::Node => "node",
        };
        format!(",\n  \"depot\": {{ \"platform\": \"{platform}\" }}")
    } else {
        String::new()
    };
    std::fs::write(
        pkg_dir.join("package.json"),
        format!("{{\n  \"name\": \"{name}\",\n  \"version\": \"0.0.1\"{depot_section}\n}}\n"),
    )?;

    if matches!(target, Target::Site) {
        std::fs::write(
            pkg_dir.join("index.html"),
            format!(
                "<!doctype html>\n<html>\n  <body>\n    <script type=\"module\" src=\"/src/{entry}\"></script>\n  </body>\n</html>\n"
            ),
        )?;
    }

    Ok(())
}
