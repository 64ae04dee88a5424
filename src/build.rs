//! The build orchestrator: one package, five subordinate processes.
//!
//! `build` fans out the type checker, the bundler, the linter, the
//! package's own build script, and (for watched sites) a static server,
//! then folds their results into a single success bit. Every pane is
//! registered before the first child spawns so once-mode logging never
//! sees an unknown pane.

use anyhow::Result;
use tracing::{debug, warn};

use crate::bundle;
use crate::command::Context;
use crate::logger::{self, BUILD_PANES};
use crate::package::{Package, Platform, Target};
use crate::serve;
use crate::util;
use crate::watcher;

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildCommand {
    pub watch: bool,
    pub release: bool,
}

impl BuildCommand {
    /// Under watch every package starts at once so the pane UI is live;
    /// otherwise the scheduler runs dependency waves.
    pub fn parallel(&self) -> bool {
        self.watch
    }

    pub async fn run_pkg(&self, pkg: &Package, cx: &Context) -> Result<bool> {
        util::create_dir_if_missing(pkg.path("dist"))?;
        let pkg_name = pkg.name.to_string();
        for pane in BUILD_PANES {
            cx.logger.register(&pkg_name, pane);
        }

        if self.serves(pkg) {
            serve::spawn(pkg.path("dist"));
        }

        let (check, compile, lint, script) = tokio::join!(
            self.check(pkg, cx),
            self.compile(pkg, cx),
            self.lint(pkg, cx),
            self.script(pkg, cx),
        );

        // Lint output is shown but does not gate the build.
        match lint {
            Ok(clean) => debug!(pkg = %pkg.name, clean, "lint finished"),
            Err(err) => warn!(pkg = %pkg.name, "lint did not run: {err:#}"),
        }

        Ok(check? && compile? && script?)
    }

    fn serves(&self, pkg: &Package) -> bool {
        self.watch && pkg.platform.is_browser() && pkg.target == Target::Bin
    }

    async fn check(&self, pkg: &Package, cx: &Context) -> Result<bool> {
        let mut args = vec!["--emitDeclarationOnly".to_string(), "--pretty".to_string()];
        if self.watch {
            args.push("-w".to_string());
        }
        let sink = logger::pane_sink(&cx.logger, &pkg.name.to_string(), "check");
        pkg.spawn(&cx.runner, "tsc", &args, sink).await
    }

    async fn compile(&self, pkg: &Package, cx: &Context) -> Result<bool> {
        let sink = logger::pane_sink(&cx.logger, &pkg.name.to_string(), "build");
        match pkg.platform {
            Platform::Node => {
                bundle::bundle(pkg, &cx.runner, sink, self.watch, self.release).await
            }
            Platform::Browser => {
                let mut args = vec!["build".to_string(), "--minify=false".to_string()];
                if self.watch {
                    args.push("-w".to_string());
                }
                pkg.spawn(&cx.runner, "vite", &args, sink).await
            }
        }
    }

    async fn lint(&self, pkg: &Package, cx: &Context) -> Result<bool> {
        let args = vec![
            "--ext".to_string(),
            ".js,.ts,.tsx".to_string(),
            "src".to_string(),
        ];
        let sink = logger::pane_sink(&cx.logger, &pkg.name.to_string(), "lint");

        if !self.watch {
            return pkg.spawn(&cx.runner, "eslint", &args, sink).await;
        }

        // eslint has no watch mode; rerun it per debounced source change.
        let mut ticks = watcher::watch_sources(&pkg.path("src"))?;
        let mut clean = pkg
            .spawn(&cx.runner, "eslint", &args, sink.clone())
            .await?;
        while ticks.recv().await.is_some() {
            sink(b"\n");
            clean = pkg
                .spawn(&cx.runner, "eslint", &args, sink.clone())
                .await?;
        }
        Ok(clean)
    }

    async fn script(&self, pkg: &Package, cx: &Context) -> Result<bool> {
        if !pkg.path("build.mjs").exists() {
            return Ok(true);
        }
        let mut args = vec!["build.mjs".to_string()];
        if self.watch {
            args.push("-w".to_string());
        }
        if self.release {
            args.push("--release".to_string());
        }
        let sink = logger::pane_sink(&cx.logger, &pkg.name.to_string(), "script");
        pkg.spawn(&cx.runner, "node", &args, sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::GlobalConfig;
    use crate::logger::Logger;
    use crate::process::{KillSet, Runner};
    use std::path::Path;
    use std::sync::Arc;

    fn fixture_pkg(dir: &Path, manifest: &str, entry: &str) -> Package {
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(dir.join("package.json"), manifest).unwrap();
        std::fs::write(dir.join("src").join(entry), "export {};\n").unwrap();
        Package::load(dir).unwrap()
    }

    fn test_context(tmp: &Path) -> Context {
        let config = GlobalConfig::at(tmp.join("home"));
        Context {
            runner: Runner::new(&tmp.join("ws"), &config, KillSet::new()),
            logger: Arc::new(Logger::once()),
        }
    }

    #[test]
    fn serve_requires_watched_browser_bin() {
        let tmp = tempfile::tempdir().unwrap();
        let site = fixture_pkg(&tmp.path().join("site"), r#"{"name": "site"}"#, "index.tsx");
        let lib = fixture_pkg(&tmp.path().join("lib"), r#"{"name": "lib"}"#, "lib.ts");

        let watch = BuildCommand {
            watch: true,
            release: false,
        };
        let once = BuildCommand::default();
        assert!(watch.serves(&site));
        assert!(!once.serves(&site));
        assert!(!watch.serves(&lib));
    }

    #[test]
    fn watch_mode_is_parallel() {
        assert!(BuildCommand {
            watch: true,
            release: false
        }
        .parallel());
        assert!(!BuildCommand::default().parallel());
    }

    #[tokio::test]
    async fn build_prepares_dist_before_spawning() {
        let tmp = tempfile::tempdir().unwrap();
        let pkg = fixture_pkg(&tmp.path().join("foo"), r#"{"name": "foo"}"#, "lib.ts");
        let cx = test_context(tmp.path());

        // The fixture has no toolchain set up, so the build itself cannot
        // succeed; the scaffolding must still be in place.
        let result = BuildCommand::default().run_pkg(&pkg, &cx).await;
        assert!(!result.unwrap_or(false));
        assert!(pkg.path("dist").is_dir());
    }
}
