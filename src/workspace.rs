//! Workspace discovery and the intra-workspace dependency graph.
//!
//! A workspace is either a single package (manifest at the root) or a
//! monorepo (`<root>/packages/*`). The dependency graph maps each package
//! name to the transitively closed set of workspace-local packages it
//! depends on; commands use it both to select the packages affected by
//! `-p` and to order dependency waves.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::task::JoinSet;
use tracing::debug;

use crate::package::Package;
use crate::util;

/// Name-keyed adjacency sets, transitively closed.
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DepGraph {
    /// Builds the graph from direct manifest dependencies restricted to the
    /// workspace, then closes it with a fixed-point pass. Fails if any
    /// package ends up depending on itself.
    pub fn build(packages: &[Package]) -> Result<Self> {
        let names = packages
            .iter()
            .map(|pkg| pkg.name.to_string())
            .collect::<BTreeSet<_>>();

        let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for pkg in packages {
            let deps = pkg
                .manifest
                .all_dependencies()
                .map(|dep| dep.to_string())
                .filter(|dep| names.contains(dep))
                .collect::<BTreeSet<_>>();
            edges.insert(pkg.name.to_string(), deps);
        }

        // Union each node with its dependencies' sets until nothing grows.
        loop {
            let mut grew = false;
            for name in &names {
                let current = edges[name].clone();
                let mut merged = current.clone();
                for dep in &current {
                    merged.extend(edges[dep].iter().cloned());
                }
                if merged.len() > current.len() {
                    edges.insert(name.clone(), merged);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        for (name, deps) in &edges {
            if deps.contains(name) {
                bail!("dependency cycle detected involving package {name}");
            }
        }

        Ok(DepGraph { edges })
    }

    /// The transitively closed dependency set of `name`.
    pub fn deps_of(&self, name: &str) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.edges.get(name).unwrap_or(&EMPTY)
    }
}

#[derive(Debug)]
pub struct Workspace {
    pub root: PathBuf,
    pub monorepo: bool,
    /// Name-sorted for deterministic traversal.
    pub packages: Vec<Package>,
    pub dep_graph: DepGraph,
    pkg_index: BTreeMap<String, usize>,
}

/// Finds the workspace root: the shallowest directory between `bound` and
/// `cwd` that holds a `package.json`.
fn find_root(bound: &Path, cwd: &Path) -> Result<PathBuf> {
    let rel = cwd.strip_prefix(bound).unwrap_or(Path::new(""));
    let components = rel.iter().collect::<Vec<_>>();
    (0..=components.len())
        .map(|i| {
            let mut path = bound.to_path_buf();
            path.extend(&components[..i]);
            path
        })
        .find(|path| path.join("package.json").exists())
        .with_context(|| format!("no workspace found in or above {}", cwd.display()))
}

impl Workspace {
    /// Discovers and loads the workspace containing `cwd` (defaults to the
    /// current directory). Package manifests load concurrently.
    pub async fn load(cwd: Option<PathBuf>) -> Result<Self> {
        let cwd = match cwd {
            Some(cwd) => cwd,
            None => std::env::current_dir()?,
        };
        let cwd = cwd
            .canonicalize()
            .with_context(|| format!("working directory is gone: {}", cwd.display()))?;

        let git_root = util::git_root(&cwd).await;
        let bound = match &git_root {
            Some(root) => root.as_path(),
            None => cwd
                .ancestors()
                .last()
                .expect("path has at least one component"),
        };
        let root = find_root(bound, &cwd)?;
        debug!(root = %root.display(), "workspace root");

        let pkg_dir = root.join("packages");
        let monorepo = pkg_dir.is_dir();
        let pkg_roots = if monorepo {
            let mut dirs = pkg_dir
                .read_dir()
                .with_context(|| format!("cannot list {}", pkg_dir.display()))?
                .filter_map(|entry| {
                    let path = entry.ok()?.path();
                    path.is_dir().then_some(path)
                })
                .collect::<Vec<_>>();
            dirs.sort();
            dirs
        } else {
            vec![root.clone()]
        };

        let mut loads = JoinSet::new();
        for pkg_root in pkg_roots {
            loads.spawn_blocking(move || Package::load(&pkg_root));
        }
        let mut packages = Vec::new();
        while let Some(loaded) = loads.join_next().await {
            packages.push(loaded.context("package load task panicked")??);
        }
        packages.sort_by(|a, b| a.name.cmp(&b.name));

        let mut pkg_index = BTreeMap::new();
        for (index, pkg) in packages.iter().enumerate() {
            if pkg_index.insert(pkg.name.to_string(), index).is_some() {
                bail!("duplicate package name in workspace: {}", pkg.name);
            }
        }

        let dep_graph = DepGraph::build(&packages)?;

        Ok(Workspace {
            root,
            monorepo,
            packages,
            dep_graph,
            pkg_index,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.pkg_index.get(name).map(|&index| &self.packages[index])
    }

    /// Packages reachable from `roots` through the dependency graph, in
    /// workspace order. An empty `roots` selects every package.
    pub fn dependency_closure(&self, roots: &[String]) -> Result<Vec<&Package>> {
        if roots.is_empty() {
            return Ok(self.packages.iter().collect());
        }
        let mut selected = BTreeSet::new();
        for root in roots {
            if !self.pkg_index.contains_key(root) {
                bail!("unknown package: {root}");
            }
            selected.insert(root.clone());
            selected.extend(self.dep_graph.deps_of(root).iter().cloned());
        }
        Ok(self
            .packages
            .iter()
            .filter(|pkg| selected.contains(&pkg.name.to_string()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pkg(root: &Path, name: &str, deps: &[&str]) {
        let dir = root.join("packages").join(name);
        std::fs::create_dir_all(dir.join("src")).unwrap();
        let deps = deps
            .iter()
            .map(|dep| format!(r#""{dep}": "0.0.1""#))
            .collect::<Vec<_>>()
            .join(", ");
        std::fs::write(
            dir.join("package.json"),
            format!(r#"{{"name": "{name}", "dependencies": {{{deps}}}}}"#),
        )
        .unwrap();
        std::fs::write(dir.join("src").join("lib.ts"), "export {};\n").unwrap();
    }

    fn monorepo(pkgs: &[(&str, &[&str])]) -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("package.json"), r#"{"name": "root"}"#).unwrap();
        for (name, deps) in pkgs {
            write_pkg(tmp.path(), name, deps);
        }
        tmp
    }

    #[tokio::test]
    async fn graph_is_transitively_closed() {
        let tmp = monorepo(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        let ws = Workspace::load(Some(tmp.path().to_path_buf())).await.unwrap();
        assert!(ws.monorepo);

        let a = ws.dep_graph.deps_of("a");
        assert!(a.contains("b") && a.contains("c"));
        assert!(ws.dep_graph.deps_of("c").is_empty());

        // Closure property: deps of deps are already included.
        for pkg in &ws.packages {
            let deps = ws.dep_graph.deps_of(&pkg.name.to_string());
            for dep in deps {
                assert!(ws.dep_graph.deps_of(dep).is_subset(deps));
            }
        }
    }

    #[tokio::test]
    async fn graph_ignores_external_dependencies() {
        let tmp = monorepo(&[("a", &["react", "b"]), ("b", &[])]);
        let ws = Workspace::load(Some(tmp.path().to_path_buf())).await.unwrap();
        let a = ws.dep_graph.deps_of("a");
        assert_eq!(a.iter().collect::<Vec<_>>(), vec!["b"]);
    }

    #[tokio::test]
    async fn cycles_fail_at_load() {
        let tmp = monorepo(&[("a", &["b"]), ("b", &["a"])]);
        let err = Workspace::load(Some(tmp.path().to_path_buf()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[tokio::test]
    async fn closure_selects_roots_and_deps_only() {
        let tmp = monorepo(&[("a", &["b"]), ("b", &[]), ("sibling", &[])]);
        let ws = Workspace::load(Some(tmp.path().to_path_buf())).await.unwrap();

        let closure = ws.dependency_closure(&["a".to_string()]).unwrap();
        let names = closure
            .iter()
            .map(|pkg| pkg.name.to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b"]);

        assert!(ws.dependency_closure(&["nope".to_string()]).is_err());
    }

    #[tokio::test]
    async fn single_package_workspace_is_not_monorepo() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("package.json"), r#"{"name": "solo"}"#).unwrap();
        std::fs::write(tmp.path().join("src").join("main.ts"), "").unwrap();

        let ws = Workspace::load(Some(tmp.path().to_path_buf())).await.unwrap();
        assert!(!ws.monorepo);
        assert_eq!(ws.packages.len(), 1);
        assert_eq!(ws.packages[0].name.to_string(), "solo");
    }
}
