//! Package model: manifest parsing and (platform, target) classification.
//!
//! A `Package` is an immutable record built once at workspace load. It knows
//! where it lives, what its manifest declares, and which source file is its
//! entry point. All process spawning goes through the shared [`Runner`] so
//! the package itself performs no I/O after construction.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, ensure, Context, Error, Result};
use serde::Deserialize;

use crate::process::{ChunkSink, Runner};

/// Execution environment of a package's compiled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Browser,
    Node,
}

impl Platform {
    pub fn is_browser(self) -> bool {
        matches!(self, Platform::Browser)
    }
}

/// Shape of a package's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Consumed by other packages.
    Lib,
    /// An executable program or site entry.
    Bin,
    /// A web site (implies the browser platform).
    Site,
}

/// An npm-style package name, optionally scoped (`@scope/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageName {
    pub name: String,
    pub scope: Option<String>,
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "@{}/{}", scope, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for PackageName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.strip_prefix('@') {
            Some(rest) => {
                let parts = rest.split('/').collect::<Vec<_>>();
                ensure!(parts.len() == 2, "invalid package name: {s}");
                Ok(PackageName {
                    scope: Some(parts[0].to_string()),
                    name: parts[1].to_string(),
                })
            }
            None => Ok(PackageName {
                name: s.to_string(),
                scope: None,
            }),
        }
    }
}

/// The `depot` section of a manifest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DepotSection {
    /// Overrides the platform inferred from the entry point.
    pub platform: Option<Platform>,
}

/// Parsed `package.json`. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "peerDependencies")]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub depot: Option<DepotSection>,
}

impl Manifest {
    /// Loads `<dir>/package.json`, reporting parse errors with the package
    /// directory and the underlying message indented below it.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("package.json");
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("package has no manifest at {}", path.display()))?;
        serde_json::from_str(&raw)
            .map_err(|err| anyhow!("could not parse manifest in {}:\n  {err}", dir.display()))
    }

    /// Names appearing in any dependency table, parsed as package names.
    pub fn all_dependencies(&self) -> impl Iterator<Item = PackageName> + '_ {
        [
            &self.dependencies,
            &self.dev_dependencies,
            &self.peer_dependencies,
        ]
        .into_iter()
        .flat_map(|deps| deps.keys())
        .filter_map(|s| PackageName::from_str(s).ok())
    }
}

const ENTRY_BASENAMES: [(&str, Platform, Target); 3] = [
    ("lib", Platform::Node, Target::Lib),
    ("main", Platform::Node, Target::Bin),
    ("index", Platform::Browser, Target::Bin),
];

const ENTRY_EXTENSIONS: [&str; 3] = ["tsx", "ts", "js"];

/// An immutable workspace package.
#[derive(Debug, Clone)]
pub struct Package {
    pub dir: PathBuf,
    pub manifest: Manifest,
    pub name: PackageName,
    pub platform: Platform,
    pub target: Target,
    pub entry_point: PathBuf,
}

impl Package {
    /// Loads the package rooted at `dir`. Fails when the manifest is missing
    /// or unparseable, or when no entry source file can be discovered.
    pub fn load(dir: &Path) -> Result<Self> {
        let dir = dir
            .canonicalize()
            .with_context(|| format!("package directory does not exist: {}", dir.display()))?;
        let manifest = Manifest::load(&dir)?;

        let (entry_point, platform, target) = Self::discover_entry(&dir)?;
        let platform = manifest
            .depot
            .as_ref()
            .and_then(|section| section.platform)
            .unwrap_or(platform);

        let name_str = match &manifest.name {
            Some(name) => name.clone(),
            None => dir
                .file_name()
                .and_then(|s| s.to_str())
                .map(String::from)
                .with_context(|| format!("cannot derive a name for {}", dir.display()))?,
        };
        let name = PackageName::from_str(&name_str)?;

        Ok(Package {
            dir,
            manifest,
            name,
            platform,
            target,
            entry_point,
        })
    }

    // Basenames take precedence over extensions: src/lib.js wins over
    // src/main.tsx.
    fn discover_entry(dir: &Path) -> Result<(PathBuf, Platform, Target)> {
        for (base, platform, target) in ENTRY_BASENAMES {
            for ext in ENTRY_EXTENSIONS {
                let candidate = dir.join("src").join(format!("{base}.{ext}"));
                if candidate.exists() {
                    return Ok((candidate, platform, target));
                }
            }
        }
        bail!(
            "could not find an entry point (src/{{lib,main,index}}.{{tsx,ts,js}}) in {}",
            dir.display()
        )
    }

    /// Resolves a path relative to the package directory.
    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.dir.join(rel)
    }

    /// Runs `script` with the package directory as working directory.
    pub async fn spawn(
        &self,
        runner: &Runner,
        script: &str,
        args: &[String],
        sink: ChunkSink,
    ) -> Result<bool> {
        runner.run(script, args, &self.dir, sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pkg(dir: &Path, manifest: &str, entry: &str) {
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(dir.join("package.json"), manifest).unwrap();
        std::fs::write(dir.join("src").join(entry), "export {};\n").unwrap();
    }

    #[test]
    fn package_name_parses_scopes() {
        let plain = PackageName::from_str("foo").unwrap();
        assert_eq!(plain.name, "foo");
        assert_eq!(plain.scope, None);

        let scoped = PackageName::from_str("@acme/foo").unwrap();
        assert_eq!(scoped.scope.as_deref(), Some("acme"));
        assert_eq!(scoped.to_string(), "@acme/foo");

        assert!(PackageName::from_str("@too/many/parts").is_err());
    }

    #[test]
    fn entry_discovery_classifies_by_basename() {
        let tmp = tempfile::tempdir().unwrap();
        write_pkg(tmp.path(), r#"{"name": "foo"}"#, "lib.ts");
        let pkg = Package::load(tmp.path()).unwrap();
        assert_eq!(pkg.platform, Platform::Node);
        assert_eq!(pkg.target, Target::Lib);
        assert!(pkg.entry_point.ends_with("src/lib.ts"));
    }

    #[test]
    fn entry_discovery_prefers_basename_over_extension() {
        let tmp = tempfile::tempdir().unwrap();
        write_pkg(tmp.path(), r#"{"name": "foo"}"#, "lib.js");
        std::fs::write(tmp.path().join("src").join("main.tsx"), "").unwrap();
        let pkg = Package::load(tmp.path()).unwrap();
        assert_eq!(pkg.target, Target::Lib);
        assert!(pkg.entry_point.ends_with("src/lib.js"));
    }

    #[test]
    fn index_entry_is_a_browser_bin() {
        let tmp = tempfile::tempdir().unwrap();
        write_pkg(tmp.path(), r#"{"name": "site"}"#, "index.tsx");
        let pkg = Package::load(tmp.path()).unwrap();
        assert_eq!(pkg.platform, Platform::Browser);
        assert_eq!(pkg.target, Target::Bin);
    }

    #[test]
    fn manifest_platform_overrides_inference() {
        let tmp = tempfile::tempdir().unwrap();
        write_pkg(
            tmp.path(),
            r#"{"name": "cli", "depot": {"platform": "node"}}"#,
            "index.ts",
        );
        let pkg = Package::load(tmp.path()).unwrap();
        assert_eq!(pkg.platform, Platform::Node);
    }

    #[test]
    fn missing_entry_fails_at_load() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("package.json"), r#"{"name": "foo"}"#).unwrap();
        let err = Package::load(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("entry point"));
    }

    #[test]
    fn name_falls_back_to_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("fallback");
        write_pkg(&dir, "{}", "lib.ts");
        let pkg = Package::load(&dir).unwrap();
        assert_eq!(pkg.name.to_string(), "fallback");
    }

    #[test]
    fn bad_manifest_reports_directory() {
        let tmp = tempfile::tempdir().unwrap();
        write_pkg(tmp.path(), "{ not json", "lib.ts");
        let err = Package::load(tmp.path()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("could not parse manifest"));
        assert!(msg.contains("\n  "));
    }

    #[test]
    fn all_dependencies_unions_tables() {
        let manifest: Manifest = serde_json::from_str(
            r#"{
                "dependencies": {"a": "1"},
                "devDependencies": {"b": "1"},
                "peerDependencies": {"c": "1"}
            }"#,
        )
        .unwrap();
        let names = manifest
            .all_dependencies()
            .map(|n| n.to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
