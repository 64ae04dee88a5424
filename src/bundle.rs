//! Bundler invocation for node-platform packages.
//!
//! Depot drives the esbuild CLI rather than linking a bundler: the flag
//! set below reproduces the build the tool needs (ESM output into `dist`,
//! workspace-external dependencies, asset loaders for url- and raw-style
//! imports), and the orchestrator brackets the run with start/finish lines
//! on the `build` pane, decorating failures with a red cross and the
//! offending `file:line:column` when one appears in the output.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use regex::Regex;

use crate::package::Package;
use crate::process::{ChunkSink, Runner};

/// Imported-as-URL assets: copied into `dist`, module resolves to the URL.
const URL_LOADER_EXTENSIONS: [&str; 7] = ["css", "scss", "png", "jpg", "jpeg", "svg", "woff2"];
/// Imported-as-text assets: inlined into the bundle.
const RAW_LOADER_EXTENSIONS: [&str; 1] = ["txt"];

const RED_CROSS: &str = "\u{1b}[31m✗\u{1b}[0m";

/// Builds the esbuild argv for one package.
pub fn esbuild_args(pkg: &Package, watch: bool, release: bool) -> Vec<String> {
    let entry = pkg
        .entry_point
        .strip_prefix(&pkg.dir)
        .unwrap_or(&pkg.entry_point);

    let mut args = vec![
        entry.display().to_string(),
        "--bundle".to_string(),
        "--format=esm".to_string(),
        "--outdir=dist".to_string(),
        "--color=true".to_string(),
    ];

    // Workspace code is bundled; everything the manifest declares is
    // resolved by the consumer instead.
    let externals = pkg
        .manifest
        .dependencies
        .keys()
        .chain(pkg.manifest.peer_dependencies.keys())
        .collect::<std::collections::BTreeSet<_>>();
    for external in externals {
        args.push(format!("--external:{external}"));
    }

    if release {
        args.push("--minify".to_string());
    } else {
        args.push("--sourcemap".to_string());
    }
    if watch {
        args.push("--watch=forever".to_string());
    }

    for ext in URL_LOADER_EXTENSIONS {
        args.push(format!("--loader:.{ext}=file"));
    }
    for ext in RAW_LOADER_EXTENSIONS {
        args.push(format!("--loader:.{ext}=text"));
    }

    args
}

/// Runs the bundler for `pkg`, streaming to `sink`.
pub async fn bundle(
    pkg: &Package,
    runner: &Runner,
    sink: ChunkSink,
    watch: bool,
    release: bool,
) -> Result<bool> {
    let args = esbuild_args(pkg, watch, release);
    sink(format!("build started: {}\n", pkg.name).as_bytes());

    // Remember the output tail so a failure can be annotated with its
    // source location.
    let tail = Arc::new(Mutex::new(String::new()));
    let scan_tail = Arc::clone(&tail);
    let inner = Arc::clone(&sink);
    let scanning: ChunkSink = Arc::new(move |chunk: &[u8]| {
        let mut tail = scan_tail.lock().expect("bundle tail poisoned");
        tail.push_str(&String::from_utf8_lossy(chunk));
        if tail.len() > 8192 {
            let mut cut = tail.len() - 4096;
            while !tail.is_char_boundary(cut) {
                cut += 1;
            }
            let keep = tail.split_off(cut);
            *tail = keep;
        }
        inner(chunk);
    });

    let ok = pkg.spawn(runner, "esbuild", &args, scanning).await?;

    if ok {
        sink(format!("build finished: {}\n", pkg.name).as_bytes());
    } else {
        let tail = tail.lock().expect("bundle tail poisoned");
        let line = match find_location(&tail) {
            Some(location) => format!("{RED_CROSS} build failed ({location})\n"),
            None => format!("{RED_CROSS} build failed\n"),
        };
        sink(line.as_bytes());
    }
    Ok(ok)
}

/// Extracts the first `file:line:column` location from bundler output.
fn find_location(output: &str) -> Option<String> {
    let pattern = Regex::new(r"([\w./@-]+\.[a-z]+):(\d+):(\d+)").expect("location regex");
    pattern
        .captures(output)
        .map(|caps| format!("{}:{}:{}", &caps[1], &caps[2], &caps[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_pkg(manifest: &str) -> (tempfile::TempDir, Package) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("package.json"), manifest).unwrap();
        std::fs::write(tmp.path().join("src/lib.ts"), "export {};\n").unwrap();
        let pkg = Package::load(tmp.path()).unwrap();
        (tmp, pkg)
    }

    #[test]
    fn args_carry_the_flag_set() {
        let (_tmp, pkg) = fixture_pkg(r#"{"name": "foo"}"#);
        let args = esbuild_args(&pkg, false, false);
        assert_eq!(args[0], "src/lib.ts");
        assert!(args.contains(&"--bundle".to_string()));
        assert!(args.contains(&"--format=esm".to_string()));
        assert!(args.contains(&"--outdir=dist".to_string()));
        assert!(args.contains(&"--sourcemap".to_string()));
        assert!(!args.iter().any(|arg| arg.starts_with("--watch")));
        assert!(args.contains(&"--loader:.scss=file".to_string()));
        assert!(args.contains(&"--loader:.txt=text".to_string()));
    }

    #[test]
    fn release_swaps_sourcemap_for_minify() {
        let (_tmp, pkg) = fixture_pkg(r#"{"name": "foo"}"#);
        let args = esbuild_args(&pkg, false, true);
        assert!(args.contains(&"--minify".to_string()));
        assert!(!args.contains(&"--sourcemap".to_string()));
    }

    #[test]
    fn watch_adds_the_watch_flag() {
        let (_tmp, pkg) = fixture_pkg(r#"{"name": "foo"}"#);
        let args = esbuild_args(&pkg, true, false);
        assert!(args.contains(&"--watch=forever".to_string()));
    }

    #[test]
    fn externals_union_dependencies_and_peers() {
        let (_tmp, pkg) = fixture_pkg(
            r#"{
                "name": "foo",
                "dependencies": {"react": "18", "zod": "3"},
                "peerDependencies": {"react": "18", "lodash": "4"},
                "devDependencies": {"vitest": "1"}
            }"#,
        );
        let args = esbuild_args(&pkg, false, false);
        let externals = args
            .iter()
            .filter_map(|arg| arg.strip_prefix("--external:"))
            .collect::<Vec<_>>();
        assert_eq!(externals, vec!["lodash", "react", "zod"]);
    }

    #[test]
    fn find_location_extracts_file_line_column() {
        let output = "\u{2718} [ERROR] Could not resolve \"./nope\"\n\n    src/lib.ts:3:17:\n";
        assert_eq!(find_location(output).as_deref(), Some("src/lib.ts:3:17"));
        assert_eq!(find_location("all good"), None);
    }
}
