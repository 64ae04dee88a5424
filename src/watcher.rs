//! Debounced file watching for tools with no watch mode of their own.
//!
//! The linter is run once per (debounced) batch of source changes; this
//! module owns the notify watcher thread and hands the async side a plain
//! tick channel.

use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{Event as NotifyEvent, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

const DEBOUNCE: Duration = Duration::from_millis(200);

/// Extensions that count as watched sources; everything else is noise.
const SOURCE_GLOBS: [&str; 3] = ["**/*.js", "**/*.ts", "**/*.tsx"];

/// Watches `dir` recursively and sends one tick per debounced batch of
/// relevant changes. The watcher thread stops when the receiver is
/// dropped.
pub fn watch_sources(dir: &Path) -> Result<mpsc::Receiver<()>> {
    let (tick_tx, tick_rx) = mpsc::channel(16);
    let dir = dir.to_path_buf();
    let matcher = SourceMatcher::new(&dir)?;

    let (raw_tx, raw_rx) = std::sync::mpsc::channel();
    let mut watcher = RecommendedWatcher::new(
        move |event| {
            let _ = raw_tx.send(event);
        },
        notify::Config::default(),
    )
    .context("failed to create file watcher")?;
    watcher
        .watch(&dir, RecursiveMode::Recursive)
        .with_context(|| format!("failed to watch {}", dir.display()))?;

    std::thread::spawn(move || {
        // Owns the watcher so it lives as long as the loop.
        let _watcher = watcher;
        loop {
            let event = match raw_rx.recv() {
                Ok(event) => event,
                Err(_) => break,
            };
            if !matcher.is_relevant(&event) {
                continue;
            }

            // Absorb the burst a single save can produce.
            let mut last = Instant::now();
            loop {
                let elapsed = last.elapsed();
                if elapsed >= DEBOUNCE {
                    break;
                }
                match raw_rx.recv_timeout(DEBOUNCE - elapsed) {
                    Ok(event) => {
                        if matcher.is_relevant(&event) {
                            last = Instant::now();
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }

            if tick_tx.blocking_send(()).is_err() {
                break;
            }
        }
    });

    Ok(tick_rx)
}

struct SourceMatcher {
    base: PathBuf,
    sources: GlobSet,
    gitignore: Gitignore,
}

impl SourceMatcher {
    fn new(base: &Path) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for glob in SOURCE_GLOBS {
            builder.add(Glob::new(glob)?);
        }
        let sources = builder.build()?;

        let mut gitignore = GitignoreBuilder::new(base);
        for ancestor in base.ancestors() {
            let candidate = ancestor.join(".gitignore");
            if candidate.exists() {
                gitignore.add(candidate);
            }
        }
        let gitignore = match gitignore.build() {
            Ok(gitignore) => gitignore,
            Err(err) => {
                warn!("ignoring unreadable gitignore rules: {err}");
                Gitignore::empty()
            }
        };

        Ok(SourceMatcher {
            base: base.to_path_buf(),
            sources,
            gitignore,
        })
    }

    fn is_relevant(&self, event: &notify::Result<NotifyEvent>) -> bool {
        let Ok(event) = event else {
            return false;
        };
        event.paths.iter().any(|path| {
            let rel = path.strip_prefix(&self.base).unwrap_or(path);
            self.sources.is_match(rel) && !self.gitignore.matched(path, false).is_ignore()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_for(path: PathBuf) -> notify::Result<NotifyEvent> {
        let mut event = NotifyEvent::new(notify::EventKind::Modify(
            notify::event::ModifyKind::Any,
        ));
        event = event.add_path(path);
        Ok(event)
    }

    #[test]
    fn matcher_accepts_sources_and_rejects_noise() {
        let tmp = tempfile::tempdir().unwrap();
        let matcher = SourceMatcher::new(tmp.path()).unwrap();

        assert!(matcher.is_relevant(&event_for(tmp.path().join("src/lib.ts"))));
        assert!(matcher.is_relevant(&event_for(tmp.path().join("src/deep/view.tsx"))));
        assert!(!matcher.is_relevant(&event_for(tmp.path().join("dist/lib.js.map"))));
        assert!(!matcher.is_relevant(&event_for(tmp.path().join("notes.md"))));
    }

    #[test]
    fn matcher_respects_gitignore() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(".gitignore"), "generated.ts\n").unwrap();
        let matcher = SourceMatcher::new(tmp.path()).unwrap();

        assert!(!matcher.is_relevant(&event_for(tmp.path().join("generated.ts"))));
        assert!(matcher.is_relevant(&event_for(tmp.path().join("src/lib.ts"))));
    }

    #[tokio::test]
    async fn ticks_arrive_on_change() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        let mut ticks = watch_sources(tmp.path()).unwrap();

        // Give the watcher a moment to arm before writing.
        tokio::time::sleep(Duration::from_millis(250)).await;
        std::fs::write(tmp.path().join("src/lib.ts"), "export {};\n").unwrap();

        let tick = tokio::time::timeout(Duration::from_secs(5), ticks.recv()).await;
        assert!(matches!(tick, Ok(Some(()))));
    }
}
