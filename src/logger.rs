//! The two-variant logging sink consumed by the build orchestrator.
//!
//! Once mode collects every pane's output and dumps it after the run so
//! concurrent tools don't interleave on stdout. Watch mode forwards
//! fragments to the live pane UI in `ui`. The variant is fixed at
//! construction; producers only see the common `register`/`log`/`end`
//! surface.

use std::io::IsTerminal;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::debug;

use crate::process::{ChunkSink, KillSet};
use crate::ui;

/// The fixed pane set every package build emits to.
pub const BUILD_PANES: [&str; 4] = ["build", "check", "lint", "script"];

/// Messages from producers to the watch-mode render thread.
#[derive(Debug)]
pub enum UiMsg {
    Chunk {
        pkg: String,
        pane: String,
        data: Vec<u8>,
    },
    Shutdown,
}

pub enum Logger {
    Once(OnceLogger),
    Watch(WatchLogger),
}

impl Logger {
    pub fn once() -> Self {
        Logger::Once(OnceLogger::default())
    }

    /// A watch logger bound to `packages`, with `visible` shown first.
    pub fn watch(packages: Vec<String>, visible: usize, kills: KillSet) -> Self {
        Logger::Watch(WatchLogger::new(packages, visible, kills))
    }

    /// Once mode: a no-op. Watch mode: takes over the terminal.
    pub fn start(&self) -> Result<()> {
        match self {
            Logger::Once(_) => Ok(()),
            Logger::Watch(watch) => watch.start(),
        }
    }

    /// Declares a pane before any producer may write to it.
    pub fn register(&self, pkg: &str, pane: &str) {
        match self {
            Logger::Once(once) => once.register(pkg, pane),
            // Watch panes are preallocated per package; nothing to do.
            Logger::Watch(_) => {}
        }
    }

    /// Appends a fragment to a pane. Logging to a pane that was never
    /// registered is a producer bug and panics rather than losing output.
    pub fn log(&self, pkg: &str, pane: &str, chunk: &[u8]) {
        match self {
            Logger::Once(once) => once.log(pkg, pane, chunk),
            Logger::Watch(watch) => watch.log(pkg, pane, chunk),
        }
    }

    /// Once mode: dump the collected panes. Watch mode: tear the UI down.
    pub fn end(&self) -> Result<()> {
        match self {
            Logger::Once(once) => once.dump(),
            Logger::Watch(watch) => watch.end(),
        }
    }
}

/// A sink that forwards chunks to one pane of `logger`.
pub fn pane_sink(logger: &Arc<Logger>, pkg: &str, pane: &str) -> ChunkSink {
    let logger = Arc::clone(logger);
    let pkg = pkg.to_string();
    let pane = pane.to_string();
    Arc::new(move |chunk: &[u8]| logger.log(&pkg, &pane, chunk))
}

#[derive(Default)]
struct OncePane {
    pkg: String,
    pane: String,
    data: Vec<u8>,
}

/// Collect-and-dump sink: appends are mutex-serialized, panes dump in
/// registration order.
#[derive(Default)]
pub struct OnceLogger {
    panes: Mutex<Vec<OncePane>>,
}

impl OnceLogger {
    fn register(&self, pkg: &str, pane: &str) {
        let mut panes = self.panes.lock().expect("pane list poisoned");
        if !panes.iter().any(|p| p.pkg == pkg && p.pane == pane) {
            panes.push(OncePane {
                pkg: pkg.to_string(),
                pane: pane.to_string(),
                data: Vec::new(),
            });
        }
    }

    fn log(&self, pkg: &str, pane: &str, chunk: &[u8]) {
        let mut panes = self.panes.lock().expect("pane list poisoned");
        let entry = panes
            .iter_mut()
            .find(|p| p.pkg == pkg && p.pane == pane)
            .unwrap_or_else(|| panic!("log to unregistered pane {pkg}/{pane}"));
        entry.data.extend_from_slice(chunk);
    }

    fn dump(&self) -> Result<()> {
        use std::io::Write;

        let panes = self.panes.lock().expect("pane list poisoned");
        let color = std::io::stdout().is_terminal();
        let mut out = std::io::stdout().lock();
        for pane in panes.iter() {
            if pane.data.is_empty() {
                continue;
            }
            let title = format!("{} · {}", pane.pkg, pane.pane);
            if color {
                writeln!(out, "\u{1b}[1m{title}\u{1b}[0m")?;
                out.write_all(&pane.data)?;
            } else {
                writeln!(out, "{title}")?;
                out.write_all(&strip_ansi_escapes::strip(&pane.data))?;
            }
            if !pane.data.ends_with(b"\n") {
                writeln!(out)?;
            }
            writeln!(out, "{}", "·".repeat(60))?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Handle to the live pane UI; producers enqueue fragments, the render
/// thread owns the terminal and all widget state.
pub struct WatchLogger {
    tx: mpsc::UnboundedSender<UiMsg>,
    packages: Vec<String>,
    visible: usize,
    kills: KillSet,
    rx: Mutex<Option<mpsc::UnboundedReceiver<UiMsg>>>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl WatchLogger {
    fn new(packages: Vec<String>, visible: usize, kills: KillSet) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        WatchLogger {
            tx,
            packages,
            visible,
            kills,
            rx: Mutex::new(Some(rx)),
            thread: Mutex::new(None),
        }
    }

    fn start(&self) -> Result<()> {
        let rx = self
            .rx
            .lock()
            .expect("receiver poisoned")
            .take()
            .expect("watch logger started twice");
        let packages = self.packages.clone();
        let visible = self.visible;
        let kills = self.kills.clone();
        let handle = std::thread::spawn(move || {
            if let Err(err) = ui::run(rx, packages, visible, kills) {
                eprintln!("watch ui failed: {err}");
                std::process::exit(1);
            }
        });
        *self.thread.lock().expect("thread handle poisoned") = Some(handle);
        Ok(())
    }

    fn log(&self, pkg: &str, pane: &str, chunk: &[u8]) {
        debug_assert!(
            self.packages.iter().any(|p| p == pkg),
            "log to unknown package {pkg}"
        );
        let _ = self.tx.send(UiMsg::Chunk {
            pkg: pkg.to_string(),
            pane: pane.to_string(),
            data: chunk.to_vec(),
        });
    }

    fn end(&self) -> Result<()> {
        debug!("shutting down watch ui");
        let _ = self.tx.send(UiMsg::Shutdown);
        if let Some(handle) = self.thread.lock().expect("thread handle poisoned").take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_logger_keeps_insertion_order_per_pane() {
        let once = OnceLogger::default();
        once.register("foo", "check");
        once.register("foo", "build");
        once.log("foo", "check", b"first ");
        once.log("foo", "build", b"interleaved ");
        once.log("foo", "check", b"second");

        let panes = once.panes.lock().unwrap();
        assert_eq!(panes[0].pane, "check");
        assert_eq!(panes[0].data, b"first second");
        assert_eq!(panes[1].data, b"interleaved ");
    }

    #[test]
    fn once_logger_register_is_idempotent() {
        let once = OnceLogger::default();
        once.register("foo", "check");
        once.register("foo", "check");
        assert_eq!(once.panes.lock().unwrap().len(), 1);
    }

    #[test]
    #[should_panic(expected = "unregistered pane")]
    fn once_logger_panics_on_unregistered_pane() {
        let once = OnceLogger::default();
        once.log("foo", "build", b"oops");
    }
}
