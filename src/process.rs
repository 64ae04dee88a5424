//! Child process execution under a pseudo-terminal.
//!
//! Every external tool runs under a pty so that it detects a TTY and emits
//! its usual interactive output (colors, erase-line progress meters). A
//! dedicated OS thread drains each pty and forwards raw byte chunks to the
//! consumer; chunk boundaries are preserved because watch-mode consumers
//! depend on carriage-return and erase-line codes to redraw.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::assets::GlobalConfig;

/// Consumer of raw output chunks from one child process.
pub type ChunkSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Writes chunks straight to this process's stdout.
pub fn stdout_sink() -> ChunkSink {
    Arc::new(|chunk: &[u8]| {
        use std::io::Write;
        let mut out = std::io::stdout();
        let _ = out.write_all(chunk);
        let _ = out.flush();
    })
}

/// Kill hooks for every live child. Cancellation (SIGINT/SIGTERM or the
/// watch UI's exit keys) drains the set so no child outlives depot.
#[derive(Clone, Default)]
pub struct KillSet {
    killers: Arc<Mutex<Vec<(Option<u32>, Box<dyn ChildKiller + Send + Sync>)>>>,
}

impl KillSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, pid: Option<u32>, killer: Box<dyn ChildKiller + Send + Sync>) {
        self.killers
            .lock()
            .expect("kill set poisoned")
            .push((pid, killer));
    }

    /// Terminates every registered child. Children that already exited are
    /// skipped by virtue of the kill failing quietly.
    pub fn kill_all(&self) {
        let mut killers = self.killers.lock().expect("kill set poisoned");
        for (pid, killer) in killers.iter_mut() {
            if let Some(pid) = *pid {
                terminate_group(pid);
            }
            let _ = killer.kill();
        }
        killers.clear();
    }
}

#[cfg(unix)]
fn terminate_group(pid: u32) {
    // The pty child is a session leader; signal the group first so tools
    // that spawn their own helpers (pnpm, vite) take them along.
    unsafe {
        let pid = pid as i32;
        let _ = libc::kill(-pid, libc::SIGTERM);
        let _ = libc::kill(pid, libc::SIGTERM);
    }
}

#[cfg(windows)]
fn terminate_group(pid: u32) {
    use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
    unsafe {
        let _ = GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid);
    }
}

/// Installs process-wide SIGINT/SIGTERM handling: kill every child, then
/// exit 130 by convention.
pub fn spawn_signal_handler(kills: KillSet) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    warn!("could not install SIGTERM handler: {err}");
                    let _ = tokio::signal::ctrl_c().await;
                    kills.kill_all();
                    std::process::exit(130);
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        kills.kill_all();
        std::process::exit(130);
    });
}

/// Spawns the external tools depot orchestrates.
pub struct Runner {
    bin_dirs: Vec<PathBuf>,
    node_path: PathBuf,
    home_root: PathBuf,
    kills: KillSet,
}

impl Runner {
    pub fn new(ws_root: &Path, config: &GlobalConfig, kills: KillSet) -> Self {
        Runner {
            bin_dirs: vec![
                ws_root.join("node_modules").join(".bin"),
                config.bindir(),
            ],
            node_path: config.node_path(),
            home_root: config.root().to_path_buf(),
            kills,
        }
    }

    /// Runs `script` with `args` in `cwd`, streaming output chunks to
    /// `sink`. Resolves with `Ok(true)` iff the child exits 0; failing to
    /// spawn at all is an `Err` carrying a diagnostic.
    pub async fn run(
        &self,
        script: &str,
        args: &[String],
        cwd: &Path,
        sink: ChunkSink,
    ) -> Result<bool> {
        let program = self.resolve(script)?;
        debug!(script, program = %program.display(), "spawning");

        let pty = native_pty_system()
            .openpty(PtySize {
                rows: 40,
                cols: 120,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| anyhow!("failed to allocate a pty: {err}"))?;

        let mut cmd = CommandBuilder::new(&program);
        cmd.args(args);
        cmd.cwd(cwd);
        cmd.env("NODE_PATH", &self.node_path);

        let mut child = pty.slave.spawn_command(cmd).map_err(|err| {
            anyhow!(
                "failed to spawn `{}`: {err} (depot home: {})",
                program.display(),
                self.home_root.display()
            )
        })?;
        // Closing our slave handle lets the master read EOF once the child
        // exits.
        drop(pty.slave);

        self.kills.register(child.process_id(), child.clone_killer());

        let mut reader = pty
            .master
            .try_clone_reader()
            .map_err(|err| anyhow!("failed to open pty reader: {err}"))?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        std::thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let script_name = script.to_string();
        let wait = tokio::task::spawn_blocking(move || child.wait());

        while let Some(chunk) = rx.recv().await {
            sink(&chunk);
        }

        let status = wait
            .await
            .context("wait task panicked")?
            .with_context(|| format!("failed waiting on `{script_name}`"))?;
        drop(pty.master);

        Ok(status.success())
    }

    // Resolution order: workspace bindir, depot home bindir, then PATH.
    fn resolve(&self, script: &str) -> Result<PathBuf> {
        for dir in &self.bin_dirs {
            let candidate = dir.join(script);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        if let Some(path) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&path) {
                let candidate = dir.join(script);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
        let searched = self
            .bin_dirs
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(anyhow!(
            "executable `{script}` not found (searched {searched} and PATH; depot home: {})",
            self.home_root.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn test_runner(tmp: &Path) -> Runner {
        let config = GlobalConfig::at(tmp.join("home"));
        Runner::new(&tmp.join("ws"), &config, KillSet::new())
    }

    #[tokio::test]
    async fn echo_succeeds_and_streams_output() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = test_runner(tmp.path());

        let collected = Arc::new(StdMutex::new(Vec::<u8>::new()));
        let sink_data = collected.clone();
        let sink: ChunkSink = Arc::new(move |chunk: &[u8]| {
            sink_data.lock().unwrap().extend_from_slice(chunk);
        });

        let ok = runner
            .run("echo", &["hello".to_string()], tmp.path(), sink)
            .await
            .unwrap();
        assert!(ok);
        let output = String::from_utf8_lossy(&collected.lock().unwrap()).into_owned();
        assert!(output.contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_maps_to_false() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = test_runner(tmp.path());
        let ok = runner
            .run("false", &[], tmp.path(), Arc::new(|_: &[u8]| {}))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn missing_binary_reports_home() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = test_runner(tmp.path());
        let err = runner
            .run("definitely-not-a-real-tool", &[], tmp.path(), Arc::new(|_: &[u8]| {}))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("definitely-not-a-real-tool"));
        assert!(msg.contains("home"));
    }

    #[test]
    fn workspace_bindir_takes_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        let bindir = tmp.path().join("ws").join("node_modules").join(".bin");
        std::fs::create_dir_all(&bindir).unwrap();
        std::fs::write(bindir.join("tsc"), "#!/bin/sh\n").unwrap();

        let runner = test_runner(tmp.path());
        let resolved = runner.resolve("tsc").unwrap();
        assert_eq!(resolved, bindir.join("tsc"));
    }
}
