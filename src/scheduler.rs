//! Dependency-ordered task execution across packages.
//!
//! Order-independent commands fan out over the whole closure at once;
//! everything else runs in waves where a package starts only after all of
//! its intra-workspace dependencies finished. Failures are recorded, never
//! propagated as cancellation: every started task runs to completion.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::command::{Command, Context};
use crate::workspace::Workspace;

/// Per-package state for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Queued,
    Running,
    Finished,
}

/// Runs `cmd` over the dependency closure of `roots` (all packages when
/// empty), then over the workspace when the command has a workspace half.
/// Returns the AND of every task result.
pub async fn run(
    ws: Arc<Workspace>,
    cmd: Arc<Command>,
    cx: Arc<Context>,
    roots: &[String],
) -> Result<bool> {
    let mut ok = true;

    if cmd.applies_to_packages() {
        let names = ws
            .dependency_closure(roots)?
            .into_iter()
            .map(|pkg| pkg.name.to_string())
            .collect::<Vec<_>>();
        debug!(command = cmd.name(), ?names, "selected packages");

        let spawn_task = {
            let ws = Arc::clone(&ws);
            let cmd = Arc::clone(&cmd);
            let cx = Arc::clone(&cx);
            move |name: String| {
                let ws = Arc::clone(&ws);
                let cmd = Arc::clone(&cmd);
                let cx = Arc::clone(&cx);
                async move { run_one(&ws, &cmd, &cx, &name).await }
            }
        };

        ok &= if cmd.parallel() {
            let mut tasks = JoinSet::new();
            for name in names {
                tasks.spawn(spawn_task(name));
            }
            let mut all_ok = true;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(task_ok) => all_ok &= task_ok,
                    Err(err) => {
                        warn!("task panicked: {err}");
                        all_ok = false;
                    }
                }
            }
            all_ok
        } else {
            let graph = ws.dep_graph.clone();
            run_waves(names, move |name| graph.deps_of(name).clone(), spawn_task).await
        };
    }

    if cmd.applies_to_workspace() {
        let ws_ok = match cmd.run_ws(&ws, &cx).await {
            Ok(ws_ok) => ws_ok,
            Err(err) => {
                warn!(command = cmd.name(), "workspace step failed: {err:#}");
                false
            }
        };
        ok &= ws_ok;
    }

    Ok(ok)
}

async fn run_one(ws: &Workspace, cmd: &Command, cx: &Context, name: &str) -> bool {
    let pkg = match ws.get(name) {
        Some(pkg) => pkg,
        None => return false,
    };
    match cmd.run_pkg(pkg, cx).await {
        Ok(ok) => ok,
        Err(err) => {
            warn!(package = name, "{} failed: {err:#}", cmd.name());
            false
        }
    }
}

/// The wave scheduler. Generic over the task body so the ordering
/// guarantees are testable without spawning real processes.
async fn run_waves<D, F, Fut>(names: Vec<String>, deps_of: D, run: F) -> bool
where
    D: Fn(&str) -> BTreeSet<String>,
    F: Fn(String) -> Fut,
    Fut: Future<Output = bool> + Send + 'static,
{
    let mut status = names
        .iter()
        .map(|name| (name.clone(), TaskStatus::Queued))
        .collect::<HashMap<_, _>>();
    let mut tasks: JoinSet<(String, bool)> = JoinSet::new();
    let mut all_ok = true;

    loop {
        let mut ready = Vec::new();
        for (name, state) in &status {
            if *state != TaskStatus::Queued {
                continue;
            }
            // Dependencies outside this run don't gate it.
            let gated = deps_of(name).iter().any(|dep| {
                status
                    .get(dep)
                    .is_some_and(|dep_state| *dep_state != TaskStatus::Finished)
            });
            if !gated {
                ready.push(name.clone());
            }
        }

        for name in ready {
            debug!(task = %name, "starting");
            status.insert(name.clone(), TaskStatus::Running);
            let fut = run(name.clone());
            tasks.spawn(async move { (name, fut.await) });
        }

        if status.values().all(|&state| state == TaskStatus::Finished) {
            break;
        }

        match tasks.join_next().await {
            Some(Ok((name, ok))) => {
                debug!(task = %name, ok, "finished");
                status.insert(name, TaskStatus::Finished);
                all_ok &= ok;
            }
            Some(Err(err)) => {
                warn!("task panicked: {err}");
                return false;
            }
            None => {
                // Queued tasks but nothing running: unreachable for an
                // acyclic graph, but do not spin.
                warn!("scheduler stalled with tasks still queued");
                return false;
            }
        }
    }

    all_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    type EventLog = Arc<Mutex<Vec<String>>>;

    fn graph(edges: &[(&str, &[&str])]) -> impl Fn(&str) -> BTreeSet<String> {
        let map = edges
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.iter().map(|d| d.to_string()).collect::<BTreeSet<_>>(),
                )
            })
            .collect::<HashMap<_, _>>();
        move |name: &str| map.get(name).cloned().unwrap_or_default()
    }

    fn recording_task(
        events: &EventLog,
        fail: &'static [&'static str],
    ) -> impl Fn(String) -> std::pin::Pin<Box<dyn Future<Output = bool> + Send>> {
        let events = Arc::clone(events);
        move |name: String| {
            let events = Arc::clone(&events);
            Box::pin(async move {
                events.lock().unwrap().push(format!("start {name}"));
                tokio::time::sleep(Duration::from_millis(10)).await;
                events.lock().unwrap().push(format!("end {name}"));
                !fail.contains(&name.as_str())
            })
        }
    }

    fn position(events: &[String], entry: &str) -> usize {
        events.iter().position(|e| e == entry).unwrap()
    }

    #[tokio::test]
    async fn waves_respect_dependencies() {
        let events: EventLog = Arc::default();
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        // Diamond: a depends on b and c, which depend on d.
        let deps = graph(&[
            ("a", &["b", "c", "d"]),
            ("b", &["d"]),
            ("c", &["d"]),
            ("d", &[]),
        ]);

        let ok = run_waves(names, deps, recording_task(&events, &[])).await;
        assert!(ok);

        let events = events.lock().unwrap();
        assert!(position(&events, "end d") < position(&events, "start b"));
        assert!(position(&events, "end d") < position(&events, "start c"));
        assert!(position(&events, "end b") < position(&events, "start a"));
        assert!(position(&events, "end c") < position(&events, "start a"));
    }

    #[tokio::test]
    async fn failures_do_not_cancel_remaining_tasks() {
        let events: EventLog = Arc::default();
        let names = vec!["a".to_string(), "b".to_string()];
        let deps = graph(&[("a", &["b"]), ("b", &[])]);

        let ok = run_waves(names, deps, recording_task(&events, &["b"])).await;
        assert!(!ok);

        // The dependent still ran to completion after its dep failed.
        let events = events.lock().unwrap();
        assert!(events.contains(&"start a".to_string()));
        assert!(events.contains(&"end a".to_string()));
    }

    #[tokio::test]
    async fn independent_tasks_share_a_wave() {
        let events: EventLog = Arc::default();
        let names = vec!["a".to_string(), "b".to_string()];
        let deps = graph(&[("a", &[]), ("b", &[])]);

        let ok = run_waves(names, deps, recording_task(&events, &[])).await;
        assert!(ok);

        // Both started before either finished.
        let events = events.lock().unwrap();
        let first_end = events.iter().position(|e| e.starts_with("end")).unwrap();
        assert!(position(&events, "start a") < first_end);
        assert!(position(&events, "start b") < first_end);
    }

    #[tokio::test]
    async fn deps_outside_the_run_do_not_gate() {
        let events: EventLog = Arc::default();
        let names = vec!["a".to_string()];
        let deps = graph(&[("a", &["external"])]);

        let ok = run_waves(names, deps, recording_task(&events, &[])).await;
        assert!(ok);
        assert_eq!(events.lock().unwrap().len(), 2);
    }
}
