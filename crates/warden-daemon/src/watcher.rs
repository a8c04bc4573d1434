//! Filesystem-triggered plans.
//!
//! For each plan with an `fs_change` trigger, a recursive watcher covers
//! the declared paths. Change events are debounced (write-finish quiet
//! period, default 500 ms) and filtered through the plan's glob before the
//! plan is enqueued for execution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use glob::Pattern;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use warden_engine::{Plan, Trigger};

use crate::scheduler::PlanLocks;

/// A running watcher for one fs-triggered plan.
pub struct PlanWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl PlanWatcher {
    /// Start watching the plan's declared paths (resolved against
    /// `project_root`). On a debounced, filter-matching change the plan is
    /// handed to `on_fire` with trigger `"fs_change"`, serialized through
    /// the shared plan locks.
    pub fn start<F, Fut>(
        plan: Plan,
        project_root: &Path,
        debounce: Duration,
        locks: PlanLocks,
        mut shutdown: broadcast::Receiver<()>,
        on_fire: F,
    ) -> anyhow::Result<Self>
    where
        F: Fn(Plan, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let Trigger::FsChange { paths, filter } = plan.trigger.clone() else {
            anyhow::bail!("plan '{}' has no fs_change trigger", plan.name);
        };

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    if is_change(&event.kind) {
                        for path in event.paths {
                            let _ = event_tx.send(path);
                        }
                    }
                }
            },
            notify::Config::default(),
        )?;

        for declared in &paths {
            let target = project_root.join(declared);
            watcher.watch(&target, RecursiveMode::Recursive)?;
            tracing::info!(plan = plan.name, path = %target.display(), "watching for changes");
        }

        let pattern = filter
            .as_deref()
            .and_then(|f| match Pattern::new(f) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(plan = plan.name, filter = f, error = %e, "invalid path filter, matching nothing");
                    None
                }
            });
        let filter_configured = filter.is_some();
        let root = project_root.to_path_buf();

        let task = tokio::spawn(async move {
            let mut pending = false;
            loop {
                let next = tokio::select! {
                    event = event_rx.recv() => event,
                    _ = shutdown.recv() => {
                        tracing::info!(plan = plan.name, "watcher shutting down");
                        return;
                    }
                };
                let Some(path) = next else { return };
                if matches_filter(&path, &root, filter_configured, pattern.as_ref()) {
                    pending = true;
                }

                // Debounce: keep absorbing events until the quiet period
                // elapses, then fire once.
                while pending {
                    match tokio::time::timeout(debounce, event_rx.recv()).await {
                        Ok(Some(path)) => {
                            if matches_filter(&path, &root, filter_configured, pattern.as_ref()) {
                                pending = true;
                            }
                        }
                        Ok(None) => return,
                        Err(_) => {
                            pending = false;
                            let lock = locks.for_plan(&plan.name);
                            let _guard = lock.lock().await;
                            tracing::info!(plan = plan.name, "fs_change trigger fired");
                            on_fire(plan.clone(), "fs_change".to_string()).await;
                        }
                    }
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    /// Stop the watcher task (the OS watcher closes on drop).
    pub fn stop(self) {
        self.task.abort();
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Evaluate the plan's glob filter against the project-relative path.
/// Without a configured filter every change qualifies; a configured but
/// invalid filter matches nothing.
fn matches_filter(
    path: &Path,
    root: &Path,
    filter_configured: bool,
    pattern: Option<&Pattern>,
) -> bool {
    if !filter_configured {
        return true;
    }
    let Some(pattern) = pattern else {
        return false;
    };
    let relative = path.strip_prefix(root).unwrap_or(path);
    pattern.matches_path(relative)
}
