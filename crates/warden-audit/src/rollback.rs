//! Pre/post mutation snapshots and unified patch generation.
//!
//! Snapshots are keyed on `(step_id, path)` with first-write-wins
//! semantics: however many times a step rewrites the same file, the bucket
//! holds the true pre-state and exactly one diff entry describing the net
//! change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use similar::TextDiff;

/// One captured mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: PathBuf,
    pub before: String,
    pub after: String,
    /// Unified patch, computed `before -> after`.
    pub patch: String,
    pub step_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Pre-snapshot: `None` means the file did not exist before the step.
type Snapshot = Option<String>;

#[derive(Default)]
struct Inner {
    /// Step ids in first-capture order.
    order: Vec<String>,
    /// step id -> (absolute path -> pre-content).
    buckets: HashMap<String, HashMap<PathBuf, Snapshot>>,
    diffs: Vec<DiffEntry>,
}

/// Tracks file mutations for one run.
pub struct RollbackTracker {
    root: PathBuf,
    inner: Mutex<Inner>,
}

impl RollbackTracker {
    /// Create a tracker resolving relative paths against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Snapshot a file before a step mutates it.
    ///
    /// Idempotent per `(step, path)`: the first capture wins so the true
    /// pre-state survives repeated writes within one step.
    pub fn capture_before(&self, step_id: &str, path: &Path) {
        let abs = self.resolve(path);
        let snapshot: Snapshot = std::fs::read_to_string(&abs).ok();

        let mut inner = self.inner.lock().expect("rollback lock poisoned");
        if !inner.buckets.contains_key(step_id) {
            inner.order.push(step_id.to_string());
        }
        inner
            .buckets
            .entry(step_id.to_string())
            .or_default()
            .entry(abs)
            .or_insert(snapshot);
    }

    /// Snapshot a file after a step mutated it; appends a [`DiffEntry`]
    /// when the content actually changed.
    pub fn capture_after(&self, step_id: &str, path: &Path) {
        let abs = self.resolve(path);
        let after = std::fs::read_to_string(&abs).unwrap_or_default();

        let mut inner = self.inner.lock().expect("rollback lock poisoned");
        let Some(snapshot) = inner
            .buckets
            .get(step_id)
            .and_then(|bucket| bucket.get(&abs))
        else {
            tracing::warn!(step = step_id, path = %abs.display(), "capture_after without capture_before");
            return;
        };
        let before = snapshot.clone().unwrap_or_default();
        if before == after {
            return;
        }

        // Replace any earlier entry for this (step, path): the diff is the
        // net change from the pre-state to the latest content.
        let relative = abs
            .strip_prefix(&self.root)
            .unwrap_or(&abs)
            .to_string_lossy()
            .to_string();
        let patch = unified_patch(&relative, &before, &after);
        inner
            .diffs
            .retain(|d| !(d.step_id == step_id && d.path == abs));
        inner.diffs.push(DiffEntry {
            path: abs,
            before,
            after,
            patch,
            step_id: step_id.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Restore every file captured for `step_id` to its pre-state.
    ///
    /// Files that did not exist before the step are removed. Returns the
    /// restored paths.
    pub fn rollback_step(&self, step_id: &str) -> std::io::Result<Vec<PathBuf>> {
        let bucket = {
            let inner = self.inner.lock().expect("rollback lock poisoned");
            inner.buckets.get(step_id).cloned()
        };
        let Some(bucket) = bucket else {
            return Ok(Vec::new());
        };

        let mut restored = Vec::new();
        for (path, snapshot) in bucket {
            match snapshot {
                Some(content) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, content)?;
                }
                None => {
                    if path.exists() {
                        std::fs::remove_file(&path)?;
                    }
                }
            }
            restored.push(path);
        }
        tracing::info!(step = step_id, files = restored.len(), "rolled back step");
        Ok(restored)
    }

    /// Roll back every tracked step, most recent first.
    pub fn rollback_all(&self) -> std::io::Result<Vec<PathBuf>> {
        let order: Vec<String> = {
            let inner = self.inner.lock().expect("rollback lock poisoned");
            inner.order.iter().rev().cloned().collect()
        };
        let mut restored = Vec::new();
        for step_id in order {
            restored.extend(self.rollback_step(&step_id)?);
        }
        Ok(restored)
    }

    /// Drop all snapshots and diffs. Called when a new run takes ownership
    /// of the tracker.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("rollback lock poisoned");
        *inner = Inner::default();
    }

    /// All captured diff entries, in capture order.
    pub fn diffs(&self) -> Vec<DiffEntry> {
        self.inner
            .lock()
            .expect("rollback lock poisoned")
            .diffs
            .clone()
    }

    /// Concatenation of all unified patches, newline-delimited.
    pub fn export_patches(&self) -> String {
        self.inner
            .lock()
            .expect("rollback lock poisoned")
            .diffs
            .iter()
            .map(|d| d.patch.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Render a unified patch between two file versions.
fn unified_patch(relative_path: &str, before: &str, after: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(
            &format!("a/{relative_path}"),
            &format!("b/{relative_path}"),
        )
        .to_string()
}
