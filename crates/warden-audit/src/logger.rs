//! Per-run audit record: aggregation, persistence, and readers.
//!
//! The logger subscribes to the run's event bus at construction and drains
//! it whenever the record is touched. `complete()` stamps the end time,
//! computes the summary, and writes `run.json` plus `diffs.json` under
//! `<runs_dir>/<run_id>/` -- every serialized byte passes through the
//! secret redactor first.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use warden_types::{
    AuditBus, AuditEvent, RunId, RunStatus, StepRunRecord, StepStatus,
};

use crate::redaction::SecretRedactor;
use crate::rollback::DiffEntry;

/// Aggregate counts computed at completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    pub files_changed: usize,
    pub duration_ms: u64,
    pub verifications_passed: usize,
    pub verifications_failed: usize,
}

/// The serialized run record (without diffs, which live alongside it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: RunId,
    pub plan: String,
    pub trigger: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub events: Vec<AuditEvent>,
    pub steps: Vec<StepRunRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    /// Populated by [`AuditLogger::load`]; skipped in `run.json` itself.
    #[serde(skip)]
    pub diffs: Vec<DiffEntry>,
}

/// Aggregates one run's events, steps, and diffs and persists them.
pub struct AuditLogger {
    runs_dir: PathBuf,
    log: RunLog,
    rx: mpsc::UnboundedReceiver<AuditEvent>,
    redactor: SecretRedactor,
}

impl AuditLogger {
    /// Start logging a run: subscribes to `bus` and stamps the start time.
    pub fn begin(
        runs_dir: impl Into<PathBuf>,
        run_id: RunId,
        plan: impl Into<String>,
        trigger: impl Into<String>,
        bus: &AuditBus,
    ) -> Self {
        Self {
            runs_dir: runs_dir.into(),
            log: RunLog {
                run_id,
                plan: plan.into(),
                trigger: trigger.into(),
                status: RunStatus::Running,
                started_at: Utc::now(),
                ended_at: None,
                events: Vec::new(),
                steps: Vec::new(),
                summary: None,
                diffs: Vec::new(),
            },
            rx: bus.subscribe(),
            redactor: SecretRedactor::new(),
        }
    }

    /// Append or replace the record for one step (records are keyed by id;
    /// a retry overwrites the earlier attempt).
    pub fn record_step(&mut self, record: StepRunRecord) {
        self.drain_events();
        if let Some(existing) = self.log.steps.iter_mut().find(|s| s.id == record.id) {
            *existing = record;
        } else {
            self.log.steps.push(record);
        }
    }

    /// Attach the diffs captured by the rollback tracker.
    pub fn record_diffs(&mut self, diffs: Vec<DiffEntry>) {
        self.log.diffs = diffs;
    }

    /// Finalize: drain remaining events, stamp the end time, compute the
    /// summary, and persist. The record is never mutated afterwards.
    pub fn complete(&mut self, status: RunStatus) -> Result<RunSummary> {
        self.drain_events();
        self.log.status = status;
        let ended = Utc::now();
        self.log.ended_at = Some(ended);

        let mut files: Vec<&PathBuf> = self.log.diffs.iter().map(|d| &d.path).collect();
        files.sort();
        files.dedup();

        let summary = RunSummary {
            steps_completed: self.count_steps(StepStatus::Completed),
            steps_failed: self.count_steps(StepStatus::Failed),
            steps_skipped: self.count_steps(StepStatus::Skipped),
            files_changed: files.len(),
            duration_ms: (ended - self.log.started_at).num_milliseconds().max(0) as u64,
            verifications_passed: self.count_verifications(true),
            verifications_failed: self.count_verifications(false),
        };
        self.log.summary = Some(summary.clone());

        self.persist()?;
        Ok(summary)
    }

    /// The in-memory record (for inspection before completion).
    pub fn log(&self) -> &RunLog {
        &self.log
    }

    fn count_steps(&self, status: StepStatus) -> usize {
        self.log.steps.iter().filter(|s| s.status == status).count()
    }

    fn count_verifications(&self, passed: bool) -> usize {
        self.log
            .steps
            .iter()
            .filter_map(|s| s.verification.as_ref())
            .filter(|v| v.passed == passed)
            .count()
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.log.events.push(event);
        }
    }

    fn persist(&self) -> Result<()> {
        let dir = self.runs_dir.join(self.log.run_id.as_str());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create run directory {}", dir.display()))?;

        let run_json = serde_json::to_string_pretty(&self.log)
            .context("failed to serialize run log")?;
        std::fs::write(dir.join("run.json"), self.redactor.redact(&run_json))
            .context("failed to write run.json")?;

        let diffs_json = serde_json::to_string_pretty(&self.log.diffs)
            .context("failed to serialize diffs")?;
        std::fs::write(dir.join("diffs.json"), self.redactor.redact(&diffs_json))
            .context("failed to write diffs.json")?;

        tracing::info!(
            run = %self.log.run_id,
            status = %self.log.status,
            events = self.log.events.len(),
            "run record persisted"
        );
        Ok(())
    }

    /// Read a saved run record back, reattaching its diffs.
    pub fn load(runs_dir: &Path, run_id: &str) -> Result<Option<RunLog>> {
        let dir = runs_dir.join(run_id);
        let run_path = dir.join("run.json");
        if !run_path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&run_path)
            .with_context(|| format!("failed to read {}", run_path.display()))?;
        let mut log: RunLog =
            serde_json::from_str(&content).context("failed to parse run.json")?;

        let diffs_path = dir.join("diffs.json");
        if diffs_path.exists() {
            let content = std::fs::read_to_string(&diffs_path)
                .with_context(|| format!("failed to read {}", diffs_path.display()))?;
            log.diffs = serde_json::from_str(&content).context("failed to parse diffs.json")?;
        }
        Ok(Some(log))
    }

    /// All run ids, newest first (run ids are timestamp-prefixed, so
    /// lexicographic-descending is reverse chronological).
    pub fn list(runs_dir: &Path) -> Result<Vec<String>> {
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(runs_dir).context("failed to read runs directory")? {
            let entry = entry?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    /// Remove `proposed` runs whose start time is older than `horizon`.
    /// Returns the culled run ids.
    pub fn prune_proposals(runs_dir: &Path, horizon: chrono::Duration) -> Result<Vec<String>> {
        let cutoff = Utc::now() - horizon;
        let mut culled = Vec::new();
        for id in Self::list(runs_dir)? {
            let Some(log) = Self::load(runs_dir, &id)? else {
                continue;
            };
            if log.status == RunStatus::Proposed && log.started_at < cutoff {
                std::fs::remove_dir_all(runs_dir.join(&id))
                    .with_context(|| format!("failed to remove run {id}"))?;
                culled.push(id);
            }
        }
        Ok(culled)
    }
}
