//! Per-invocation execution context and the approval prompter seam.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::WardenConfig;
use crate::events::AuditBus;
use crate::ids::RunId;
use crate::permission::{Permission, RiskLevel};

/// The bundle handed to the policy engine when an action is gated:
/// what is being done, by which tool, with which arguments, at what risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub tool: String,
    pub operation: String,
    pub description: String,
    pub permissions: Vec<Permission>,
    pub args: serde_json::Value,
    pub risk: RiskLevel,
}

/// Front-end seam for interactive approval.
///
/// The CLI injects an implementation that renders the descriptor and waits
/// for the user; tests inject scripted prompters.
#[async_trait::async_trait]
pub trait ApprovalPrompter: Send + Sync {
    /// Ask the user to approve `action`. Returns `true` on approval.
    async fn request(&self, action: &ActionDescriptor) -> bool;
}

/// Everything a single tool/skill/step invocation needs to know about the
/// run it belongs to.
///
/// Cloning is cheap; clones share the approval set and the audit bus, so
/// approvals cached by one step are visible to the next step of the same
/// run. Clearing a run's context clears its approvals.
#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: RunId,
    pub step_id: Option<String>,
    pub working_dir: PathBuf,
    pub config: Arc<WardenConfig>,
    pub dry_run: bool,
    pub autonomous: bool,
    /// Session-approved (tool, permission) pairs, shared across the run.
    approvals: Arc<Mutex<HashSet<(String, String)>>>,
    pub prompter: Option<Arc<dyn ApprovalPrompter>>,
    pub events: AuditBus,
    /// Optional sink for human-readable progress lines.
    pub progress: Option<mpsc::UnboundedSender<String>>,
}

impl ExecutionContext {
    pub fn new(working_dir: impl Into<PathBuf>, config: Arc<WardenConfig>) -> Self {
        Self {
            run_id: RunId::generate(),
            step_id: None,
            working_dir: working_dir.into(),
            config,
            dry_run: false,
            autonomous: false,
            approvals: Arc::new(Mutex::new(HashSet::new())),
            prompter: None,
            events: AuditBus::new(),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_autonomous(mut self, autonomous: bool) -> Self {
        self.autonomous = autonomous;
        self
    }

    #[must_use]
    pub fn with_prompter(mut self, prompter: Arc<dyn ApprovalPrompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Derive a context for one step, sharing the run's approvals and bus.
    pub fn for_step(&self, step_id: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.step_id = Some(step_id.into());
        ctx
    }

    /// Whether `(tool, permission)` was already approved this run.
    pub fn is_approved(&self, tool: &str, permission: Permission) -> bool {
        self.approvals
            .lock()
            .expect("approvals lock poisoned")
            .contains(&(tool.to_string(), permission.as_str().to_string()))
    }

    /// Cache an approval for the remainder of the run.
    pub fn record_approval(&self, tool: &str, permission: Permission) {
        self.approvals
            .lock()
            .expect("approvals lock poisoned")
            .insert((tool.to_string(), permission.as_str().to_string()));
    }

    /// Drop all cached approvals (e.g. between runs reusing a context).
    pub fn clear_approvals(&self) {
        self.approvals
            .lock()
            .expect("approvals lock poisoned")
            .clear();
    }
}
