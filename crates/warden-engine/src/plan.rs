//! Plan files: the declarative automation format.
//!
//! Plans are YAML (`*.plan.yaml` / `*.plan.yml`) with goals, an ordered
//! step list, a policy block, and a trigger. Parsing validates structure;
//! the runtime never mutates a plan.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_types::{RiskLevel, RuntimeError, WardenConfig};

/// Whether the plan executes immediately or materializes a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    #[default]
    Execute,
    Propose,
}

/// What a plan is trying to achieve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub risk_level: RiskLevel,
}

/// Step failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    Retry,
    Skip,
    #[default]
    Abort,
}

/// The `command` check of a verification clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandCheck {
    pub run: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
}

/// Post-step verification clause. Any failing check fails the clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VerifyClause {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_exists: Option<String>,
}

/// One plan step: exactly one of `tool` or `skill`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(default = "empty_args")]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyClause>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn empty_args() -> Value {
    Value::Object(serde_json::Map::new())
}

/// How step approvals are handled for this plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Auto-grant low-risk actions, prompt for the rest.
    Auto,
    /// Prompt as each step needs it.
    #[default]
    PerStep,
    /// Collect approvals for every step before the first one runs.
    PreApprove,
}

/// Plan-scoped policy overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanPolicy {
    pub approvals: ApprovalMode,
    /// Narrow the filesystem allow-list for this plan (empty = inherit).
    pub filesystem_allowlist: Vec<String>,
    /// Narrow the command allow-list for this plan (empty = inherit).
    pub command_allowlist: Vec<String>,
}

/// What fires the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Cron {
        schedule: String,
    },
    FsChange {
        paths: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger::Manual
    }
}

/// A parsed plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub mode: PlanMode,
    pub goals: Vec<Goal>,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub policy: PlanPolicy,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl Plan {
    /// Parse and validate a plan from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, RuntimeError> {
        Self::from_yaml_named(yaml, "<inline>")
    }

    /// Parse and validate, attributing errors to `path`.
    pub fn from_yaml_named(yaml: &str, path: &str) -> Result<Self, RuntimeError> {
        let plan: Plan = serde_yaml::from_str(yaml).map_err(|e| RuntimeError::PlanParseError {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        plan.validate(path)?;
        Ok(plan)
    }

    /// Load a plan from a file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| RuntimeError::PlanParseError {
            path: path.display().to_string(),
            reason: format!("failed to read plan file: {e}"),
        })?;
        Self::from_yaml_named(&content, &path.display().to_string())
    }

    /// Serialize back to YAML. `from_yaml(to_yaml(p)) == p` on all
    /// recognized fields.
    pub fn to_yaml(&self) -> Result<String, RuntimeError> {
        serde_yaml::to_string(self).map_err(|e| RuntimeError::PlanParseError {
            path: self.name.clone(),
            reason: format!("failed to serialize plan: {e}"),
        })
    }

    /// The plan's overall risk: the highest goal risk level.
    pub fn risk(&self) -> RiskLevel {
        self.goals
            .iter()
            .map(|g| g.risk_level)
            .max()
            .unwrap_or_default()
    }

    /// Overlay the plan's policy block onto a base configuration: non-empty
    /// plan allow-lists replace the configured ones for this run.
    pub fn effective_config(&self, base: &WardenConfig) -> WardenConfig {
        let mut config = base.clone();
        if !self.policy.filesystem_allowlist.is_empty() {
            config.policy.filesystem_allowlist = self.policy.filesystem_allowlist.clone();
        }
        if !self.policy.command_allowlist.is_empty() {
            config.policy.command_allowlist = self.policy.command_allowlist.clone();
        }
        config
    }

    fn validate(&self, path: &str) -> Result<(), RuntimeError> {
        let fail = |reason: String| RuntimeError::PlanParseError {
            path: path.to_string(),
            reason,
        };

        if self.name.is_empty() {
            return Err(fail("plan name must not be empty".into()));
        }
        if self.goals.is_empty() {
            return Err(fail("plan must declare at least one goal".into()));
        }
        if self.steps.is_empty() {
            return Err(fail("plan must declare at least one step".into()));
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(fail("step id must not be empty".into()));
            }
            if !ids.insert(step.id.as_str()) {
                return Err(fail(format!("duplicate step id: {}", step.id)));
            }
            match (&step.tool, &step.skill) {
                (Some(_), Some(_)) => {
                    return Err(fail(format!(
                        "step '{}' must specify exactly one of tool or skill, got both",
                        step.id
                    )));
                }
                (None, None) => {
                    return Err(fail(format!(
                        "step '{}' must specify exactly one of tool or skill",
                        step.id
                    )));
                }
                _ => {}
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(fail(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        step.id
                    )));
                }
                if dep == &step.id {
                    return Err(fail(format!("step '{}' depends on itself", step.id)));
                }
            }
        }

        if let Trigger::Cron { schedule } = &self.trigger {
            if schedule.trim().is_empty() {
                return Err(fail("cron trigger requires a schedule".into()));
            }
        }
        if let Trigger::FsChange { paths, .. } = &self.trigger {
            if paths.is_empty() {
                return Err(fail("fs_change trigger requires at least one path".into()));
            }
        }

        Ok(())
    }
}

/// Discover `*.plan.yaml` / `*.plan.yml` files under a directory.
pub fn discover_plan_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<std::path::PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            name.ends_with(".plan.yaml") || name.ends_with(".plan.yml")
        })
        .collect();
    files.sort();
    files
}
