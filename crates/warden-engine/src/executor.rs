//! Single-step execution: policy gate, rollback hooks, dispatch.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use warden_audit::RollbackTracker;
use warden_policy::{scope::scope_check, Decision, PolicyEngine};
use warden_skills::SkillRunner;
use warden_tools::{ToolRegistry, ToolResult};
use warden_types::{
    input_hash, ActionDescriptor, AuditEventKind, ExecutionContext, Permission, RiskLevel,
    RuntimeError,
};

use crate::plan::PlanStep;

/// The outcome of one step execution.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub duration_ms: u64,
}

impl StepResult {
    fn failure(kind: &str, reason: String, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(reason),
            error_kind: Some(kind.to_string()),
            duration_ms,
        }
    }

    fn from_tool(result: ToolResult) -> Self {
        Self {
            success: result.success,
            output: result.output,
            error: result.error,
            error_kind: result.error_kind,
            duration_ms: result.duration_ms,
        }
    }
}

/// Dispatches one plan step to a tool or skill, gated through policy and
/// bracketed with rollback captures.
pub struct ExecutionEngine {
    tools: ToolRegistry,
    policy: Arc<PolicyEngine>,
    rollback: Arc<RollbackTracker>,
    skills: Option<Arc<SkillRunner>>,
}

impl ExecutionEngine {
    pub fn new(
        tools: ToolRegistry,
        policy: Arc<PolicyEngine>,
        rollback: Arc<RollbackTracker>,
    ) -> Self {
        Self {
            tools,
            policy,
            rollback,
            skills: None,
        }
    }

    /// Attach a skill runner so steps may reference skills.
    #[must_use]
    pub fn with_skills(mut self, skills: Arc<SkillRunner>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn rollback(&self) -> &RollbackTracker {
        &self.rollback
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Execute one step. Failures are captured in the result; this never
    /// panics or raises across the dispatch boundary.
    pub async fn execute_step(
        &self,
        step: &PlanStep,
        risk: RiskLevel,
        ctx: &ExecutionContext,
    ) -> StepResult {
        if let Some(skill_name) = &step.skill {
            return self.execute_skill_step(skill_name, step, ctx).await;
        }
        let Some(tool_name) = &step.tool else {
            return StepResult::failure(
                "plan_parse_error",
                format!("step '{}' has neither tool nor skill", step.id),
                0,
            );
        };
        self.execute_tool_step(tool_name, step, risk, ctx).await
    }

    async fn execute_skill_step(
        &self,
        skill_name: &str,
        step: &PlanStep,
        ctx: &ExecutionContext,
    ) -> StepResult {
        let Some(runner) = &self.skills else {
            return StepResult::failure(
                RuntimeError::SkillNotFound {
                    name: skill_name.to_string(),
                }
                .kind(),
                "no skill runner configured".to_string(),
                0,
            );
        };
        let result = runner.run(skill_name, &step.args, ctx).await;
        StepResult {
            success: result.success,
            output: result
                .output
                .as_ref()
                .map(|text| Value::String(text.clone())),
            error: result.error,
            error_kind: if result.success {
                None
            } else {
                Some("skill_failed".to_string())
            },
            duration_ms: result.duration_ms,
        }
    }

    async fn execute_tool_step(
        &self,
        tool_name: &str,
        step: &PlanStep,
        risk: RiskLevel,
        ctx: &ExecutionContext,
    ) -> StepResult {
        let start = Instant::now();
        let elapsed = |start: Instant| start.elapsed().as_millis() as u64;

        let Some(tool) = self.tools.get(tool_name) else {
            return StepResult::failure(
                "tool_not_found",
                format!("tool not found: {tool_name}"),
                elapsed(start),
            );
        };

        if let Err(e) = scope_check(tool_name, &step.args, ctx) {
            return StepResult::failure(e.kind(), e.to_string(), elapsed(start));
        }

        let action = ActionDescriptor {
            tool: tool_name.to_string(),
            operation: format!("step:{}", step.id),
            description: step.name.clone(),
            permissions: tool.required_permissions(),
            args: step.args.clone(),
            risk,
        };

        match self.policy.check(&action, ctx) {
            Decision::Denied { reason } => {
                return StepResult::failure("permission_denied", reason, elapsed(start));
            }
            Decision::NeedsApproval { reason } => {
                if !self.policy.request_approval(&action, ctx).await {
                    return StepResult::failure(
                        "approval_denied",
                        format!("approval denied: {reason}"),
                        elapsed(start),
                    );
                }
            }
            Decision::Allowed => {}
        }

        if ctx.dry_run {
            ctx.events.emit(AuditEventKind::ToolCall {
                tool: tool_name.to_string(),
                input_hash: input_hash(&step.args),
                success: true,
                duration_ms: 0,
            });
            return StepResult {
                success: true,
                output: Some(serde_json::json!({ "dryRun": true })),
                error: None,
                error_kind: None,
                duration_ms: elapsed(start),
            };
        }

        let mutates_fs = tool_name.starts_with("fs.")
            && tool
                .required_permissions()
                .contains(&Permission::FilesystemWrite);
        let path_arg = step.args.get("path").and_then(Value::as_str).map(String::from);

        if tool_name.starts_with("fs.") {
            if let Some(path) = &path_arg {
                self.rollback.capture_before(&step.id, Path::new(path));
            }
        }

        let result = self.tools.execute(tool_name, step.args.clone(), ctx).await;

        ctx.events.emit(AuditEventKind::ToolCall {
            tool: tool_name.to_string(),
            input_hash: input_hash(&step.args),
            success: result.success,
            duration_ms: result.duration_ms,
        });

        if result.success && mutates_fs {
            if let Some(path) = &path_arg {
                self.rollback.capture_after(&step.id, Path::new(path));
                ctx.events.emit(AuditEventKind::DiffGenerated {
                    step: step.id.clone(),
                    path: path.clone(),
                });
            }
        }

        StepResult::from_tool(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use warden_tools::builtin::register_builtins;
    use warden_types::config::PolicyRule;
    use warden_types::{PolicyAction, WardenConfig};

    fn step(id: &str, tool: &str, args: Value) -> PlanStep {
        PlanStep {
            id: id.into(),
            name: format!("step {id}"),
            tool: Some(tool.into()),
            skill: None,
            args,
            verify: None,
            on_failure: Default::default(),
            retries: 0,
            depends_on: vec![],
        }
    }

    struct Fixture {
        _tmp: TempDir,
        ctx: ExecutionContext,
        engine: ExecutionEngine,
    }

    fn fixture_with(config: WardenConfig) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(config);
        let tools = ToolRegistry::new();
        register_builtins(&tools).unwrap();
        let policy = Arc::new(PolicyEngine::new(Arc::clone(&config)));
        let rollback = Arc::new(RollbackTracker::new(tmp.path()));
        let ctx = ExecutionContext::new(tmp.path(), config);
        let engine = ExecutionEngine::new(tools, policy, rollback);
        Fixture {
            _tmp: tmp,
            ctx,
            engine,
        }
    }

    fn allow_all() -> WardenConfig {
        let mut config = WardenConfig::default();
        config.policy.default_approval = PolicyAction::Allow;
        config
    }

    #[tokio::test]
    async fn tool_step_writes_and_captures_rollback() {
        let f = fixture_with(allow_all());
        let result = f
            .engine
            .execute_step(
                &step("s1", "fs.write", serde_json::json!({"path": "a.txt", "content": "one"})),
                RiskLevel::Low,
                &f.ctx,
            )
            .await;
        assert!(result.success, "{result:?}");

        let diffs = f.engine.rollback().diffs();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].before, "");
        assert_eq!(diffs[0].after, "one");
        assert_eq!(diffs[0].step_id, "s1");
    }

    #[tokio::test]
    async fn denied_permission_blocks_dispatch_and_rollback() {
        let mut config = allow_all();
        config.policy.rules = vec![PolicyRule {
            permission: "filesystem.write".into(),
            action: PolicyAction::Deny,
        }];
        let f = fixture_with(config);

        let result = f
            .engine
            .execute_step(
                &step("s1", "fs.write", serde_json::json!({"path": "a.txt", "content": "x"})),
                RiskLevel::Low,
                &f.ctx,
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("permission_denied"));
        assert!(result.error.unwrap().contains("denied"));
        assert!(!f.ctx.working_dir.join("a.txt").exists());
        assert!(f.engine.rollback().diffs().is_empty());
    }

    #[tokio::test]
    async fn scope_violation_blocks_dispatch() {
        let f = fixture_with(allow_all());
        let result = f
            .engine
            .execute_step(
                &step(
                    "s1",
                    "fs.write",
                    serde_json::json!({"path": "../outside.txt", "content": "x"}),
                ),
                RiskLevel::Low,
                &f.ctx,
            )
            .await;
        assert_eq!(result.error_kind.as_deref(), Some("scope_violation"));
    }

    #[tokio::test]
    async fn unknown_tool_fails_cleanly() {
        let f = fixture_with(allow_all());
        let result = f
            .engine
            .execute_step(
                &step("s1", "fs.teleport", serde_json::json!({})),
                RiskLevel::Low,
                &f.ctx,
            )
            .await;
        assert_eq!(result.error_kind.as_deref(), Some("tool_not_found"));
    }

    #[tokio::test]
    async fn confirm_without_prompter_is_approval_denied() {
        let f = fixture_with(WardenConfig::default()); // default approval: confirm
        let result = f
            .engine
            .execute_step(
                &step("s1", "fs.write", serde_json::json!({"path": "a.txt", "content": "x"})),
                RiskLevel::Low,
                &f.ctx,
            )
            .await;
        assert_eq!(result.error_kind.as_deref(), Some("approval_denied"));
    }

    #[tokio::test]
    async fn dry_run_skips_side_effects() {
        let f = fixture_with(allow_all());
        let ctx = f.ctx.clone().with_dry_run(true);
        let result = f
            .engine
            .execute_step(
                &step("s1", "fs.write", serde_json::json!({"path": "a.txt", "content": "x"})),
                RiskLevel::Low,
                &ctx,
            )
            .await;
        assert!(result.success);
        assert_eq!(result.output.unwrap()["dryRun"], true);
        assert!(!f.ctx.working_dir.join("a.txt").exists());
        assert!(f.engine.rollback().diffs().is_empty());
    }

    #[tokio::test]
    async fn read_tools_do_not_generate_diffs() {
        let f = fixture_with(allow_all());
        std::fs::write(f.ctx.working_dir.join("r.txt"), "data").unwrap();
        let result = f
            .engine
            .execute_step(
                &step("s1", "fs.read", serde_json::json!({"path": "r.txt"})),
                RiskLevel::Low,
                &f.ctx,
            )
            .await;
        assert!(result.success);
        assert!(f.engine.rollback().diffs().is_empty());
    }

    #[tokio::test]
    async fn skill_step_without_runner_fails() {
        let f = fixture_with(allow_all());
        let mut s = step("s1", "fs.read", serde_json::json!({}));
        s.tool = None;
        s.skill = Some("ghost".into());
        let result = f.engine.execute_step(&s, RiskLevel::Low, &f.ctx).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no skill runner"));
    }
}
