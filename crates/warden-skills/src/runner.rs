//! The agentic skill runner.
//!
//! A prompt-driven skill is a bounded loop: templated prompt and tool
//! catalogue go to the model; tool calls it proposes are gated (allow-list,
//! scope, policy, approval) and dispatched; results are fed back until the
//! model answers with plain text or the iteration bound trips. A
//! workflow-driven skill gets the same gated executor as a handle instead.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use warden_policy::{scope::scope_check, Decision, PolicyEngine};
use warden_tools::{ToolRegistry, ToolResult};
use warden_types::{
    input_hash, ActionDescriptor, AuditEventKind, ExecutionContext, RiskLevel, RuntimeError,
};

use crate::manifest::{SkillKind, SkillState};
use crate::model::{ChatMessage, ChatModel, ToolSpec};
use crate::registry::{LoadedSkill, SkillRegistry};

/// Hard ceiling on model iterations per skill run.
const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Timeout for one post-run validator command.
const VALIDATOR_TIMEOUT: Duration = Duration::from_secs(30);

/// One tool call made during a skill run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: Value,
    pub result: ToolResult,
}

/// Outcome of one post-run validator command.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidatorResult {
    pub command: String,
    pub passed: bool,
    pub detail: String,
}

/// The result of a skill run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SkillRunResult {
    pub success: bool,
    /// The model's final text (prompt skills) or the workflow's serialized
    /// return value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub validators: Vec<ValidatorResult>,
    pub duration_ms: u64,
}

impl SkillRunResult {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
            tool_calls: Vec::new(),
            validators: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// Gated tool executor handed to workflow skills (and used internally by
/// the prompt loop). Every call is checked against the skill's allow-list,
/// scope rules, and the policy engine, then logged.
pub struct SkillTools<'a> {
    runner: &'a SkillRunner,
    skill: &'a LoadedSkill,
    ctx: &'a ExecutionContext,
    log: Mutex<Vec<ToolCallRecord>>,
}

impl SkillTools<'_> {
    /// Execute one tool call through the full gate.
    pub async fn execute(&self, name: &str, args: Value) -> ToolResult {
        let result = self
            .runner
            .execute_gated(self.skill, name, args.clone(), self.ctx)
            .await;
        self.log
            .lock()
            .expect("tool call log poisoned")
            .push(ToolCallRecord {
                name: name.to_string(),
                arguments: args,
                result: result.clone(),
            });
        result
    }

    fn take_log(&self) -> Vec<ToolCallRecord> {
        std::mem::take(&mut *self.log.lock().expect("tool call log poisoned"))
    }
}

/// Executes skills against the model, the tool registry, and the policy
/// engine.
pub struct SkillRunner {
    tools: ToolRegistry,
    policy: Arc<PolicyEngine>,
    skills: Arc<SkillRegistry>,
    model: Arc<dyn ChatModel>,
    max_iterations: usize,
}

impl SkillRunner {
    pub fn new(
        tools: ToolRegistry,
        policy: Arc<PolicyEngine>,
        skills: Arc<SkillRegistry>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            tools,
            policy,
            skills,
            model,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Run the named skill with the given inputs.
    ///
    /// Never returns an error: every failure mode lands in the result with
    /// `success=false` and a reason.
    pub async fn run(&self, name: &str, inputs: &Value, ctx: &ExecutionContext) -> SkillRunResult {
        let start = Instant::now();
        let mut result = match self.run_inner(name, inputs, ctx).await {
            Ok(result) => result,
            Err(e) => SkillRunResult::failure(e.to_string()),
        };
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    async fn run_inner(
        &self,
        name: &str,
        inputs: &Value,
        ctx: &ExecutionContext,
    ) -> Result<SkillRunResult, RuntimeError> {
        let skill = self.skills.get(name)?;

        if skill.manifest.state != SkillState::Approved {
            return Err(RuntimeError::SkillManifestInvalid {
                name: name.to_string(),
                reason: format!(
                    "skill is {} and cannot execute; only approved skills run",
                    skill.manifest.state
                ),
            });
        }
        self.skills.check_constraints(&skill.manifest)?;

        if let Err(violations) = skill.manifest.inputs.validate(inputs) {
            return Err(RuntimeError::InvalidInput {
                tool: name.to_string(),
                violations,
            });
        }

        ctx.events.emit(AuditEventKind::SkillLoaded {
            skill: skill.manifest.name.clone(),
            version: skill.manifest.version.clone(),
        });

        match skill.manifest.kind {
            SkillKind::Prompt => self.run_prompt(&skill, inputs, ctx).await,
            SkillKind::Workflow => self.run_workflow(&skill, inputs, ctx).await,
        }
    }

    async fn run_prompt(
        &self,
        skill: &LoadedSkill,
        inputs: &Value,
        ctx: &ExecutionContext,
    ) -> Result<SkillRunResult, RuntimeError> {
        let template = skill.prompt_template()?;
        let prompt = render_template(&template, inputs);
        let catalogue = self.catalogue(skill);

        let mut messages = vec![
            ChatMessage::system(prompt),
            ChatMessage::user(inputs.to_string()),
        ];
        let handle = SkillTools {
            runner: self,
            skill,
            ctx,
            log: Mutex::new(Vec::new()),
        };

        let mut output = None;
        let mut error = None;

        for _ in 0..self.max_iterations {
            let turn = match self.model.chat(&messages, &catalogue).await {
                Ok(turn) => turn,
                Err(e) => {
                    error = Some(format!("model error: {e}"));
                    break;
                }
            };

            if turn.tool_calls.is_empty() {
                output = Some(turn.text);
                break;
            }

            messages.push(ChatMessage::assistant(
                turn.text.clone(),
                turn.tool_calls.clone(),
            ));
            for call in &turn.tool_calls {
                let result = handle.execute(&call.name, call.arguments.clone()).await;
                let payload =
                    serde_json::to_string(&result).unwrap_or_else(|_| "{}".to_string());
                messages.push(ChatMessage::tool(payload, call.id.clone()));
            }
        }

        if output.is_none() && error.is_none() {
            error = Some(format!(
                "model did not finish within {} iterations",
                self.max_iterations
            ));
        }

        self.finish(skill, output, error, handle.take_log(), ctx)
            .await
    }

    async fn run_workflow(
        &self,
        skill: &LoadedSkill,
        inputs: &Value,
        ctx: &ExecutionContext,
    ) -> Result<SkillRunResult, RuntimeError> {
        let Some(workflow) = self.skills.workflow(&skill.manifest.entrypoint) else {
            return Err(RuntimeError::SkillManifestInvalid {
                name: skill.manifest.name.clone(),
                reason: format!(
                    "workflow entrypoint not registered: {}",
                    skill.manifest.entrypoint
                ),
            });
        };

        let handle = SkillTools {
            runner: self,
            skill,
            ctx,
            log: Mutex::new(Vec::new()),
        };

        let (output, error) = match workflow.run(inputs.clone(), &handle, ctx).await {
            Ok(value) => (Some(value.to_string()), None),
            Err(e) => (None, Some(format!("workflow error: {e}"))),
        };

        self.finish(skill, output, error, handle.take_log(), ctx)
            .await
    }

    /// Shared tail: run validators (when the body succeeded) and assemble
    /// the result.
    async fn finish(
        &self,
        skill: &LoadedSkill,
        output: Option<String>,
        error: Option<String>,
        tool_calls: Vec<ToolCallRecord>,
        ctx: &ExecutionContext,
    ) -> Result<SkillRunResult, RuntimeError> {
        let mut validators = Vec::new();
        let mut validator_error = None;

        if error.is_none() {
            for command in &skill.manifest.validators {
                let result = run_validator(command, ctx).await;
                if !result.passed && validator_error.is_none() {
                    validator_error = Some(
                        RuntimeError::ValidatorFailed {
                            command: command.clone(),
                            detail: result.detail.clone(),
                        }
                        .to_string(),
                    );
                }
                validators.push(result);
            }
        }

        let error = error.or(validator_error);
        Ok(SkillRunResult {
            success: error.is_none(),
            output,
            error,
            tool_calls,
            validators,
            duration_ms: 0,
        })
    }

    /// The tool catalogue: the skill's allow-list intersected with the
    /// registry.
    fn catalogue(&self, skill: &LoadedSkill) -> Vec<ToolSpec> {
        self.tools
            .list()
            .into_iter()
            .filter(|info| skill.manifest.tools.iter().any(|t| t == &info.name))
            .map(|info| ToolSpec {
                name: info.name,
                description: info.description,
                input_schema: info.input_schema,
            })
            .collect()
    }

    /// The full gate for one tool call made on behalf of a skill.
    ///
    /// Unknown tools are `tool_not_found`; known tools outside the
    /// allow-list are the distinct `tool_not_allowed`, in both the prompt
    /// and workflow branches.
    async fn execute_gated(
        &self,
        skill: &LoadedSkill,
        name: &str,
        args: Value,
        ctx: &ExecutionContext,
    ) -> ToolResult {
        if self.tools.get(name).is_none() {
            return ToolResult::err("tool_not_found", format!("tool not found: {name}"), 0);
        }
        if !skill.manifest.tools.iter().any(|t| t == name) {
            return ToolResult::err(
                "tool_not_allowed",
                format!(
                    "tool not allowed for skill '{}': {name}",
                    skill.manifest.name
                ),
                0,
            );
        }
        if let Err(e) = scope_check(name, &args, ctx) {
            return ToolResult::err(e.kind(), e.to_string(), 0);
        }

        let tool = self.tools.get(name).expect("tool existence checked above");
        let action = ActionDescriptor {
            tool: name.to_string(),
            operation: "execute".to_string(),
            description: tool.description().to_string(),
            permissions: tool.required_permissions(),
            args: args.clone(),
            risk: RiskLevel::Low,
        };

        match self.policy.check(&action, ctx) {
            Decision::Denied { reason } => {
                return ToolResult::err("permission_denied", reason, 0);
            }
            Decision::NeedsApproval { reason } => {
                if !self.policy.request_approval(&action, ctx).await {
                    return ToolResult::err(
                        "approval_denied",
                        format!("approval denied: {reason}"),
                        0,
                    );
                }
            }
            Decision::Allowed => {}
        }

        let result = self.tools.execute(name, args.clone(), ctx).await;
        ctx.events.emit(AuditEventKind::ToolCall {
            tool: name.to_string(),
            input_hash: input_hash(&args),
            success: result.success,
            duration_ms: result.duration_ms,
        });
        result
    }
}

/// Replace each `{{key}}` with the stringified input value. String inputs
/// are substituted raw; everything else as JSON.
fn render_template(template: &str, inputs: &Value) -> String {
    let mut rendered = template.to_string();
    if let Some(map) = inputs.as_object() {
        for (key, value) in map {
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&format!("{{{{{key}}}}}"), &replacement);
        }
    }
    rendered
}

/// Run one validator command via the shell with a timeout.
async fn run_validator(command: &str, ctx: &ExecutionContext) -> ValidatorResult {
    let spawned = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&ctx.working_dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match spawned {
        Ok(child) => child,
        Err(e) => {
            return ValidatorResult {
                command: command.to_string(),
                passed: false,
                detail: format!("failed to spawn validator: {e}"),
            };
        }
    };

    match tokio::time::timeout(VALIDATOR_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let passed = output.status.success();
            let detail = if passed {
                "exit 0".to_string()
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                )
            };
            ValidatorResult {
                command: command.to_string(),
                passed,
                detail,
            }
        }
        Ok(Err(e)) => ValidatorResult {
            command: command.to_string(),
            passed: false,
            detail: format!("validator failed to complete: {e}"),
        },
        Err(_) => ValidatorResult {
            command: command.to_string(),
            passed: false,
            detail: format!("validator timed out after {}s", VALIDATOR_TIMEOUT.as_secs()),
        },
    }
}
