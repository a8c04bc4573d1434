//! The plan runner state machine.
//!
//! Steps run serially in plan-file order, honoring `dependsOn`. A step
//! with unmet dependencies is skipped without invocation. Verification
//! failures are step failures and share the retry policy. `onFailure`
//! decides whether a failure retries, lets the run continue, or aborts it.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;

use warden_audit::AuditLogger;
use warden_types::{
    ActionDescriptor, AuditEventKind, ExecutionContext, PlanRunRecord, RunStatus, StepRunRecord,
    StepStatus,
};

use crate::executor::ExecutionEngine;
use crate::plan::{ApprovalMode, FailurePolicy, Plan, PlanMode};
use crate::verify::verify;

/// Runs whole plans through the execution engine, recording each run.
pub struct PlanRunner {
    engine: ExecutionEngine,
    runs_dir: PathBuf,
}

impl PlanRunner {
    pub fn new(engine: ExecutionEngine, runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            runs_dir: runs_dir.into(),
        }
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Execute `plan` and return the finalized run record.
    ///
    /// `mode: propose` plans are materialized as proposals instead.
    pub async fn run(&self, plan: &Plan, ctx: &ExecutionContext, trigger: &str) -> PlanRunRecord {
        // A channel that never fires: the uncancellable path.
        let (tx, rx) = tokio::sync::broadcast::channel(1);
        let record = self.run_cancellable(plan, ctx, trigger, rx).await;
        drop(tx);
        record
    }

    /// Like [`PlanRunner::run`], but a message on `cancel` aborts the run:
    /// the in-flight tool is dropped (killing its subprocess), the current
    /// step is marked failed, and the record is flushed with status
    /// `aborted`.
    pub async fn run_cancellable(
        &self,
        plan: &Plan,
        ctx: &ExecutionContext,
        trigger: &str,
        mut cancel: tokio::sync::broadcast::Receiver<()>,
    ) -> PlanRunRecord {
        if plan.mode == PlanMode::Propose {
            return self.propose(plan, ctx, trigger);
        }

        let started_at = Utc::now();
        let risk = plan.risk();

        // The plan's approval mode and allow-list overrides apply for this
        // run only.
        let mut run_ctx = ctx.clone();
        run_ctx.config = std::sync::Arc::new(plan.effective_config(&ctx.config));
        if plan.policy.approvals == ApprovalMode::Auto {
            run_ctx.autonomous = true;
        }

        // Approval caching and rollback state are per-run: a runner reused
        // across serial runs must not leak either into the next run.
        self.engine.policy().clear_session_approvals();
        self.engine.rollback().reset();

        let mut logger = AuditLogger::begin(
            &self.runs_dir,
            run_ctx.run_id.clone(),
            &plan.name,
            trigger,
            &run_ctx.events,
        );
        run_ctx.events.emit(AuditEventKind::RunStart {
            plan: plan.name.clone(),
            trigger: trigger.to_string(),
        });
        tracing::info!(plan = plan.name, run = %run_ctx.run_id, trigger, "plan run started");

        if plan.policy.approvals == ApprovalMode::PreApprove {
            self.pre_approve(plan, &run_ctx).await;
        }

        let index: HashMap<&str, usize> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        let mut records: Vec<StepRunRecord> = plan
            .steps
            .iter()
            .map(|s| StepRunRecord::pending(&s.id, &s.name))
            .collect();

        let mut any_failed = false;
        let mut aborted = false;
        let mut cancelled = false;

        for (i, step) in plan.steps.iter().enumerate() {
            if aborted || cancelled {
                break;
            }

            let unmet: Vec<String> = step
                .depends_on
                .iter()
                .filter(|dep| {
                    index
                        .get(dep.as_str())
                        .map(|&j| records[j].status != StepStatus::Completed)
                        .unwrap_or(true)
                })
                .cloned()
                .collect();
            if !unmet.is_empty() {
                records[i].status = StepStatus::Skipped;
                records[i].error = Some(format!("unmet dependencies: {}", unmet.join(", ")));
                run_ctx.events.emit(AuditEventKind::StepComplete {
                    step: step.id.clone(),
                    duration_ms: 0,
                });
                tracing::warn!(step = step.id, deps = ?unmet, "step skipped");
                continue;
            }

            records[i].status = StepStatus::Running;
            run_ctx.events.emit(AuditEventKind::StepStart {
                step: step.id.clone(),
                name: step.name.clone(),
            });
            let step_ctx = run_ctx.for_step(&step.id);

            let max_attempts = match step.on_failure {
                FailurePolicy::Retry => 1 + step.retries as usize,
                _ => 1,
            };
            let mut attempt = 0;
            let (result, succeeded, verification) = loop {
                attempt += 1;
                // Dropping the in-flight execute future on cancellation
                // kills any subprocess it spawned (kill_on_drop).
                let result = tokio::select! {
                    result = self.engine.execute_step(step, risk, &step_ctx) => result,
                    _ = cancel.recv() => {
                        cancelled = true;
                        crate::executor::StepResult {
                            success: false,
                            output: None,
                            error: Some("run cancelled by shutdown signal".to_string()),
                            error_kind: Some("run_aborted".to_string()),
                            duration_ms: 0,
                        }
                    }
                };
                if cancelled {
                    break (result, false, None);
                }

                let mut succeeded = result.success;
                let mut verification = None;
                if succeeded {
                    if let Some(clause) = &step.verify {
                        let outcome = verify(clause, &step_ctx).await;
                        succeeded = outcome.passed;
                        verification = Some(outcome);
                    }
                }

                if succeeded || attempt >= max_attempts {
                    break (result, succeeded, verification);
                }
                records[i].status = StepStatus::Retrying;
                tracing::warn!(step = step.id, attempt, "step failed, retrying");
            };

            records[i].output = result.output;
            records[i].duration_ms = result.duration_ms;
            records[i].verification = verification.clone();

            if succeeded {
                records[i].status = StepStatus::Completed;
                records[i].error = None;
                run_ctx.events.emit(AuditEventKind::StepComplete {
                    step: step.id.clone(),
                    duration_ms: records[i].duration_ms,
                });
            } else {
                let error = match &verification {
                    Some(v) if !v.passed => format!("verification failed: {}", v.details),
                    _ => result
                        .error
                        .unwrap_or_else(|| "step failed without reason".to_string()),
                };
                records[i].status = StepStatus::Failed;
                records[i].error = Some(error.clone());
                run_ctx.events.emit(AuditEventKind::StepFailed {
                    step: step.id.clone(),
                    error,
                });
                any_failed = true;
                // Exhausted retries behave like abort; only skip continues.
                if step.on_failure != FailurePolicy::Skip {
                    aborted = true;
                }
            }
        }

        let status = if cancelled {
            RunStatus::Aborted
        } else if any_failed {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        run_ctx.events.emit(AuditEventKind::RunComplete {
            status: status.to_string(),
        });
        for record in &records {
            logger.record_step(record.clone());
        }
        logger.record_diffs(self.engine.rollback().diffs());
        if let Err(e) = logger.complete(status) {
            tracing::error!(error = %e, "failed to persist run record");
        }
        tracing::info!(plan = plan.name, run = %run_ctx.run_id, %status, "plan run finished");

        PlanRunRecord {
            run_id: run_ctx.run_id.clone(),
            plan: plan.name.clone(),
            status,
            steps: records,
            started_at,
            ended_at: Some(Utc::now()),
            trigger: trigger.to_string(),
        }
    }

    /// Materialize a proposal: the run record is persisted in `proposed`
    /// status and nothing executes.
    pub fn propose(&self, plan: &Plan, ctx: &ExecutionContext, trigger: &str) -> PlanRunRecord {
        let started_at = Utc::now();
        let mut logger = AuditLogger::begin(
            &self.runs_dir,
            ctx.run_id.clone(),
            &plan.name,
            trigger,
            &ctx.events,
        );
        let records: Vec<StepRunRecord> = plan
            .steps
            .iter()
            .map(|s| StepRunRecord::pending(&s.id, &s.name))
            .collect();
        for record in &records {
            logger.record_step(record.clone());
        }
        if let Err(e) = logger.complete(RunStatus::Proposed) {
            tracing::error!(error = %e, "failed to persist proposal");
        }
        tracing::info!(plan = plan.name, run = %ctx.run_id, "proposal recorded");

        PlanRunRecord {
            run_id: ctx.run_id.clone(),
            plan: plan.name.clone(),
            status: RunStatus::Proposed,
            steps: records,
            started_at,
            ended_at: Some(Utc::now()),
            trigger: trigger.to_string(),
        }
    }

    /// Collect approvals for every gated tool before the first step runs.
    /// Refusals are left to surface as step failures at execution time.
    async fn pre_approve(&self, plan: &Plan, ctx: &ExecutionContext) {
        let mut seen = std::collections::HashSet::new();
        for step in &plan.steps {
            let Some(tool_name) = &step.tool else { continue };
            if !seen.insert(tool_name.clone()) {
                continue;
            }
            let Some(tool) = self.engine.tools().get(tool_name) else {
                continue;
            };
            let action = ActionDescriptor {
                tool: tool_name.clone(),
                operation: "pre_approve".to_string(),
                description: step.name.clone(),
                permissions: tool.required_permissions(),
                args: step.args.clone(),
                risk: plan.risk(),
            };
            if let warden_policy::Decision::NeedsApproval { .. } =
                self.engine.policy().check(&action, ctx)
            {
                let _ = self.engine.policy().request_approval(&action, ctx).await;
            }
        }
    }
}
