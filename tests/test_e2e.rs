//! End-to-end scenarios: a plan goes in, a gated, audited, rollbackable
//! run comes out.

mod common;

use common::{allow_all_project, plan_of, project_with, tool_step, CountingPrompter};

use warden::audit::AuditLogger;
use warden::engine::{CommandCheck, FailurePolicy, VerifyClause};
use warden::types::config::PolicyRule;
use warden::types::{AuditEventKind, PolicyAction, RunStatus, StepStatus, WardenConfig};

#[tokio::test]
async fn minimal_happy_path() {
    let project = allow_all_project();
    let mut step = tool_step(
        "write",
        "fs.write",
        serde_json::json!({"path": "hello.txt", "content": "hi"}),
    );
    step.verify = Some(VerifyClause {
        command: None,
        file_exists: Some("hello.txt".into()),
    });

    let record = project
        .runner
        .run(&plan_of("hello", vec![step]), &project.ctx, "manual")
        .await;

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.steps[0].status, StepStatus::Completed);
    assert_eq!(
        std::fs::read_to_string(project.root().join("hello.txt")).unwrap(),
        "hi"
    );

    let log = AuditLogger::load(&project.runs_dir(), record.run_id.as_str())
        .unwrap()
        .expect("run record should be on disk");
    assert_eq!(log.diffs.len(), 1);
    assert_eq!(log.diffs[0].before, "");
    assert_eq!(log.diffs[0].after, "hi");
}

#[tokio::test]
async fn denied_permission_fails_step_with_zero_diffs() {
    let mut config = WardenConfig::default();
    config.policy.default_approval = PolicyAction::Allow;
    config.policy.rules = vec![PolicyRule {
        permission: "filesystem.write".into(),
        action: PolicyAction::Deny,
    }];
    let project = project_with(config);

    let step = tool_step(
        "write",
        "fs.write",
        serde_json::json!({"path": "blocked.txt", "content": "x"}),
    );
    let record = project
        .runner
        .run(&plan_of("blocked", vec![step]), &project.ctx, "manual")
        .await;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.steps[0].status, StepStatus::Failed);
    assert!(record.steps[0].error.as_ref().unwrap().contains("denied"));
    assert!(!project.root().join("blocked.txt").exists());

    let log = AuditLogger::load(&project.runs_dir(), record.run_id.as_str())
        .unwrap()
        .unwrap();
    assert!(log.diffs.is_empty());
    assert!(
        log.events
            .iter()
            .any(|e| matches!(e.kind, AuditEventKind::PermissionDenied { .. })),
        "expected a permission_denied event in the record"
    );
}

#[tokio::test]
async fn confirm_then_approve_prompts_exactly_once() {
    // Default approval is confirm; the prompter approves the first request
    // and the grant is cached for the rest of the run.
    let project = project_with(WardenConfig::default());
    let prompter = CountingPrompter::approving();
    let ctx = project.ctx.clone().with_prompter(prompter.clone());

    let steps = vec![
        tool_step(
            "first",
            "fs.write",
            serde_json::json!({"path": "a.txt", "content": "a"}),
        ),
        tool_step(
            "second",
            "fs.write",
            serde_json::json!({"path": "b.txt", "content": "b"}),
        ),
    ];
    let record = project
        .runner
        .run(&plan_of("confirmed", steps), &ctx, "manual")
        .await;

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.steps[0].status, StepStatus::Completed);
    assert_eq!(record.steps[1].status, StepStatus::Completed);
    assert_eq!(prompter.call_count(), 1, "approval must be cached per run");
}

#[tokio::test]
async fn refused_approval_fails_the_step() {
    let project = project_with(WardenConfig::default());
    let prompter = CountingPrompter::refusing();
    let ctx = project.ctx.clone().with_prompter(prompter.clone());

    let step = tool_step(
        "write",
        "fs.write",
        serde_json::json!({"path": "a.txt", "content": "a"}),
    );
    let record = project
        .runner
        .run(&plan_of("refused", vec![step]), &ctx, "manual")
        .await;

    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.steps[0]
        .error
        .as_ref()
        .unwrap()
        .contains("approval denied"));
    assert_eq!(prompter.call_count(), 1);
}

#[tokio::test]
async fn dependency_skip_cascades() {
    let project = allow_all_project();

    let mut a = tool_step("a", "cmd.run", serde_json::json!({"command": "exit 1"}));
    a.on_failure = FailurePolicy::Skip;
    let mut b = tool_step("b", "fs.list", serde_json::json!({}));
    b.depends_on = vec!["a".into()];
    let mut c = tool_step("c", "fs.list", serde_json::json!({}));
    c.depends_on = vec!["b".into()];

    let record = project
        .runner
        .run(&plan_of("deps", vec![a, b, c]), &project.ctx, "manual")
        .await;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.steps[0].status, StepStatus::Failed);
    assert_eq!(record.steps[1].status, StepStatus::Skipped);
    assert!(record.steps[1]
        .error
        .as_ref()
        .unwrap()
        .contains("unmet dependencies: a"));
    assert_eq!(record.steps[2].status, StepStatus::Skipped);
    assert!(record.steps[2]
        .error
        .as_ref()
        .unwrap()
        .contains("unmet dependencies: b"));
}

#[tokio::test]
async fn retry_then_succeed_invokes_tool_twice() {
    let project = allow_all_project();

    // Fails on the first attempt (no marker yet), succeeds on the second.
    let mut step = tool_step(
        "flaky",
        "cmd.run",
        serde_json::json!({"command": "test -f marker || { touch marker; exit 1; }"}),
    );
    step.on_failure = FailurePolicy::Retry;
    step.retries = 2;

    let record = project
        .runner
        .run(&plan_of("flaky", vec![step]), &project.ctx, "manual")
        .await;

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.steps[0].status, StepStatus::Completed);

    let log = AuditLogger::load(&project.runs_dir(), record.run_id.as_str())
        .unwrap()
        .unwrap();
    let tool_calls = log
        .events
        .iter()
        .filter(|e| matches!(e.kind, AuditEventKind::ToolCall { .. }))
        .count();
    assert_eq!(tool_calls, 2, "one failed attempt plus one success");
}

#[tokio::test]
async fn verification_failure_with_rollback_restores_side_effects() {
    let project = allow_all_project();
    std::fs::write(project.root().join("state.txt"), "original").unwrap();

    let mut step = tool_step(
        "mutate",
        "fs.write",
        serde_json::json!({"path": "state.txt", "content": "mutated"}),
    );
    step.verify = Some(VerifyClause {
        command: Some(CommandCheck {
            run: "echo foo".into(),
            exit_code: 0,
            contains: Some("bar".into()),
        }),
        file_exists: None,
    });

    let record = project
        .runner
        .run(&plan_of("verified", vec![step]), &project.ctx, "manual")
        .await;

    assert_eq!(record.status, RunStatus::Failed);
    let error = record.steps[0].error.as_ref().unwrap();
    assert!(error.contains("bar"), "error should mention the missing substring");

    // The write itself happened before verification failed.
    assert_eq!(
        std::fs::read_to_string(project.root().join("state.txt")).unwrap(),
        "mutated"
    );

    // Rollback on request restores the pre-state bit-identically.
    project.runner.engine().rollback().rollback_step("mutate").unwrap();
    assert_eq!(
        std::fs::read_to_string(project.root().join("state.txt")).unwrap(),
        "original"
    );
}
