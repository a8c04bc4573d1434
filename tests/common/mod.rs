//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use warden::audit::RollbackTracker;
use warden::engine::{ExecutionEngine, FailurePolicy, Goal, Plan, PlanMode, PlanRunner, PlanStep};
use warden::policy::PolicyEngine;
use warden::skills::{ChatMessage, ChatModel, ModelTurn, ToolSpec};
use warden::tools::builtin::register_builtins;
use warden::tools::ToolRegistry;
use warden::types::{
    ActionDescriptor, ApprovalPrompter, ExecutionContext, PolicyAction, WardenConfig,
};

/// A project sandbox: temp dir with a `.agent/` layout and a wired-up
/// plan runner.
pub struct TestProject {
    pub tmp: TempDir,
    pub config: Arc<WardenConfig>,
    pub ctx: ExecutionContext,
    pub runner: PlanRunner,
    pub tools: ToolRegistry,
}

impl TestProject {
    pub fn runs_dir(&self) -> std::path::PathBuf {
        self.tmp.path().join(".agent/runs")
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }
}

/// Build a project whose policy default is `allow` (no prompting).
pub fn allow_all_project() -> TestProject {
    let mut config = WardenConfig::default();
    config.policy.default_approval = PolicyAction::Allow;
    project_with(config)
}

/// Build a project with the given configuration.
pub fn project_with(config: WardenConfig) -> TestProject {
    let tmp = TempDir::new().expect("should create temp project dir");
    std::fs::create_dir_all(tmp.path().join(".agent/runs")).expect("should create .agent/runs");

    let config = Arc::new(config);
    let tools = ToolRegistry::new();
    register_builtins(&tools).expect("should register builtin tools");
    let policy = Arc::new(PolicyEngine::new(Arc::clone(&config)));
    let rollback = Arc::new(RollbackTracker::new(tmp.path()));
    let engine = ExecutionEngine::new(tools.clone(), policy, rollback);
    let runner = PlanRunner::new(engine, tmp.path().join(".agent/runs"));
    let ctx = ExecutionContext::new(tmp.path(), Arc::clone(&config));

    TestProject {
        tmp,
        config,
        ctx,
        runner,
        tools,
    }
}

/// A plan wrapping the given steps with one low-risk goal.
pub fn plan_of(name: &str, steps: Vec<PlanStep>) -> Plan {
    Plan {
        name: name.into(),
        description: "integration test plan".into(),
        mode: PlanMode::Execute,
        goals: vec![Goal {
            id: "g1".into(),
            description: "achieve the test".into(),
            success_criteria: vec![],
            risk_level: Default::default(),
        }],
        steps,
        policy: Default::default(),
        trigger: Default::default(),
        outputs: vec![],
    }
}

/// A tool step with default failure policy.
pub fn tool_step(id: &str, tool: &str, args: serde_json::Value) -> PlanStep {
    PlanStep {
        id: id.into(),
        name: format!("step {id}"),
        tool: Some(tool.into()),
        skill: None,
        args,
        verify: None,
        on_failure: FailurePolicy::Abort,
        retries: 0,
        depends_on: vec![],
    }
}

/// Prompter that answers a fixed response and counts invocations.
pub struct CountingPrompter {
    pub answer: bool,
    pub calls: AtomicUsize,
}

impl CountingPrompter {
    pub fn approving() -> Arc<Self> {
        Arc::new(Self {
            answer: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            answer: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ApprovalPrompter for CountingPrompter {
    async fn request(&self, _action: &ActionDescriptor) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

/// Model that replays a fixed script of turns.
pub struct ScriptedModel {
    turns: Mutex<std::collections::VecDeque<ModelTurn>>,
}

impl ScriptedModel {
    pub fn new(turns: Vec<ModelTurn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
        })
    }
}

#[async_trait::async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> anyhow::Result<ModelTurn> {
        self.turns
            .lock()
            .expect("model script lock poisoned")
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("model script exhausted"))
    }
}

/// Write a skill directory (manifest + prompt) under `.agent/skills/`.
pub fn write_skill(root: &Path, name: &str, manifest_extra: &str, prompt: &str) {
    let dir = root.join(".agent/skills").join(name);
    std::fs::create_dir_all(&dir).expect("should create skill dir");
    std::fs::write(
        dir.join("skill.json"),
        format!(
            r#"{{"name": "{name}", "version": "1.0.0", "description": "test skill",
                "entrypoint": "prompt.md", "state": "approved"{manifest_extra}}}"#
        ),
    )
    .expect("should write manifest");
    std::fs::write(dir.join("prompt.md"), prompt).expect("should write prompt");
}
