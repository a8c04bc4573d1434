//! Permission resolution and approval caching.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use warden_types::{
    ActionDescriptor, AuditEventKind, ExecutionContext, Permission, PolicyAction, RiskLevel,
    WardenConfig,
};

/// The outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Every required permission resolved to allow.
    Allowed,
    /// At least one permission requires interactive confirmation.
    NeedsApproval { reason: String },
    /// A rule resolved to deny.
    Denied { reason: String },
}

/// Resolves permissions against the configuration snapshot.
///
/// One engine instance per concurrent run: the only mutable state is the
/// session-approval set, which callers may clear between runs.
pub struct PolicyEngine {
    config: Arc<WardenConfig>,
    session_approvals: Mutex<HashSet<(String, String)>>,
}

impl PolicyEngine {
    pub fn new(config: Arc<WardenConfig>) -> Self {
        Self {
            config,
            session_approvals: Mutex::new(HashSet::new()),
        }
    }

    /// Check every required permission of `action`.
    ///
    /// Order per permission: session/context approval short-circuit, then
    /// the most specific matching rule (exact permission, else parent
    /// category, else the configured default). `deny` wins immediately;
    /// `confirm` is reported after no denial was found; `Allowed` only when
    /// every permission cleared.
    pub fn check(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> Decision {
        let mut pending_confirm: Option<String> = None;

        for permission in &action.permissions {
            if self.is_approved(&action.tool, *permission) || ctx.is_approved(&action.tool, *permission)
            {
                ctx.events.emit(AuditEventKind::PermissionCheck {
                    tool: action.tool.clone(),
                    permission: permission.as_str().to_string(),
                    decision: "session_approved".to_string(),
                });
                continue;
            }

            let resolved = self.resolve(*permission);
            ctx.events.emit(AuditEventKind::PermissionCheck {
                tool: action.tool.clone(),
                permission: permission.as_str().to_string(),
                decision: resolved.to_string(),
            });

            match resolved {
                PolicyAction::Allow => {}
                PolicyAction::Deny => {
                    let reason = format!(
                        "permission '{}' denied by policy for tool '{}'",
                        permission, action.tool
                    );
                    ctx.events.emit(AuditEventKind::PermissionDenied {
                        tool: action.tool.clone(),
                        permission: permission.as_str().to_string(),
                        reason: reason.clone(),
                    });
                    return Decision::Denied { reason };
                }
                PolicyAction::Confirm => {
                    pending_confirm.get_or_insert_with(|| {
                        format!(
                            "permission '{}' requires approval for tool '{}'",
                            permission, action.tool
                        )
                    });
                }
            }
        }

        match pending_confirm {
            Some(reason) => Decision::NeedsApproval { reason },
            None => Decision::Allowed,
        }
    }

    /// Request approval for `action`.
    ///
    /// Autonomous contexts auto-grant low-risk actions. Otherwise the
    /// context's prompter decides; with no prompter configured the default
    /// is deny. Grants cache every permission of the action for the rest of
    /// the session.
    pub async fn request_approval(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> bool {
        if ctx.autonomous && action.risk == RiskLevel::Low {
            self.grant(action, ctx);
            return true;
        }

        match &ctx.prompter {
            Some(prompter) => {
                if prompter.request(action).await {
                    self.grant(action, ctx);
                    true
                } else {
                    ctx.events.emit(AuditEventKind::ApprovalDenied {
                        tool: action.tool.clone(),
                        reason: "user refused approval".to_string(),
                    });
                    false
                }
            }
            None => {
                ctx.events.emit(AuditEventKind::ApprovalDenied {
                    tool: action.tool.clone(),
                    reason: "no approval prompter configured".to_string(),
                });
                false
            }
        }
    }

    /// Drop all cached session approvals.
    pub fn clear_session_approvals(&self) {
        self.session_approvals
            .lock()
            .expect("session approvals lock poisoned")
            .clear();
    }

    fn grant(&self, action: &ActionDescriptor, ctx: &ExecutionContext) {
        let mut approvals = self
            .session_approvals
            .lock()
            .expect("session approvals lock poisoned");
        for permission in &action.permissions {
            approvals.insert((action.tool.clone(), permission.as_str().to_string()));
            ctx.record_approval(&action.tool, *permission);
        }
        ctx.events.emit(AuditEventKind::ApprovalGranted {
            tool: action.tool.clone(),
            permissions: action
                .permissions
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
        });
    }

    fn is_approved(&self, tool: &str, permission: Permission) -> bool {
        self.session_approvals
            .lock()
            .expect("session approvals lock poisoned")
            .contains(&(tool.to_string(), permission.as_str().to_string()))
    }

    /// Most specific matching rule: exact permission string, else the
    /// parent category, else the configured default. Rules naming unknown
    /// permission strings never match.
    fn resolve(&self, permission: Permission) -> PolicyAction {
        let rules = &self.config.policy.rules;
        if let Some(rule) = rules.iter().find(|r| r.permission == permission.as_str()) {
            return rule.action;
        }
        if let Some(parent) = permission.parent() {
            if let Some(rule) = rules.iter().find(|r| r.permission == parent.as_str()) {
                return rule.action;
            }
        }
        self.config.policy.default_approval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::config::PolicyRule;

    fn config_with_rules(default: PolicyAction, rules: Vec<(&str, PolicyAction)>) -> Arc<WardenConfig> {
        let mut config = WardenConfig::default();
        config.policy.default_approval = default;
        config.policy.rules = rules
            .into_iter()
            .map(|(permission, action)| PolicyRule {
                permission: permission.to_string(),
                action,
            })
            .collect();
        Arc::new(config)
    }

    fn action(tool: &str, permissions: Vec<Permission>) -> ActionDescriptor {
        ActionDescriptor {
            tool: tool.to_string(),
            operation: "execute".to_string(),
            description: format!("run {tool}"),
            permissions,
            args: serde_json::json!({}),
            risk: RiskLevel::Low,
        }
    }

    fn ctx(config: Arc<WardenConfig>) -> ExecutionContext {
        ExecutionContext::new("/tmp/project", config)
    }

    struct ScriptedPrompter {
        answer: bool,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl warden_types::ApprovalPrompter for ScriptedPrompter {
        async fn request(&self, _action: &ActionDescriptor) -> bool {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.answer
        }
    }

    #[test]
    fn allow_rule_allows() {
        let config = config_with_rules(
            PolicyAction::Deny,
            vec![("filesystem.read", PolicyAction::Allow)],
        );
        let engine = PolicyEngine::new(Arc::clone(&config));
        let decision = engine.check(
            &action("fs.read", vec![Permission::FilesystemRead]),
            &ctx(config),
        );
        assert_eq!(decision, Decision::Allowed);
    }

    #[test]
    fn deny_rule_denies_with_reason() {
        let config = config_with_rules(
            PolicyAction::Allow,
            vec![("filesystem.write", PolicyAction::Deny)],
        );
        let engine = PolicyEngine::new(Arc::clone(&config));
        let decision = engine.check(
            &action("fs.write", vec![Permission::FilesystemWrite]),
            &ctx(config),
        );
        match decision {
            Decision::Denied { reason } => {
                assert!(reason.contains("denied"));
                assert!(reason.contains("filesystem.write"));
            }
            other => panic!("expected Denied, got {other:?}"),
        }
    }

    #[test]
    fn parent_rule_applies_when_no_specific_rule() {
        let config = config_with_rules(
            PolicyAction::Confirm,
            vec![("filesystem", PolicyAction::Allow)],
        );
        let engine = PolicyEngine::new(Arc::clone(&config));
        let decision = engine.check(
            &action("fs.read", vec![Permission::FilesystemRead]),
            &ctx(config),
        );
        assert_eq!(decision, Decision::Allowed);
    }

    #[test]
    fn specific_rule_overrides_parent() {
        let config = config_with_rules(
            PolicyAction::Allow,
            vec![
                ("filesystem", PolicyAction::Allow),
                ("filesystem.write", PolicyAction::Deny),
            ],
        );
        let engine = PolicyEngine::new(Arc::clone(&config));

        let read = engine.check(
            &action("fs.read", vec![Permission::FilesystemRead]),
            &ctx(Arc::clone(&config)),
        );
        assert_eq!(read, Decision::Allowed);

        let write = engine.check(
            &action("fs.write", vec![Permission::FilesystemWrite]),
            &ctx(config),
        );
        assert!(matches!(write, Decision::Denied { .. }));
    }

    #[test]
    fn default_applies_without_rules() {
        let config = config_with_rules(PolicyAction::Confirm, vec![]);
        let engine = PolicyEngine::new(Arc::clone(&config));
        let decision = engine.check(
            &action("cmd.run", vec![Permission::Exec]),
            &ctx(config),
        );
        assert!(matches!(decision, Decision::NeedsApproval { .. }));
    }

    #[test]
    fn deny_wins_over_confirm_across_permissions() {
        let config = config_with_rules(
            PolicyAction::Confirm,
            vec![("network", PolicyAction::Deny)],
        );
        let engine = PolicyEngine::new(Arc::clone(&config));
        let decision = engine.check(
            &action("mixed.tool", vec![Permission::Exec, Permission::Network]),
            &ctx(config),
        );
        assert!(matches!(decision, Decision::Denied { .. }));
    }

    #[tokio::test]
    async fn approval_caches_for_the_session() {
        let config = config_with_rules(PolicyAction::Confirm, vec![]);
        let engine = PolicyEngine::new(Arc::clone(&config));
        let prompter = Arc::new(ScriptedPrompter {
            answer: true,
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let ctx = ctx(config).with_prompter(prompter.clone());
        let act = action("fs.write", vec![Permission::FilesystemWrite]);

        assert!(matches!(
            engine.check(&act, &ctx),
            Decision::NeedsApproval { .. }
        ));
        assert!(engine.request_approval(&act, &ctx).await);

        // Second check sees the cached approval; the prompter ran once.
        assert_eq!(engine.check(&act, &ctx), Decision::Allowed);
        assert_eq!(prompter.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        engine.clear_session_approvals();
        ctx.clear_approvals();
        assert!(matches!(
            engine.check(&act, &ctx),
            Decision::NeedsApproval { .. }
        ));
    }

    #[tokio::test]
    async fn refusal_is_not_cached() {
        let config = config_with_rules(PolicyAction::Confirm, vec![]);
        let engine = PolicyEngine::new(Arc::clone(&config));
        let prompter = Arc::new(ScriptedPrompter {
            answer: false,
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let ctx = ctx(config).with_prompter(prompter);
        let act = action("fs.write", vec![Permission::FilesystemWrite]);

        assert!(!engine.request_approval(&act, &ctx).await);
        assert!(matches!(
            engine.check(&act, &ctx),
            Decision::NeedsApproval { .. }
        ));
    }

    #[tokio::test]
    async fn no_prompter_means_deny() {
        let config = config_with_rules(PolicyAction::Confirm, vec![]);
        let engine = PolicyEngine::new(Arc::clone(&config));
        let ctx = ctx(config);
        let act = action("fs.write", vec![Permission::FilesystemWrite]);
        assert!(!engine.request_approval(&act, &ctx).await);
    }

    #[tokio::test]
    async fn autonomous_low_risk_auto_grants() {
        let config = config_with_rules(PolicyAction::Confirm, vec![]);
        let engine = PolicyEngine::new(Arc::clone(&config));
        let ctx = ctx(config).with_autonomous(true);
        let act = action("fs.write", vec![Permission::FilesystemWrite]);

        assert!(engine.request_approval(&act, &ctx).await);
        assert_eq!(engine.check(&act, &ctx), Decision::Allowed);
    }

    #[tokio::test]
    async fn autonomous_high_risk_still_prompts() {
        let config = config_with_rules(PolicyAction::Confirm, vec![]);
        let engine = PolicyEngine::new(Arc::clone(&config));
        let ctx = ctx(config).with_autonomous(true);
        let mut act = action("cmd.run", vec![Permission::Exec]);
        act.risk = RiskLevel::High;

        // No prompter configured, so the high-risk request is refused.
        assert!(!engine.request_approval(&act, &ctx).await);
    }

    #[test]
    fn unknown_rule_strings_never_match() {
        let config = config_with_rules(
            PolicyAction::Allow,
            vec![("filesystem.execute", PolicyAction::Deny)],
        );
        let engine = PolicyEngine::new(Arc::clone(&config));
        let decision = engine.check(
            &action("fs.read", vec![Permission::FilesystemRead]),
            &ctx(config),
        );
        assert_eq!(decision, Decision::Allowed);
    }

    #[tokio::test]
    async fn denial_emits_permission_denied_event() {
        let config = config_with_rules(
            PolicyAction::Allow,
            vec![("filesystem.write", PolicyAction::Deny)],
        );
        let engine = PolicyEngine::new(Arc::clone(&config));
        let ctx = ctx(config);
        let mut rx = ctx.events.subscribe();

        let _ = engine.check(
            &action("fs.write", vec![Permission::FilesystemWrite]),
            &ctx,
        );

        let mut saw_denied = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.kind, AuditEventKind::PermissionDenied { .. }) {
                saw_denied = true;
            }
        }
        assert!(saw_denied);
    }
}
