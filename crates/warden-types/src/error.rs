//! The closed set of errors surfaced by the runtime core.
//!
//! Tool-level failures are captured into results and never raise across a
//! dispatch boundary; these variants are how the failure reaches the caller
//! (and, via [`RuntimeError::kind`], the audit record).

/// Errors surfaced by the warden runtime core.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Tool input failed schema validation.
    #[error("invalid input for tool '{tool}': {}", violations.join("; "))]
    InvalidInput {
        tool: String,
        violations: Vec<String>,
    },

    /// The requested tool is not registered.
    #[error("tool not found: {name}")]
    ToolNotFound { name: String },

    /// The tool is registered but matches no enable-list pattern.
    #[error("tool disabled by configuration: {name}")]
    ToolDisabled { name: String },

    /// A skill invoked a tool outside its declared allow-list.
    #[error("tool not allowed for skill '{skill}': {name}")]
    ToolNotAllowed { skill: String, name: String },

    /// A policy rule resolved to deny.
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// The user (or absence of a prompter) refused an approval request.
    #[error("approval denied: {reason}")]
    ApprovalDenied { reason: String },

    /// A tool exceeded its execution deadline.
    #[error("tool '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    /// Path traversal or an allow-list miss.
    #[error("scope violation: {reason}")]
    ScopeViolation { reason: String },

    /// No skill with the given name is loaded.
    #[error("skill not found: {name}")]
    SkillNotFound { name: String },

    /// A skill manifest failed validation or lifecycle constraints.
    #[error("invalid skill manifest '{name}': {reason}")]
    SkillManifestInvalid { name: String, reason: String },

    /// A post-run validator command failed.
    #[error("validator '{command}' failed: {detail}")]
    ValidatorFailed { command: String, detail: String },

    /// A step's verification clause failed.
    #[error("verification failed: {detail}")]
    VerificationFailed { detail: String },

    /// A step's dependencies did not complete.
    #[error("unmet dependencies for step '{step}': {}", missing.join(", "))]
    UnmetDependencies { step: String, missing: Vec<String> },

    /// A plan file could not be parsed or validated.
    #[error("failed to parse plan '{path}': {reason}")]
    PlanParseError { path: String, reason: String },

    /// A configuration file could not be loaded or merged.
    #[error("configuration error in {path}: {reason}")]
    ConfigError { path: String, reason: String },

    /// The run was terminated by an unexpected defect or cancellation.
    #[error("run aborted: {reason}")]
    RunAborted { reason: String },
}

impl RuntimeError {
    /// Stable machine-readable kind string, preserved in run records
    /// alongside the human-readable reason.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::ToolDisabled { .. } => "tool_disabled",
            Self::ToolNotAllowed { .. } => "tool_not_allowed",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::ApprovalDenied { .. } => "approval_denied",
            Self::Timeout { .. } => "timeout",
            Self::ScopeViolation { .. } => "scope_violation",
            Self::SkillNotFound { .. } => "skill_not_found",
            Self::SkillManifestInvalid { .. } => "skill_manifest_invalid",
            Self::ValidatorFailed { .. } => "validator_failed",
            Self::VerificationFailed { .. } => "verification_failed",
            Self::UnmetDependencies { .. } => "unmet_dependencies",
            Self::PlanParseError { .. } => "plan_parse_error",
            Self::ConfigError { .. } => "config_error",
            Self::RunAborted { .. } => "run_aborted",
        }
    }
}
