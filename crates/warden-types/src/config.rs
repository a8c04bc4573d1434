//! Configuration model.
//!
//! Deserialized from the JSON configuration file (`.agent/config.json`),
//! merged across layers by [`crate::config_loader::ConfigLoader`]. The
//! snapshot in `ExecutionContext::config` is authoritative for the lifetime
//! of a run even if the on-disk file changes.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::permission::PolicyAction;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WardenConfig {
    pub models: ModelsConfig,
    pub policy: PolicyConfig,
    pub tools: ToolsConfig,
    pub skills: SkillsConfig,
    pub daemon: DaemonConfig,
    pub mcp: McpConfig,
}

/// Language-model provider and routing configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelsConfig {
    pub providers: HashMap<String, ProviderConfig>,
    pub routing: RoutingConfig,
}

/// One provider entry under `models.providers`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Provider type, e.g. `"openai"`, `"anthropic"`, `"azure"`, `"ollama"`.
    #[serde(rename = "type")]
    pub provider_type: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Model routing preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingConfig {
    pub default_provider: String,
    pub offline_first: bool,
    pub fallback_chain: Vec<String>,
    pub skill_overrides: HashMap<String, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_provider: "openai".to_string(),
            offline_first: false,
            fallback_chain: Vec::new(),
            skill_overrides: HashMap::new(),
        }
    }
}

/// One permission rule under `policy.rules`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    /// Dotted permission string, e.g. `"filesystem.write"`.
    pub permission: String,
    pub action: PolicyAction,
}

/// Policy engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyConfig {
    pub default_approval: PolicyAction,
    pub rules: Vec<PolicyRule>,
    /// Glob patterns, relative to the project root, that `fs.*` paths must match.
    pub filesystem_allowlist: Vec<String>,
    /// Exact commands or regex patterns `cmd.run` must match (empty = any).
    pub command_allowlist: Vec<String>,
    /// Domains network tools may target: exact, or suffix when dot-prefixed.
    pub domain_allowlist: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_approval: PolicyAction::Confirm,
            rules: Vec::new(),
            filesystem_allowlist: vec!["**".to_string()],
            command_allowlist: Vec::new(),
            domain_allowlist: Vec::new(),
        }
    }
}

/// Per-process resource ceilings for tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceLimits {
    pub max_disk_write_mib: u64,
    pub max_cpu_seconds: u64,
    pub max_memory_mib: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_disk_write_mib: 512,
            max_cpu_seconds: 300,
            max_memory_mib: 1024,
        }
    }
}

/// Tool registry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// Enable-list patterns: exact tool names, or `prefix.*` prefix matches.
    pub enabled: Vec<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub resource_limits: ResourceLimits,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["fs.*".into(), "cmd.*".into(), "http.*".into()],
            timeout_ms: 30_000,
            max_retries: 0,
            resource_limits: ResourceLimits::default(),
        }
    }
}

/// Skill discovery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkillsConfig {
    pub install_paths: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            install_paths: vec![PathBuf::from(".agent/skills")],
            registry_url: None,
        }
    }
}

/// Background scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaemonConfig {
    /// IANA timezone name used to interpret cron expressions.
    pub timezone: String,
    pub watcher_debounce_ms: u64,
    pub pid_file: PathBuf,
    /// Proposed runs older than this many days may be culled. Absent means
    /// proposals are kept indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_horizon_days: Option<u32>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            watcher_debounce_ms: 500,
            pid_file: PathBuf::from(".agent/warden.pid"),
            proposal_horizon_days: None,
        }
    }
}

/// MCP entrypoint configuration (consumed by the transport layer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpConfig {
    pub transport: String,
    pub exposed_tools: Vec<String>,
    pub gated_tools: Vec<String>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".to_string(),
            exposed_tools: Vec::new(),
            gated_tools: Vec::new(),
        }
    }
}
