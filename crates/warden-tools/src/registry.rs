//! Thread-safe tool registry and the dispatch pipeline.
//!
//! Dispatch order: resolve, validate, enable-list, timeout race. The
//! registry deliberately knows nothing about policy -- permission gating
//! happens in the execution engine before `execute` is reached.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use serde_json::Value;

use warden_types::ExecutionContext;

use crate::definition::{ToolDefinition, ToolInfo, ToolResult};

/// A registry of tool definitions.
///
/// Registration is write-once: duplicate names fail loudly and tools are
/// never removed. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn ToolDefinition>>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Rejects duplicate and malformed names.
    pub fn register(&self, tool: Box<dyn ToolDefinition>) -> Result<()> {
        let name = tool.name().to_string();
        validate_tool_name(&name)?;

        let mut map = self
            .tools
            .write()
            .map_err(|e| anyhow::anyhow!("registry lock poisoned: {e}"))?;
        if map.contains_key(&name) {
            bail!("tool already registered: {name}");
        }
        map.insert(name, Arc::from(tool));
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolDefinition>> {
        let map = self.tools.read().ok()?;
        map.get(name).cloned()
    }

    /// List all registered tools, sorted by name for deterministic output.
    pub fn list(&self) -> Vec<ToolInfo> {
        let map = self.tools.read().expect("registry lock poisoned");
        let mut infos: Vec<ToolInfo> = map
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                category: t.category().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema().to_json_schema(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Number of registered tools.
    pub fn count(&self) -> usize {
        self.tools.read().expect("registry lock poisoned").len()
    }

    /// Dispatch a tool call.
    ///
    /// Pipeline, in order:
    /// 1. Resolve the tool (`tool_not_found`).
    /// 2. Validate `raw_input` against its schema (`invalid_input` with the
    ///    violation list).
    /// 3. Check the configured enable-list (`tool_disabled`).
    /// 4. Race the operation against the tool's timeout or the configured
    ///    default (`timeout`).
    ///
    /// Every outcome, including failures, is stamped with the elapsed
    /// milliseconds.
    pub async fn execute(&self, name: &str, raw_input: Value, ctx: &ExecutionContext) -> ToolResult {
        let start = Instant::now();
        let elapsed = |start: Instant| start.elapsed().as_millis() as u64;

        let Some(tool) = self.get(name) else {
            return ToolResult::err("tool_not_found", format!("tool not found: {name}"), 0);
        };

        let input = match tool.input_schema().validate(&raw_input) {
            Ok(coerced) => coerced,
            Err(violations) => {
                return ToolResult::err(
                    "invalid_input",
                    format!("invalid input for tool '{name}': {}", violations.join("; ")),
                    elapsed(start),
                );
            }
        };

        if !is_enabled(name, &ctx.config.tools.enabled) {
            return ToolResult::err(
                "tool_disabled",
                format!("tool disabled by configuration: {name}"),
                elapsed(start),
            );
        }

        let timeout = tool
            .timeout()
            .unwrap_or_else(|| Duration::from_millis(ctx.config.tools.timeout_ms));

        tracing::debug!(tool = name, timeout_ms = timeout.as_millis() as u64, "dispatching tool");

        match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(Ok(output)) => ToolResult::ok(output, elapsed(start)),
            Ok(Err(err)) => ToolResult::err("tool_error", err.to_string(), elapsed(start)),
            Err(_) => ToolResult::err(
                "timeout",
                format!("tool '{name}' timed out after {}ms", timeout.as_millis()),
                elapsed(start),
            ),
        }
    }
}

/// Whether `name` matches any enable-list pattern. A pattern is either an
/// exact tool name or ends in `.*` and matches by prefix (including the
/// dot, so `fs.*` matches `fs.read` but not `fstab`).
pub fn is_enabled(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix(".*") {
            name.starts_with(prefix) && name[prefix.len()..].starts_with('.')
        } else {
            pattern == name
        }
    })
}

/// Tool names are dotted lowercase identifiers: at least two segments, each
/// starting with a letter.
fn validate_tool_name(name: &str) -> Result<()> {
    let segments: Vec<&str> = name.split('.').collect();
    if segments.len() < 2 {
        bail!("tool name must be dotted (e.g. fs.read): {name}");
    }
    for segment in &segments {
        let mut chars = segment.chars();
        let valid_start = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        let valid_rest = segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid_start || !valid_rest {
            bail!("tool name segments must be lowercase identifiers: {name}");
        }
    }
    Ok(())
}
