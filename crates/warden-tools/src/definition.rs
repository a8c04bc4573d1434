//! The [`ToolDefinition`] trait and the result type every dispatch returns.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_types::{ExecutionContext, Permission};

use crate::schema::Schema;

/// A typed capability the runtime can invoke.
///
/// Implementations must be `Send + Sync`; the registry hands out
/// `Arc<dyn ToolDefinition>` across tasks.
#[async_trait::async_trait]
pub trait ToolDefinition: Send + Sync {
    /// Stable dotted name, e.g. `fs.read`.
    fn name(&self) -> &str;

    /// Category for grouping, e.g. `"filesystem"`, `"exec"`, `"network"`.
    fn category(&self) -> &str;

    /// Human description shown in tool catalogues.
    fn description(&self) -> &str;

    /// Contract for the arguments of [`Self::execute`].
    fn input_schema(&self) -> Schema;

    /// Contract for the success output. Defaults to an open object.
    fn output_schema(&self) -> Schema {
        Schema::object()
    }

    /// Permission categories the policy engine must clear before dispatch.
    fn required_permissions(&self) -> Vec<Permission>;

    /// Per-call timeout override; `None` uses the configured default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the tool. `input` has already been validated against
    /// [`Self::input_schema`] with defaults applied.
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value>;
}

/// The outcome of one dispatch through the registry.
///
/// Failures are captured here rather than raised: `error_kind` carries the
/// stable kind string and `error` the human-readable reason. Every result
/// is stamped with the observed wall-clock duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(output: Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            error_kind: None,
            duration_ms,
        }
    }

    pub fn err(kind: &str, reason: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(reason.into()),
            error_kind: Some(kind.to_string()),
            duration_ms,
        }
    }
}

/// Catalogue entry for a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub category: String,
    pub description: String,
    /// Model-facing JSON Schema rendering of the input contract.
    pub input_schema: Value,
}
