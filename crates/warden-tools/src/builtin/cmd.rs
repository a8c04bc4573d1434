//! Command execution tool.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use warden_types::{ExecutionContext, Permission};

use crate::builtin::MAX_OUTPUT_BYTES;
use crate::definition::ToolDefinition;
use crate::schema::Schema;

/// `cmd.run` -- run a shell command in the project working directory.
///
/// The command string is passed to `sh -c`. Output is captured up to
/// [`MAX_OUTPUT_BYTES`] per stream; a non-zero exit is a tool failure with
/// the exit code and trimmed stderr in the reason.
pub struct CmdRunTool;

#[async_trait::async_trait]
impl ToolDefinition for CmdRunTool {
    fn name(&self) -> &str {
        "cmd.run"
    }

    fn category(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command and capture its output"
    }

    fn input_schema(&self) -> Schema {
        Schema::object()
            .required("command", Schema::string("Shell command line"))
            .optional(
                "timeoutMs",
                Schema::integer("Subprocess timeout in milliseconds"),
                None,
            )
    }

    fn output_schema(&self) -> Schema {
        Schema::object()
            .required("exit_code", Schema::integer("Process exit code"))
            .required("stdout", Schema::string("Captured standard output"))
            .required("stderr", Schema::string("Captured standard error"))
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::Exec]
    }

    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value> {
        let command = input["command"].as_str().unwrap_or_default();
        if command.trim().is_empty() {
            bail!("command must not be empty");
        }

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn command: {command}"))?;

        // The registry already races the whole call against the tool
        // timeout; an explicit timeoutMs argument bounds the subprocess
        // more tightly.
        let output = match input.get("timeoutMs").and_then(Value::as_u64) {
            Some(ms) => {
                tokio::time::timeout(Duration::from_millis(ms), child.wait_with_output())
                    .await
                    .map_err(|_| anyhow::anyhow!("command timed out after {ms}ms: {command}"))?
            }
            None => child.wait_with_output().await,
        }
        .with_context(|| format!("command failed to complete: {command}"))?;

        let stdout = truncate_lossy(&output.stdout);
        let stderr = truncate_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            bail!(
                "command exited with code {exit_code}: {}",
                stderr.trim()
            );
        }

        Ok(json!({
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}

/// Lossy UTF-8 conversion with the output-size cap applied.
fn truncate_lossy(bytes: &[u8]) -> String {
    let slice = if bytes.len() > MAX_OUTPUT_BYTES {
        &bytes[..MAX_OUTPUT_BYTES]
    } else {
        bytes
    };
    String::from_utf8_lossy(slice).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use warden_types::WardenConfig;

    fn ctx(dir: &std::path::Path) -> ExecutionContext {
        ExecutionContext::new(dir, Arc::new(WardenConfig::default()))
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let tmp = TempDir::new().unwrap();
        let out = CmdRunTool
            .execute(json!({"command": "echo hello"}), &ctx(tmp.path()))
            .await
            .unwrap();
        assert_eq!(out["exit_code"], 0);
        assert_eq!(out["stdout"], "hello\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error_with_stderr() {
        let tmp = TempDir::new().unwrap();
        let err = CmdRunTool
            .execute(
                json!({"command": "echo oops >&2; exit 3"}),
                &ctx(tmp.path()),
            )
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("code 3"), "got: {msg}");
        assert!(msg.contains("oops"), "got: {msg}");
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "").unwrap();
        let out = CmdRunTool
            .execute(json!({"command": "ls"}), &ctx(tmp.path()))
            .await
            .unwrap();
        assert!(out["stdout"].as_str().unwrap().contains("marker.txt"));
    }

    #[tokio::test]
    async fn explicit_timeout_kills_slow_commands() {
        let tmp = TempDir::new().unwrap();
        let err = CmdRunTool
            .execute(
                json!({"command": "sleep 5", "timeoutMs": 100}),
                &ctx(tmp.path()),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn empty_command_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = CmdRunTool
            .execute(json!({"command": "  "}), &ctx(tmp.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }
}
