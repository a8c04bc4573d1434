//! Filesystem tools.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use warden_types::{ExecutionContext, Permission};

use crate::definition::ToolDefinition;
use crate::schema::Schema;

/// Resolve a tool `path` argument against the context working directory.
fn resolve(ctx: &ExecutionContext, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        ctx.working_dir.join(p)
    }
}

/// `fs.read` -- read a UTF-8 file.
pub struct FsReadTool;

#[async_trait::async_trait]
impl ToolDefinition for FsReadTool {
    fn name(&self) -> &str {
        "fs.read"
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    fn description(&self) -> &str {
        "Read a text file and return its content"
    }

    fn input_schema(&self) -> Schema {
        Schema::object().required(
            "path",
            Schema::string("File path, relative to the project root"),
        )
    }

    fn output_schema(&self) -> Schema {
        Schema::object().required("content", Schema::string("File content"))
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::FilesystemRead]
    }

    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value> {
        let path = resolve(ctx, input["path"].as_str().unwrap_or_default());
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(json!({ "content": content }))
    }
}

/// `fs.write` -- create or overwrite a file, creating parent directories.
pub struct FsWriteTool;

#[async_trait::async_trait]
impl ToolDefinition for FsWriteTool {
    fn name(&self) -> &str {
        "fs.write"
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it if missing"
    }

    fn input_schema(&self) -> Schema {
        Schema::object()
            .required(
                "path",
                Schema::string("File path, relative to the project root"),
            )
            .required("content", Schema::string("Content to write"))
    }

    fn output_schema(&self) -> Schema {
        Schema::object().required("bytes_written", Schema::integer("Bytes written"))
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::FilesystemWrite]
    }

    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value> {
        let path = resolve(ctx, input["path"].as_str().unwrap_or_default());
        let content = input["content"].as_str().unwrap_or_default();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(json!({ "bytes_written": content.len() }))
    }
}

/// `fs.patch` -- replace the first occurrence of a search string.
pub struct FsPatchTool;

#[async_trait::async_trait]
impl ToolDefinition for FsPatchTool {
    fn name(&self) -> &str {
        "fs.patch"
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    fn description(&self) -> &str {
        "Replace the first occurrence of a search string in a file"
    }

    fn input_schema(&self) -> Schema {
        Schema::object()
            .required(
                "path",
                Schema::string("File path, relative to the project root"),
            )
            .required("search", Schema::string("Exact text to find"))
            .required("replace", Schema::string("Replacement text"))
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::FilesystemWrite]
    }

    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value> {
        let path = resolve(ctx, input["path"].as_str().unwrap_or_default());
        let search = input["search"].as_str().unwrap_or_default();
        let replace = input["replace"].as_str().unwrap_or_default();

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        if !content.contains(search) {
            bail!("search text not found in {}", path.display());
        }
        let patched = content.replacen(search, replace, 1);
        tokio::fs::write(&path, &patched)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(json!({ "replacements": 1 }))
    }
}

/// `fs.list` -- list directory entries.
pub struct FsListTool;

#[async_trait::async_trait]
impl ToolDefinition for FsListTool {
    fn name(&self) -> &str {
        "fs.list"
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    fn description(&self) -> &str {
        "List the entries of a directory"
    }

    fn input_schema(&self) -> Schema {
        Schema::object().optional(
            "path",
            Schema::string("Directory path, relative to the project root"),
            Some(json!(".")),
        )
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::FilesystemRead]
    }

    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value> {
        let path = resolve(ctx, input["path"].as_str().unwrap_or("."));
        let mut reader = tokio::fs::read_dir(&path)
            .await
            .with_context(|| format!("failed to list {}", path.display()))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            entries.push(entry.file_name().to_string_lossy().to_string());
        }
        entries.sort();
        Ok(json!({ "entries": entries }))
    }
}
