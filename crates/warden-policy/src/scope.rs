//! Scope checks: path containment, command and domain allow-lists.
//!
//! A failed scope check is equivalent to a policy denial. Unparseable
//! allow-list entries never match; they are logged and skipped rather than
//! treated as an implicit allow.

use std::path::{Component, Path, PathBuf};

use glob::Pattern;
use serde_json::Value;

use warden_types::{ExecutionContext, RuntimeError};

/// Check a tool call's arguments against the configured scopes.
///
/// - `fs.*` tools with a `path` argument: the path must stay inside the
///   project root (the deepest existing ancestor is realpath'd so symlinks
///   cannot smuggle a write outside), and the root-relative path must match
///   the filesystem allow-list.
/// - `cmd.run`: when the command allow-list is non-empty, the command must
///   match one entry (exact string or regex).
/// - Network tools: when the domain allow-list is non-empty, the URL's host
///   must match one entry (exact, or suffix for dot-prefixed entries).
pub fn scope_check(tool_name: &str, args: &Value, ctx: &ExecutionContext) -> Result<(), RuntimeError> {
    if tool_name.starts_with("fs.") {
        if let Some(path) = args.get("path").and_then(Value::as_str) {
            check_fs_scope(path, ctx)?;
        }
    } else if tool_name == "cmd.run" {
        if let Some(command) = args.get("command").and_then(Value::as_str) {
            check_command_scope(command, &ctx.config.policy.command_allowlist)?;
        }
    } else if tool_name.starts_with("http.") {
        if let Some(url) = args.get("url").and_then(Value::as_str) {
            check_domain_scope(url, &ctx.config.policy.domain_allowlist)?;
        }
    }
    Ok(())
}

fn check_fs_scope(path: &str, ctx: &ExecutionContext) -> Result<(), RuntimeError> {
    let root = &ctx.working_dir;
    let contained = contain_path(root, Path::new(path)).ok_or_else(|| {
        RuntimeError::ScopeViolation {
            reason: format!("path escapes project root: {path}"),
        }
    })?;

    // Resolve the deepest existing ancestor so a symlink inside the root
    // cannot point the write somewhere outside it.
    let resolved = resolve_existing_prefix(&contained);
    let canonical_root = root.canonicalize().unwrap_or_else(|_| root.clone());
    if !resolved.starts_with(&canonical_root) && !resolved.starts_with(root) {
        return Err(RuntimeError::ScopeViolation {
            reason: format!("path resolves outside project root: {path}"),
        });
    }

    let relative = contained
        .strip_prefix(root)
        .unwrap_or(&contained)
        .to_string_lossy()
        .to_string();
    let allowlist = &ctx.config.policy.filesystem_allowlist;
    let matched = allowlist.iter().any(|entry| match Pattern::new(entry) {
        Ok(pattern) => pattern.matches(&relative),
        Err(e) => {
            tracing::warn!(entry, error = %e, "invalid filesystem allow-list pattern, skipping");
            false
        }
    });
    if !matched {
        return Err(RuntimeError::ScopeViolation {
            reason: format!("path not in filesystem allow-list: {relative}"),
        });
    }
    Ok(())
}

fn check_command_scope(command: &str, allowlist: &[String]) -> Result<(), RuntimeError> {
    if allowlist.is_empty() {
        return Ok(());
    }
    let matched = allowlist.iter().any(|entry| {
        if entry == command {
            return true;
        }
        match regex::Regex::new(entry) {
            Ok(re) => re.is_match(command),
            Err(e) => {
                tracing::warn!(entry, error = %e, "invalid command allow-list regex, skipping");
                false
            }
        }
    });
    if !matched {
        return Err(RuntimeError::ScopeViolation {
            reason: format!("command not in allow-list: {command}"),
        });
    }
    Ok(())
}

fn check_domain_scope(url: &str, allowlist: &[String]) -> Result<(), RuntimeError> {
    if allowlist.is_empty() {
        return Ok(());
    }
    let Some(domain) = extract_domain(url) else {
        return Err(RuntimeError::ScopeViolation {
            reason: format!("cannot extract domain from url: {url}"),
        });
    };
    let matched = allowlist.iter().any(|entry| {
        if let Some(suffix) = entry.strip_prefix('.') {
            domain == suffix || domain.ends_with(entry.as_str())
        } else {
            domain == *entry
        }
    });
    if !matched {
        return Err(RuntimeError::ScopeViolation {
            reason: format!("domain not in allow-list: {domain}"),
        });
    }
    Ok(())
}

/// Lexically contain `path` inside `root`: join if relative, resolve `.`
/// and `..` components, and return `None` if the result would climb above
/// the root.
fn contain_path(root: &Path, path: &Path) -> Option<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            other => normalized.push(other),
        }
    }

    if normalized.starts_with(root) {
        Some(normalized)
    } else {
        None
    }
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the
/// not-yet-existing remainder.
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut remainder = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                remainder.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }
    let mut resolved = existing.canonicalize().unwrap_or(existing);
    for name in remainder.iter().rev() {
        resolved.push(name);
    }
    resolved
}

/// Pull the host out of an http(s) URL without a full URL parser.
fn extract_domain(url: &str) -> Option<String> {
    let rest = url.split("://").nth(1)?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.split('@').last()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
