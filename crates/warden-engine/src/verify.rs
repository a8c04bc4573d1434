//! Post-step verification.
//!
//! A clause may carry a `command` check (exit code, optional output
//! substring) and a `fileExists` check. Every configured check must pass;
//! details concatenate per-check outcomes.

use warden_types::{ExecutionContext, VerificationResult};

use crate::plan::VerifyClause;

/// Evaluate a verification clause in the run's working directory.
pub async fn verify(clause: &VerifyClause, ctx: &ExecutionContext) -> VerificationResult {
    let mut passed = true;
    let mut details = Vec::new();

    if let Some(check) = &clause.command {
        match run_command(&check.run, ctx).await {
            Ok((exit_code, stdout)) => {
                if exit_code != check.exit_code {
                    passed = false;
                    details.push(format!(
                        "command '{}' exited {exit_code}, expected {}",
                        check.run, check.exit_code
                    ));
                } else if let Some(needle) = &check.contains {
                    if stdout.contains(needle.as_str()) {
                        details.push(format!(
                            "command '{}' exited {exit_code} and contains '{needle}'",
                            check.run
                        ));
                    } else {
                        passed = false;
                        details.push(format!(
                            "command '{}' output does not contain '{needle}'",
                            check.run
                        ));
                    }
                } else {
                    details.push(format!("command '{}' exited {exit_code}", check.run));
                }
            }
            Err(e) => {
                passed = false;
                details.push(format!("command '{}' failed to run: {e}", check.run));
            }
        }
    }

    if let Some(path) = &clause.file_exists {
        let resolved = ctx.working_dir.join(path);
        if resolved.exists() {
            details.push(format!("file exists: {path}"));
        } else {
            passed = false;
            details.push(format!("file missing: {path}"));
        }
    }

    if details.is_empty() {
        details.push("no checks configured".to_string());
    }

    VerificationResult {
        passed,
        details: details.join("; "),
    }
}

async fn run_command(command: &str, ctx: &ExecutionContext) -> anyhow::Result<(i32, String)> {
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&ctx.working_dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;
    Ok((
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::CommandCheck;
    use std::sync::Arc;
    use tempfile::TempDir;
    use warden_types::WardenConfig;

    fn ctx(dir: &std::path::Path) -> ExecutionContext {
        ExecutionContext::new(dir, Arc::new(WardenConfig::default()))
    }

    #[tokio::test]
    async fn file_exists_check() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("present.txt"), "").unwrap();
        let ctx = ctx(tmp.path());

        let clause = VerifyClause {
            command: None,
            file_exists: Some("present.txt".into()),
        };
        let result = verify(&clause, &ctx).await;
        assert!(result.passed);
        assert!(result.details.contains("file exists: present.txt"));

        let clause = VerifyClause {
            command: None,
            file_exists: Some("absent.txt".into()),
        };
        let result = verify(&clause, &ctx).await;
        assert!(!result.passed);
        assert!(result.details.contains("file missing: absent.txt"));
    }

    #[tokio::test]
    async fn command_exit_code_check() {
        let tmp = TempDir::new().unwrap();
        let ctx = ctx(tmp.path());

        let clause = VerifyClause {
            command: Some(CommandCheck {
                run: "true".into(),
                exit_code: 0,
                contains: None,
            }),
            file_exists: None,
        };
        assert!(verify(&clause, &ctx).await.passed);

        let clause = VerifyClause {
            command: Some(CommandCheck {
                run: "exit 2".into(),
                exit_code: 0,
                contains: None,
            }),
            file_exists: None,
        };
        let result = verify(&clause, &ctx).await;
        assert!(!result.passed);
        assert!(result.details.contains("exited 2, expected 0"));
    }

    #[tokio::test]
    async fn nonzero_expected_exit_code() {
        let tmp = TempDir::new().unwrap();
        let clause = VerifyClause {
            command: Some(CommandCheck {
                run: "exit 3".into(),
                exit_code: 3,
                contains: None,
            }),
            file_exists: None,
        };
        assert!(verify(&clause, &ctx(tmp.path())).await.passed);
    }

    #[tokio::test]
    async fn contains_check() {
        let tmp = TempDir::new().unwrap();
        let ctx = ctx(tmp.path());

        let clause = VerifyClause {
            command: Some(CommandCheck {
                run: "echo foo".into(),
                exit_code: 0,
                contains: Some("bar".into()),
            }),
            file_exists: None,
        };
        let result = verify(&clause, &ctx).await;
        assert!(!result.passed);
        assert!(result.details.contains("does not contain 'bar'"));

        let clause = VerifyClause {
            command: Some(CommandCheck {
                run: "echo foobar".into(),
                exit_code: 0,
                contains: Some("bar".into()),
            }),
            file_exists: None,
        };
        assert!(verify(&clause, &ctx).await.passed);
    }

    #[tokio::test]
    async fn any_failing_check_fails_the_clause() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("present.txt"), "").unwrap();
        let ctx = ctx(tmp.path());

        let clause = VerifyClause {
            command: Some(CommandCheck {
                run: "false".into(),
                exit_code: 0,
                contains: None,
            }),
            file_exists: Some("present.txt".into()),
        };
        let result = verify(&clause, &ctx).await;
        assert!(!result.passed);
        // Details report both checks.
        assert!(result.details.contains("exited 1"));
        assert!(result.details.contains("file exists"));
    }

    #[tokio::test]
    async fn empty_clause_passes() {
        let tmp = TempDir::new().unwrap();
        let result = verify(&VerifyClause::default(), &ctx(tmp.path())).await;
        assert!(result.passed);
        assert_eq!(result.details, "no checks configured");
    }
}
