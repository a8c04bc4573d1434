//! Permission categories and the values policy rules resolve to.
//!
//! The category set is closed. A specific category (`filesystem.read`)
//! overrides a rule on its parent (`filesystem`) during resolution.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A permission category required by a tool or skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Any filesystem access (parent of read/write).
    Filesystem,
    /// Read-only filesystem access.
    #[serde(rename = "filesystem.read")]
    FilesystemRead,
    /// Mutating filesystem access.
    #[serde(rename = "filesystem.write")]
    FilesystemWrite,
    /// Subprocess execution.
    Exec,
    /// Outbound network access.
    Network,
    /// Desktop/UI automation.
    UiAutomation,
    /// Access to stored credentials.
    Secrets,
}

impl Permission {
    /// The parent category, if this is a specific sub-category.
    pub fn parent(&self) -> Option<Permission> {
        match self {
            Permission::FilesystemRead | Permission::FilesystemWrite => {
                Some(Permission::Filesystem)
            }
            _ => None,
        }
    }

    /// The canonical dotted string form used in configuration rules.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Filesystem => "filesystem",
            Permission::FilesystemRead => "filesystem.read",
            Permission::FilesystemWrite => "filesystem.write",
            Permission::Exec => "exec",
            Permission::Network => "network",
            Permission::UiAutomation => "ui_automation",
            Permission::Secrets => "secrets",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filesystem" => Ok(Permission::Filesystem),
            "filesystem.read" => Ok(Permission::FilesystemRead),
            "filesystem.write" => Ok(Permission::FilesystemWrite),
            "exec" => Ok(Permission::Exec),
            "network" => Ok(Permission::Network),
            "ui_automation" => Ok(Permission::UiAutomation),
            "secrets" => Ok(Permission::Secrets),
            other => Err(format!("unknown permission category: {other}")),
        }
    }
}

/// What a policy rule resolves a permission to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    /// Proceed without prompting.
    Allow,
    /// Require an approval prompt before proceeding.
    Confirm,
    /// Refuse.
    Deny,
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyAction::Allow => write!(f, "allow"),
            PolicyAction::Confirm => write!(f, "confirm"),
            PolicyAction::Deny => write!(f, "deny"),
        }
    }
}

/// Risk level declared by a plan goal or derived for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}
