//! Skill manifest parsing, validation, and persistence.
//!
//! A manifest is a JSON file (`skill.json`) inside a skill directory,
//! describing the skill's identity, tool allow-list, permissions, input
//! contract, platform constraints, lifecycle state, and post-run
//! validators.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use warden_tools::Schema;
use warden_types::{Permission, RuntimeError};

/// Maximum allowed length for a skill name.
const MAX_NAME_LEN: usize = 64;

/// Lifecycle state of a skill.
///
/// Legal transitions: `Draft -> Approved`, `Approved -> Deprecated`,
/// `Deprecated -> Approved` (re-approval). Only approved skills execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SkillState {
    #[default]
    Draft,
    Approved,
    Deprecated,
}

impl std::fmt::Display for SkillState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkillState::Draft => write!(f, "draft"),
            SkillState::Approved => write!(f, "approved"),
            SkillState::Deprecated => write!(f, "deprecated"),
        }
    }
}

impl SkillState {
    /// Whether moving to `next` is a legal lifecycle transition.
    pub fn can_transition_to(&self, next: SkillState) -> bool {
        matches!(
            (self, next),
            (SkillState::Draft, SkillState::Approved)
                | (SkillState::Approved, SkillState::Deprecated)
                | (SkillState::Deprecated, SkillState::Approved)
        )
    }
}

/// Required and optional permission declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SkillPermissions {
    pub required: Vec<Permission>,
    pub optional: Vec<Permission>,
}

/// OS and binary constraints a host must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SkillConstraints {
    /// Supported operating systems (empty = all). Values as in
    /// `std::env::consts::OS`: `"linux"`, `"macos"`, ...
    pub os: Vec<String>,
    /// Binaries that must be resolvable on `PATH`.
    pub bins: Vec<String>,
}

/// How a skill executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SkillKind {
    /// The entrypoint file is a prompt template driving the agentic loop.
    #[default]
    Prompt,
    /// The entrypoint names a workflow implementation registered in-process.
    Workflow,
}

/// A parsed skill manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Prompt template filename (prompt skills) or workflow name.
    pub entrypoint: String,
    #[serde(default)]
    pub kind: SkillKind,
    /// Tools this skill may invoke (subset of the registry).
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub permissions: SkillPermissions,
    /// Input contract; defaults to an open object.
    #[serde(default = "default_inputs")]
    pub inputs: Schema,
    #[serde(default)]
    pub constraints: SkillConstraints,
    #[serde(default)]
    pub state: SkillState,
    /// Commands that must exit 0 after the skill finishes.
    #[serde(default)]
    pub validators: Vec<String>,
}

fn default_inputs() -> Schema {
    Schema::object()
}

/// Validate a manifest against naming, versioning, and safety constraints.
pub fn validate_manifest(manifest: &SkillManifest) -> Result<(), RuntimeError> {
    let fail = |reason: String| RuntimeError::SkillManifestInvalid {
        name: manifest.name.clone(),
        reason,
    };

    if manifest.name.is_empty() {
        return Err(fail("name must not be empty".into()));
    }
    if manifest.name.len() > MAX_NAME_LEN {
        return Err(fail(format!(
            "name exceeds maximum length of {MAX_NAME_LEN} characters"
        )));
    }
    // ^[a-z0-9][a-z0-9._-]*$
    let mut chars = manifest.name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let tail_ok = manifest
        .name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
    if !head_ok || !tail_ok {
        return Err(fail(format!(
            "name must match ^[a-z0-9][a-z0-9._-]*$: {}",
            manifest.name
        )));
    }

    // Version: strict \d+.\d+.\d+
    let parts: Vec<&str> = manifest.version.split('.').collect();
    let semver_ok = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if !semver_ok {
        return Err(fail(format!(
            "version must be semver X.Y.Z: {}",
            manifest.version
        )));
    }

    if manifest.entrypoint.is_empty() {
        return Err(fail("entrypoint must not be empty".into()));
    }
    if manifest.entrypoint.contains("..") {
        return Err(fail(format!(
            "entrypoint must not contain path traversal (..): {}",
            manifest.entrypoint
        )));
    }

    let mut seen = std::collections::HashSet::new();
    for tool in &manifest.tools {
        if tool.is_empty() {
            return Err(fail("tool allow-list must not contain empty entries".into()));
        }
        if !seen.insert(tool.as_str()) {
            return Err(fail(format!("duplicate tool in allow-list: {tool}")));
        }
    }

    Ok(())
}

/// Parse a manifest from a JSON string and validate it.
pub fn parse_manifest(json: &str) -> Result<SkillManifest, RuntimeError> {
    let manifest: SkillManifest =
        serde_json::from_str(json).map_err(|e| RuntimeError::SkillManifestInvalid {
            name: "<unknown>".into(),
            reason: format!("invalid JSON: {e}"),
        })?;
    validate_manifest(&manifest)?;
    Ok(manifest)
}

/// Load a manifest from a `skill.json` file.
pub fn load_manifest(path: &Path) -> Result<SkillManifest, RuntimeError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| RuntimeError::SkillManifestInvalid {
            name: path.display().to_string(),
            reason: format!("failed to read manifest: {e}"),
        })?;
    parse_manifest(&content)
}

/// Save a manifest back to `skill.json` (pretty-printed, all defaults
/// materialized so load-after-save is the identity).
pub fn save_manifest(manifest: &SkillManifest, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest).context("failed to serialize manifest")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write manifest {}", path.display()))?;
    Ok(())
}
