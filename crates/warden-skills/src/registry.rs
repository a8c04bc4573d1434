//! Skill discovery, loading, and lifecycle management.
//!
//! Skills live on disk as one directory per skill (containing `skill.json`
//! and the entrypoint) under the configured install paths. Workflow
//! implementations are registered in-process and resolved by entrypoint
//! name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use warden_types::{ExecutionContext, RuntimeError};

use crate::manifest::{load_manifest, save_manifest, SkillManifest, SkillState};
use crate::runner::SkillTools;

/// A skill loaded from disk.
#[derive(Debug, Clone)]
pub struct LoadedSkill {
    pub manifest: SkillManifest,
    /// The skill's directory.
    pub dir: PathBuf,
}

impl LoadedSkill {
    /// Read the prompt template named by the manifest entrypoint.
    pub fn prompt_template(&self) -> Result<String, RuntimeError> {
        let path = self.dir.join(&self.manifest.entrypoint);
        std::fs::read_to_string(&path).map_err(|e| RuntimeError::SkillManifestInvalid {
            name: self.manifest.name.clone(),
            reason: format!("failed to read entrypoint {}: {e}", path.display()),
        })
    }
}

/// A workflow-driven skill: code instead of a prompt.
///
/// The `tools` handle enforces the same allow-list and policy gate the
/// prompt-driven loop applies.
#[async_trait::async_trait]
pub trait WorkflowSkill: Send + Sync {
    async fn run(
        &self,
        inputs: Value,
        tools: &SkillTools<'_>,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<Value>;
}

/// Discovers, validates, and serves skills; enforces the lifecycle.
pub struct SkillRegistry {
    install_paths: Vec<PathBuf>,
    skills: RwLock<HashMap<String, LoadedSkill>>,
    workflows: RwLock<HashMap<String, Arc<dyn WorkflowSkill>>>,
}

impl SkillRegistry {
    pub fn new(install_paths: Vec<PathBuf>) -> Self {
        Self {
            install_paths,
            skills: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Scan every install path and load all valid skills. Invalid
    /// manifests are logged and skipped. Returns the number loaded.
    pub fn discover(&self) -> usize {
        let mut loaded = 0;
        for base in &self.install_paths {
            let Ok(entries) = std::fs::read_dir(base) else {
                continue;
            };
            for entry in entries.flatten() {
                let dir = entry.path();
                if !dir.is_dir() {
                    continue;
                }
                match self.load_dir(&dir) {
                    Ok(skill) => {
                        tracing::info!(
                            skill = skill.manifest.name,
                            version = skill.manifest.version,
                            state = %skill.manifest.state,
                            "skill discovered"
                        );
                        self.insert(skill);
                        loaded += 1;
                    }
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), error = %e, "skipping invalid skill");
                    }
                }
            }
        }
        loaded
    }

    /// Fetch a skill by name, loading it from disk on demand.
    pub fn get(&self, name: &str) -> Result<LoadedSkill, RuntimeError> {
        if let Some(skill) = self
            .skills
            .read()
            .expect("skill registry lock poisoned")
            .get(name)
        {
            return Ok(skill.clone());
        }
        for base in &self.install_paths {
            let dir = base.join(name);
            if dir.join("skill.json").exists() {
                let skill = self.load_dir(&dir)?;
                self.insert(skill.clone());
                return Ok(skill);
            }
        }
        Err(RuntimeError::SkillNotFound {
            name: name.to_string(),
        })
    }

    /// All loaded manifests, sorted by name.
    pub fn list(&self) -> Vec<SkillManifest> {
        let map = self.skills.read().expect("skill registry lock poisoned");
        let mut manifests: Vec<SkillManifest> =
            map.values().map(|s| s.manifest.clone()).collect();
        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        manifests
    }

    /// Transition a skill's lifecycle state, persisting the manifest.
    ///
    /// Only `draft -> approved`, `approved -> deprecated`, and
    /// `deprecated -> approved` are legal.
    pub fn set_state(&self, name: &str, next: SkillState) -> Result<(), RuntimeError> {
        let mut skill = self.get(name)?;
        let current = skill.manifest.state;
        if !current.can_transition_to(next) {
            return Err(RuntimeError::SkillManifestInvalid {
                name: name.to_string(),
                reason: format!("illegal lifecycle transition: {current} -> {next}"),
            });
        }
        skill.manifest.state = next;
        save_manifest(&skill.manifest, &skill.dir.join("skill.json")).map_err(|e| {
            RuntimeError::SkillManifestInvalid {
                name: name.to_string(),
                reason: format!("failed to persist state change: {e}"),
            }
        })?;
        tracing::info!(skill = name, from = %current, to = %next, "skill state changed");
        self.insert(skill);
        Ok(())
    }

    /// Register a workflow implementation under its entrypoint name.
    pub fn register_workflow(&self, name: &str, workflow: Arc<dyn WorkflowSkill>) {
        self.workflows
            .write()
            .expect("workflow registry lock poisoned")
            .insert(name.to_string(), workflow);
    }

    /// Resolve a workflow implementation.
    pub fn workflow(&self, name: &str) -> Option<Arc<dyn WorkflowSkill>> {
        self.workflows
            .read()
            .expect("workflow registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Check a manifest's OS and binary constraints against this host.
    pub fn check_constraints(&self, manifest: &SkillManifest) -> Result<(), RuntimeError> {
        let constraints = &manifest.constraints;
        if !constraints.os.is_empty()
            && !constraints.os.iter().any(|os| os == std::env::consts::OS)
        {
            return Err(RuntimeError::SkillManifestInvalid {
                name: manifest.name.clone(),
                reason: format!(
                    "unsupported OS: requires one of [{}], host is {}",
                    constraints.os.join(", "),
                    std::env::consts::OS
                ),
            });
        }
        for bin in &constraints.bins {
            if !binary_on_path(bin) {
                return Err(RuntimeError::SkillManifestInvalid {
                    name: manifest.name.clone(),
                    reason: format!("required binary not found on PATH: {bin}"),
                });
            }
        }
        Ok(())
    }

    fn load_dir(&self, dir: &Path) -> Result<LoadedSkill, RuntimeError> {
        let manifest = load_manifest(&dir.join("skill.json"))?;
        Ok(LoadedSkill {
            manifest,
            dir: dir.to_path_buf(),
        })
    }

    fn insert(&self, skill: LoadedSkill) {
        self.skills
            .write()
            .expect("skill registry lock poisoned")
            .insert(skill.manifest.name.clone(), skill);
    }
}

/// Whether `bin` resolves to an executable file on `PATH`.
fn binary_on_path(bin: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(bin).is_file())
}
