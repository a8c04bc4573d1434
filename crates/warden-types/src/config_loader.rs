//! Hierarchical configuration loading with multiple sources merged in
//! priority order.
//!
//! The priority chain (later overrides earlier):
//! 1. Built-in defaults ([`WardenConfig::default()`])
//! 2. User-level: `~/.agent/config.json`
//! 3. Project-level: `<project>/.agent/config.json`
//! 4. Environment variables (`AZURE_*`, `AGENT_*`)
//!
//! Each top-level section of the result is annotated with the
//! [`ConfigSource`] that last touched it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::WardenConfig;
use crate::error::RuntimeError;

/// Config files larger than this are rejected rather than parsed.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Where a configuration section came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    BuiltinDefault,
    UserFile(PathBuf),
    ProjectFile(PathBuf),
    EnvVar(String),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::BuiltinDefault => write!(f, "built-in default"),
            ConfigSource::UserFile(p) => write!(f, "user file: {}", p.display()),
            ConfigSource::ProjectFile(p) => write!(f, "project file: {}", p.display()),
            ConfigSource::EnvVar(name) => write!(f, "env var: {name}"),
        }
    }
}

/// The merged configuration plus provenance.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub config: WardenConfig,
    /// Top-level section name -> the source that last set it.
    pub sources: HashMap<String, ConfigSource>,
    /// Config files found and merged, in priority order.
    pub source_files: Vec<PathBuf>,
}

/// Environment variables recognized as overrides, with the config path
/// each one maps onto.
const ENV_OVERRIDES: &[(&str, &[&str])] = &[
    ("AZURE_API_KEY", &["models", "providers", "azure", "apiKey"]),
    ("AZURE_API_BASE", &["models", "providers", "azure", "baseUrl"]),
    (
        "AZURE_DEPLOYMENT_NAME",
        &["models", "providers", "azure", "deploymentName"],
    ),
    (
        "AZURE_API_VERSION",
        &["models", "providers", "azure", "apiVersion"],
    ),
    (
        "AGENT_OPENAI_API_KEY",
        &["models", "providers", "openai", "apiKey"],
    ),
    (
        "AGENT_ANTHROPIC_API_KEY",
        &["models", "providers", "anthropic", "apiKey"],
    ),
    (
        "AGENT_DEFAULT_PROVIDER",
        &["models", "routing", "defaultProvider"],
    ),
    ("AGENT_OFFLINE_FIRST", &["models", "routing", "offlineFirst"]),
];

/// Hierarchical configuration loader.
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    project_root: PathBuf,
    /// Environment snapshot override (for testing).
    env: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Create a loader for the given project root.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            user_config_path: None,
            project_root: project_root.into(),
            env: None,
        }
    }

    /// Override the user config file path.
    #[must_use]
    pub fn with_user_path(mut self, path: PathBuf) -> Self {
        self.user_config_path = Some(path);
        self
    }

    /// Supply a fixed environment instead of reading the process env.
    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Load and merge configuration from all sources.
    pub fn load(&self) -> Result<EffectiveConfig, RuntimeError> {
        let mut sources = HashMap::new();
        let mut source_files = Vec::new();

        let mut merged = serde_json::to_value(WardenConfig::default()).map_err(|e| {
            RuntimeError::ConfigError {
                path: "<defaults>".into(),
                reason: format!("failed to serialize defaults: {e}"),
            }
        })?;
        if let Value::Object(map) = &merged {
            for key in map.keys() {
                sources.insert(key.clone(), ConfigSource::BuiltinDefault);
            }
        }

        // User-level layer.
        let user_path = self.user_config_path.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
            PathBuf::from(home).join(".agent").join("config.json")
        });
        if user_path.exists() {
            let layer = read_config_file(&user_path)?;
            record_sources(&layer, &mut sources, ConfigSource::UserFile(user_path.clone()));
            deep_merge(&mut merged, layer);
            source_files.push(user_path);
        }

        // Project-level layer.
        let project_path = self.project_root.join(".agent").join("config.json");
        if project_path.exists() {
            let layer = read_config_file(&project_path)?;
            record_sources(
                &layer,
                &mut sources,
                ConfigSource::ProjectFile(project_path.clone()),
            );
            deep_merge(&mut merged, layer);
            source_files.push(project_path);
        }

        // Environment overrides.
        self.apply_env_overrides(&mut merged, &mut sources);

        let config: WardenConfig =
            serde_json::from_value(merged).map_err(|e| RuntimeError::ConfigError {
                path: ".agent/config.json".into(),
                reason: format!("merged configuration is invalid: {e}"),
            })?;

        Ok(EffectiveConfig {
            config,
            sources,
            source_files,
        })
    }

    fn apply_env_overrides(&self, merged: &mut Value, sources: &mut HashMap<String, ConfigSource>) {
        for (var, path) in ENV_OVERRIDES {
            let value = match &self.env {
                Some(env) => env.get(*var).cloned(),
                None => std::env::var(var).ok(),
            };
            let Some(raw) = value else { continue };
            if raw.is_empty() {
                continue;
            }
            set_path(merged, path, coerce(&raw));
            sources.insert(path[0].to_string(), ConfigSource::EnvVar(var.to_string()));
            tracing::debug!(var, "applied environment override");
        }
    }
}

/// Read and parse one JSON config file, rejecting oversized files.
fn read_config_file(path: &Path) -> Result<Value, RuntimeError> {
    let meta = std::fs::metadata(path).map_err(|e| RuntimeError::ConfigError {
        path: path.display().to_string(),
        reason: format!("failed to stat config file: {e}"),
    })?;
    if meta.len() > MAX_CONFIG_FILE_SIZE {
        return Err(RuntimeError::ConfigError {
            path: path.display().to_string(),
            reason: format!("config file exceeds {MAX_CONFIG_FILE_SIZE} bytes"),
        });
    }
    let content = std::fs::read_to_string(path).map_err(|e| RuntimeError::ConfigError {
        path: path.display().to_string(),
        reason: format!("failed to read config file: {e}"),
    })?;
    serde_json::from_str(&content).map_err(|e| RuntimeError::ConfigError {
        path: path.display().to_string(),
        reason: format!("invalid JSON: {e}"),
    })
}

/// Merge `layer` into `base`: objects merge recursively, everything else
/// (including arrays) replaces wholesale.
fn deep_merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, layer_value) => *base_slot = layer_value,
    }
}

/// Mark every top-level key in `layer` as coming from `source`.
fn record_sources(layer: &Value, sources: &mut HashMap<String, ConfigSource>, source: ConfigSource) {
    if let Value::Object(map) = layer {
        for key in map.keys() {
            sources.insert(key.clone(), source.clone());
        }
    }
}

/// Write `value` at the dotted `path` inside `root`, creating intermediate
/// objects as needed.
fn set_path(root: &mut Value, path: &[&str], value: Value) {
    let mut cursor = root;
    for segment in &path[..path.len() - 1] {
        if !cursor.is_object() {
            *cursor = Value::Object(serde_json::Map::new());
        }
        cursor = cursor
            .as_object_mut()
            .expect("cursor was just made an object")
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    if !cursor.is_object() {
        *cursor = Value::Object(serde_json::Map::new());
    }
    cursor
        .as_object_mut()
        .expect("cursor was just made an object")
        .insert(path[path.len() - 1].to_string(), value);
}

/// Coerce boolean-like and numeric-like strings; everything else stays a
/// string.
fn coerce(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(n) = raw.parse::<i64>() {
                Value::Number(n.into())
            } else if let Ok(f) = raw.parse::<f64>() {
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(raw.to_string()))
            } else {
                Value::String(raw.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_json(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn defaults_when_no_files_exist() {
        let tmp = TempDir::new().unwrap();
        let loaded = ConfigLoader::new(tmp.path())
            .with_user_path(tmp.path().join("nonexistent.json"))
            .with_env(HashMap::new())
            .load()
            .unwrap();
        assert_eq!(loaded.config, WardenConfig::default());
        assert!(loaded.source_files.is_empty());
        assert_eq!(
            loaded.sources.get("policy"),
            Some(&ConfigSource::BuiltinDefault)
        );
    }

    #[test]
    fn project_overrides_user_overrides_default() {
        let tmp = TempDir::new().unwrap();
        let user_path = tmp.path().join("user-config.json");
        write_json(
            &user_path,
            r#"{"tools": {"timeoutMs": 10000}, "daemon": {"timezone": "Asia/Tokyo"}}"#,
        );
        write_json(
            &tmp.path().join(".agent/config.json"),
            r#"{"tools": {"timeoutMs": 5000}}"#,
        );

        let loaded = ConfigLoader::new(tmp.path())
            .with_user_path(user_path)
            .with_env(HashMap::new())
            .load()
            .unwrap();

        assert_eq!(loaded.config.tools.timeout_ms, 5000);
        assert_eq!(loaded.config.daemon.timezone, "Asia/Tokyo");
        // Default section untouched by either file.
        assert_eq!(loaded.config.daemon.watcher_debounce_ms, 500);
        assert_eq!(loaded.source_files.len(), 2);
        assert!(matches!(
            loaded.sources.get("tools"),
            Some(ConfigSource::ProjectFile(_))
        ));
        assert!(matches!(
            loaded.sources.get("daemon"),
            Some(ConfigSource::UserFile(_))
        ));
    }

    #[test]
    fn merge_is_deep_not_wholesale() {
        let tmp = TempDir::new().unwrap();
        write_json(
            &tmp.path().join(".agent/config.json"),
            r#"{"policy": {"defaultApproval": "allow"}}"#,
        );
        let loaded = ConfigLoader::new(tmp.path())
            .with_user_path(tmp.path().join("none.json"))
            .with_env(HashMap::new())
            .load()
            .unwrap();
        // Sibling fields of the overridden one keep their defaults.
        assert_eq!(loaded.config.policy.filesystem_allowlist, vec!["**"]);
    }

    #[test]
    fn env_overrides_apply_with_coercion() {
        let tmp = TempDir::new().unwrap();
        let env = HashMap::from([
            ("AGENT_DEFAULT_PROVIDER".to_string(), "anthropic".to_string()),
            ("AGENT_OFFLINE_FIRST".to_string(), "true".to_string()),
            ("AZURE_API_KEY".to_string(), "azkey".to_string()),
        ]);
        let loaded = ConfigLoader::new(tmp.path())
            .with_user_path(tmp.path().join("none.json"))
            .with_env(env)
            .load()
            .unwrap();
        assert_eq!(loaded.config.models.routing.default_provider, "anthropic");
        assert!(loaded.config.models.routing.offline_first);
        let azure = loaded.config.models.providers.get("azure").unwrap();
        assert_eq!(azure.api_key.as_deref(), Some("azkey"));
        assert!(matches!(
            loaded.sources.get("models"),
            Some(ConfigSource::EnvVar(_))
        ));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let tmp = TempDir::new().unwrap();
        write_json(&tmp.path().join(".agent/config.json"), "{not json");
        let result = ConfigLoader::new(tmp.path())
            .with_user_path(tmp.path().join("none.json"))
            .with_env(HashMap::new())
            .load();
        assert!(result.is_err());
    }

    #[test]
    fn coerce_values() {
        assert_eq!(coerce("true"), Value::Bool(true));
        assert_eq!(coerce("false"), Value::Bool(false));
        assert_eq!(coerce("42"), Value::Number(42.into()));
        assert_eq!(coerce("hello"), Value::String("hello".into()));
    }
}
