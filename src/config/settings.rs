//! Layered settings with provenance
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. User settings (`$XDG_CONFIG_HOME/steplink/settings.toml`)
//! 3. Project settings (`./.steplink.toml`)
//! 4. `STEPLINK_ARTIFACT_*` environment variables
//! 5. Per-call overrides
//!
//! The merged value is checked once by [`Settings::recorder_config`];
//! nothing below that boundary sees untyped settings.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use crate::artifact::{parse_algorithms, patterns_from_value, PatternFilter, RecorderConfig};
use crate::error::{RecordError, RecordResult};

/// File name of the project settings layer
pub const PROJECT_SETTINGS_FILE: &str = ".steplink.toml";

pub const ENV_BASE_PATH: &str = "STEPLINK_ARTIFACT_BASE_PATH";
pub const ENV_EXCLUDE_PATTERNS: &str = "STEPLINK_ARTIFACT_EXCLUDE_PATTERNS";
pub const ENV_LSTRIP_PATHS: &str = "STEPLINK_ARTIFACT_LSTRIP_PATHS";

/// Origin of a settings layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SettingsOrigin {
    Builtin,
    User,
    Project,
    Env,
    Overrides,
}

/// A contributing layer with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsSource {
    pub origin: SettingsOrigin,

    /// File path (None for builtin, env and overrides)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged settings and the layers they came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub value: Value,
    pub sources: Vec<SettingsSource>,
}

/// Collects the settings layers to merge
#[derive(Debug, Clone, Default)]
pub struct SettingsLoader {
    user_file: Option<PathBuf>,
    project_file: Option<PathBuf>,
    env: BTreeMap<String, String>,
    overrides: Option<Value>,
}

impl SettingsLoader {
    /// Loader with built-in defaults only
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader reading the user file, the project file in the current
    /// directory and the process environment
    pub fn from_environment() -> Self {
        let env: BTreeMap<String, String> = std::env::vars().collect();
        Self {
            user_file: user_settings_path(&env),
            project_file: Some(PathBuf::from(PROJECT_SETTINGS_FILE)),
            env,
            overrides: None,
        }
    }

    pub fn with_user_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_file = Some(path.into());
        self
    }

    pub fn with_project_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_file = Some(path.into());
        self
    }

    pub fn with_env_vars<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    pub fn with_overrides(mut self, overrides: Value) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Read and merge every layer. Missing files are skipped.
    pub fn load(&self) -> RecordResult<Settings> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![SettingsSource {
            origin: SettingsOrigin::Builtin,
            path: None,
            digest: None,
        }];

        let files = [
            (SettingsOrigin::User, self.user_file.as_deref()),
            (SettingsOrigin::Project, self.project_file.as_deref()),
        ];
        for (origin, path) in files {
            let Some(path) = path else { continue };
            if !path.is_file() {
                continue;
            }
            let (value, digest) = load_toml_file(path)?;
            tracing::debug!(path = %path.display(), ?origin, "loaded settings file");
            layers.push(value);
            sources.push(SettingsSource {
                origin,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(value) = env_layer(&self.env) {
            layers.push(value);
            sources.push(SettingsSource {
                origin: SettingsOrigin::Env,
                path: None,
                digest: None,
            });
        }

        if let Some(overrides) = &self.overrides {
            layers.push(overrides.clone());
            sources.push(SettingsSource {
                origin: SettingsOrigin::Overrides,
                path: None,
                digest: None,
            });
        }

        Ok(Settings {
            value: merge_layers(layers),
            sources,
        })
    }
}

impl Settings {
    /// Get a value by dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.value;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Check the `[artifacts]` table and convert it to typed form
    pub fn recorder_config(&self) -> RecordResult<RecorderConfig> {
        let table = match self.get("artifacts") {
            None | Some(Value::Null) => return Ok(RecorderConfig::default()),
            Some(Value::Object(table)) => table,
            Some(other) => {
                return Err(RecordError::validation(format!(
                    "artifacts settings must be a table, found {}",
                    other
                )))
            }
        };
        let field = |name: &str| table_field(table, name);

        let base_path = match field("base_path") {
            Value::Null => None,
            Value::String(path) => Some(PathBuf::from(path)),
            other => {
                return Err(RecordError::validation(format!(
                    "artifacts.base_path must be a string, found {}",
                    other
                )))
            }
        };

        let exclude_patterns = patterns_from_value(field("exclude_patterns"))?;
        PatternFilter::new(&exclude_patterns)?;

        let hash_algorithms = match field("hash_algorithms") {
            Value::Null => RecorderConfig::default().hash_algorithms,
            value => parse_algorithms(&string_list(value, "artifacts.hash_algorithms")?)?,
        };

        let follow_symlink_dirs = match field("follow_symlink_dirs") {
            Value::Null => false,
            Value::Bool(follow) => *follow,
            other => {
                return Err(RecordError::validation(format!(
                    "artifacts.follow_symlink_dirs must be a boolean, found {}",
                    other
                )))
            }
        };

        let lstrip_paths = string_list(field("lstrip_paths"), "artifacts.lstrip_paths")?;

        Ok(RecorderConfig {
            base_path,
            exclude_patterns,
            hash_algorithms,
            follow_symlink_dirs,
            lstrip_paths,
        })
    }
}

fn table_field<'a>(table: &'a serde_json::Map<String, Value>, name: &str) -> &'a Value {
    static NULL: Value = Value::Null;
    table.get(name).unwrap_or(&NULL)
}

/// Location of the user settings file
pub fn user_settings_path(env: &BTreeMap<String, String>) -> Option<PathBuf> {
    let config_home = match env.get("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(env.get("HOME").filter(|v| !v.is_empty())?).join(".config"),
    };
    Some(config_home.join("steplink").join("settings.toml"))
}

/// Settings contributed by `STEPLINK_ARTIFACT_*` variables, if any are set
fn env_layer(env: &BTreeMap<String, String>) -> Option<Value> {
    let mut artifacts = serde_json::Map::new();

    if let Some(base_path) = env.get(ENV_BASE_PATH) {
        artifacts.insert("base_path".to_string(), json!(base_path));
    }
    if let Some(patterns) = env.get(ENV_EXCLUDE_PATTERNS) {
        artifacts.insert("exclude_patterns".to_string(), json!(split_colon_list(patterns)));
    }
    if let Some(prefixes) = env.get(ENV_LSTRIP_PATHS) {
        artifacts.insert("lstrip_paths".to_string(), json!(split_colon_list(prefixes)));
    }

    (!artifacts.is_empty()).then(|| json!({ "artifacts": artifacts }))
}

fn split_colon_list(value: &str) -> Vec<&str> {
    value.split(':').filter(|item| !item.is_empty()).collect()
}

fn string_list(value: &Value, name: &str) -> RecordResult<Vec<String>> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(RecordError::validation(format!(
                "{} must be a list of strings, found {}",
                name, other
            )))
        }
    };
    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                RecordError::validation(format!("{} must contain strings, found {}", name, item))
            })
        })
        .collect()
}

/// Load and parse a TOML file, returning the value and digest
fn load_toml_file(path: &Path) -> RecordResult<(Value, String)> {
    let bytes = fs::read(path).map_err(|e| RecordError::io(path, e))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());

    let contents = String::from_utf8(bytes).map_err(|e| {
        RecordError::validation(format!("{}: invalid UTF-8: {}", path.display(), e))
    })?;
    let toml_value: toml::Value = toml::from_str(&contents).map_err(|e| {
        RecordError::validation(format!("{}: TOML parse error: {}", path.display(), e))
    })?;

    Ok((toml_to_json(toml_value), digest))
}

fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}
