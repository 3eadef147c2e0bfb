//! Plugin Configuration Binding
//!
//! Builds the merged settings a plugin sees at configure time. Precedence,
//! highest first: `PLUGIN_<UPPER_SNAKE_ID>_<KEY>` environment variables, the
//! per-plugin config file named by the manifest, the manifest's defaults.
//! `${ENV_VAR}` placeholders in string values are resolved from the
//! environment so secrets never live in files. The merged value is checked
//! against the manifest's required keys.
//!
//! Settings are captured by value: a plugin keeps the snapshot it was bound
//! with until it is reloaded.

use crate::manifest::PluginManifest;
use crate::plugin::error::{PluginError, PluginResult};
use std::collections::BTreeMap;
use std::path::Path;

/// Immutable merged configuration for one plugin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginSettings {
    values: BTreeMap<String, serde_json::Value>,
}

impl PluginSettings {
    pub fn from_values(values: BTreeMap<String, serde_json::Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(|v| v.as_bool())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Environment prefix for a plugin id: dashes become underscores, uppercased.
pub fn env_prefix(plugin_id: &str) -> String {
    format!("PLUGIN_{}_", plugin_id.to_uppercase().replace('-', "_"))
}

/// Bind the merged settings for a plugin.
///
/// `manifest_dir` anchors the per-plugin config file; `env` is the process
/// environment (injected for testability).
pub fn bind_settings(
    manifest: &PluginManifest,
    manifest_dir: Option<&Path>,
    env: &BTreeMap<String, String>,
) -> PluginResult<PluginSettings> {
    let plugin_id = &manifest.id;
    let mut values: BTreeMap<String, serde_json::Value> = BTreeMap::new();

    // Lowest precedence: manifest defaults
    for (key, value) in &manifest.config.defaults {
        values.insert(key.clone(), yaml_to_json(plugin_id, key, value)?);
    }

    // Middle precedence: the config file referenced by the manifest
    if let Some(file) = &manifest.config.file {
        let dir = manifest_dir.ok_or_else(|| PluginError::ConfigError {
            plugin_id: plugin_id.clone(),
            cause: format!("config file '{}' declared but manifest has no directory", file),
        })?;
        let path = dir.join(file);
        let raw = std::fs::read_to_string(&path).map_err(|e| PluginError::ConfigError {
            plugin_id: plugin_id.clone(),
            cause: format!("cannot read config file '{}': {}", path.display(), e),
        })?;
        let parsed: BTreeMap<String, serde_yaml::Value> =
            serde_yaml::from_str(&raw).map_err(|e| PluginError::ConfigError {
                plugin_id: plugin_id.clone(),
                cause: format!("config file '{}' is not a YAML mapping: {}", path.display(), e),
            })?;
        for (key, value) in &parsed {
            values.insert(key.clone(), yaml_to_json(plugin_id, key, value)?);
        }
    }

    // Highest precedence: environment overrides
    let prefix = env_prefix(plugin_id);
    for (name, value) in env {
        if let Some(key) = name.strip_prefix(&prefix) {
            if key.is_empty() {
                continue;
            }
            values.insert(key.to_lowercase(), cast_env_value(value));
        }
    }

    // Resolve ${ENV_VAR} secret references in string values
    for (key, value) in values.iter_mut() {
        if let serde_json::Value::String(s) = value {
            if let Some(var) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                let resolved = env.get(var).ok_or_else(|| PluginError::ConfigError {
                    plugin_id: plugin_id.clone(),
                    cause: format!(
                        "key '{}' references environment variable '{}' which is not set",
                        key, var
                    ),
                })?;
                *value = serde_json::Value::String(resolved.clone());
            }
        }
    }

    // Required keys must survive the merge
    for required in &manifest.config.required_keys {
        if !values.contains_key(required) {
            return Err(PluginError::ConfigError {
                plugin_id: plugin_id.clone(),
                cause: format!("required config key '{}' is missing", required),
            });
        }
    }

    Ok(PluginSettings::from_values(values))
}

fn yaml_to_json(
    plugin_id: &str,
    key: &str,
    value: &serde_yaml::Value,
) -> PluginResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| PluginError::ConfigError {
        plugin_id: plugin_id.to_string(),
        cause: format!("config key '{}' is not representable: {}", key, e),
    })
}

/// Environment values arrive as strings; cast the obvious scalar types.
fn cast_env_value(value: &str) -> serde_json::Value {
    match value {
        "true" | "True" => return serde_json::Value::Bool(true),
        "false" | "False" => return serde_json::Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = value.parse::<i64>() {
        return serde_json::Value::Number(n.into());
    }
    if let Ok(f) = value.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return serde_json::Value::Number(n);
        }
    }
    serde_json::Value::String(value.to_string())
}
