//! Plugin Manifest Schema
//!
//! Parses `plugin.yaml` documents and validates them against the manifest
//! contract: required fields, the id pattern, semver version, matching kind,
//! and the supported `api_version`. Validation reports every violation with
//! the offending field named, not just the first.

use crate::manifest::semver::{Version, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Manifests above this size are rejected outright.
pub const MAX_MANIFEST_BYTES: usize = 100 * 1024;

/// Supported manifest contract version.
pub const SUPPORTED_API_VERSION: &str = "1.0";

fn id_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"^plugin-(source|processing|detection|search|display)-[a-z0-9-]+$")
            .expect("id pattern is valid")
    })
}

/// Functional category of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Source,
    Processing,
    Detection,
    Search,
    Display,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Source => "source",
            PluginKind::Processing => "processing",
            PluginKind::Detection => "detection",
            PluginKind::Search => "search",
            PluginKind::Display => "display",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entrypoint descriptor. Interpretation is the loader's concern: this
/// runtime resolves it against the compiled-in factory registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entrypoint {
    pub module: String,
    pub class: String,
}

impl Entrypoint {
    /// Canonical `module::class` key used by the factory registry.
    pub fn key(&self) -> String {
        format!("{}::{}", self.module, self.class)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ManifestDependencies {
    /// Constraint on the core runtime version
    pub core_version: Option<String>,
    /// Other plugins this one needs: id -> version constraint
    pub plugins: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ManifestConfig {
    /// Per-plugin config file, resolved relative to the manifest directory
    pub file: Option<String>,
    pub required_keys: Vec<String>,
    pub defaults: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ManifestResources {
    pub memory_mb: Option<u64>,
    pub cpu_cores: Option<f64>,
    pub disk_mb: Option<u64>,
    pub network: Option<bool>,
}

/// Lifecycle hook scripts, resolved relative to the manifest directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ManifestHooks {
    pub enable: Option<String>,
    pub disable: Option<String>,
    pub reload: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ManifestHealth {
    pub endpoint: Option<String>,
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
}

/// A parsed, validated plugin manifest. Immutable per load; a hot reload
/// replaces the whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub kind: PluginKind,
    pub api_version: String,
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Entrypoint>,

    #[serde(default)]
    pub dependencies: ManifestDependencies,
    #[serde(default)]
    pub config: ManifestConfig,
    #[serde(default)]
    pub resources: ManifestResources,
    #[serde(default)]
    pub hooks: ManifestHooks,
    #[serde(default)]
    pub health: ManifestHealth,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<String>,

    /// Detection weight hint (0.0-1.0); operators may override it later
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Processing priority hint; lower runs earlier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// One named-field violation found while validating a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub field: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Manifest parsing/validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest exceeds {MAX_MANIFEST_BYTES} bytes ({size} bytes)")]
    TooLarge { size: usize },

    #[error("manifest is not valid UTF-8")]
    NotUtf8,

    #[error("manifest is not valid YAML: {cause}")]
    Yaml { cause: String },

    #[error("manifest failed schema validation: {}", format_violations(.violations))]
    Schema { violations: Vec<SchemaViolation> },

    #[error("failed to read manifest '{path}': {cause}")]
    Io { path: String, cause: String },
}

fn format_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl PluginManifest {
    /// Parse and validate a manifest from raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        if bytes.len() > MAX_MANIFEST_BYTES {
            return Err(ManifestError::TooLarge { size: bytes.len() });
        }
        let text = std::str::from_utf8(bytes).map_err(|_| ManifestError::NotUtf8)?;
        Self::parse_str(text)
    }

    /// Parse and validate a manifest from a YAML string.
    pub fn parse_str(text: &str) -> Result<Self, ManifestError> {
        let manifest: PluginManifest =
            serde_yaml::from_str(text).map_err(|e| ManifestError::Yaml {
                cause: e.to_string(),
            })?;

        let violations = manifest.validate();
        if !violations.is_empty() {
            return Err(ManifestError::Schema { violations });
        }
        Ok(manifest)
    }

    /// Read, parse and validate a manifest file.
    pub fn load(path: &std::path::Path) -> Result<Self, ManifestError> {
        let bytes = std::fs::read(path).map_err(|e| ManifestError::Io {
            path: path.display().to_string(),
            cause: e.to_string(),
        })?;
        Self::parse(&bytes)
    }

    /// Re-emit the manifest as YAML. `parse(emit(m)) == m`.
    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).expect("manifest serialization cannot fail")
    }

    /// Validate field contents; serde has already checked shape and types.
    pub fn validate(&self) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();

        if !id_pattern().is_match(&self.id) {
            violations.push(SchemaViolation {
                field: "id".to_string(),
                message: format!(
                    "'{}' does not match plugin-(source|processing|detection|search|display)-<slug>",
                    self.id
                ),
            });
        } else {
            // The kind embedded in the id must agree with the kind field
            let id_kind = self.id.split('-').nth(1).unwrap_or_default();
            if id_kind != self.kind.as_str() {
                violations.push(SchemaViolation {
                    field: "kind".to_string(),
                    message: format!(
                        "id declares kind '{}' but kind field is '{}'",
                        id_kind, self.kind
                    ),
                });
            }
        }

        if self.name.trim().is_empty() {
            violations.push(SchemaViolation {
                field: "name".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if let Err(e) = Version::parse(&self.version) {
            violations.push(SchemaViolation {
                field: "version".to_string(),
                message: e.to_string(),
            });
        }

        if self.api_version != SUPPORTED_API_VERSION {
            violations.push(SchemaViolation {
                field: "api_version".to_string(),
                message: format!(
                    "'{}' is not supported; this runtime speaks '{}'",
                    self.api_version, SUPPORTED_API_VERSION
                ),
            });
        }

        if self.description.trim().is_empty() {
            violations.push(SchemaViolation {
                field: "description".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if let Some(core_constraint) = &self.dependencies.core_version {
            if let Err(e) = VersionConstraint::parse(core_constraint) {
                violations.push(SchemaViolation {
                    field: "dependencies.core_version".to_string(),
                    message: e.to_string(),
                });
            }
        }

        for (dep_id, constraint) in &self.dependencies.plugins {
            if let Err(e) = VersionConstraint::parse(constraint) {
                violations.push(SchemaViolation {
                    field: format!("dependencies.plugins.{}", dep_id),
                    message: e.to_string(),
                });
            }
        }

        if let Some(weight) = self.weight {
            if !(0.0..=1.0).contains(&weight) {
                violations.push(SchemaViolation {
                    field: "weight".to_string(),
                    message: format!("{} is outside [0.0, 1.0]", weight),
                });
            }
        }

        violations
    }

    /// Parsed semver of the `version` field. Only call on validated manifests.
    pub fn semver(&self) -> Version {
        Version::parse(&self.version).expect("validated manifest carries a parseable version")
    }
}
