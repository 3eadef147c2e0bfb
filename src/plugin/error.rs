//! Plugin Error Handling
//!
//! Error types for plugin operations: manifest registration, dependency
//! resolution, loading, lifecycle transitions, and runtime failures.

use std::fmt;

/// Result type alias for plugin operations
pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Error types for plugin system operations
#[derive(Debug, Clone, PartialEq)]
pub enum PluginError {
    /// Plugin not found in registry
    PluginNotFound { plugin_id: String },

    /// Plugin id already present in the registry
    AlreadyRegistered { plugin_id: String },

    /// Manifest failed validation or could not be read
    ManifestInvalid { path: String, cause: String },

    /// Plugin API or core version incompatible with this runtime
    VersionIncompatible { message: String },

    /// Declared dependency absent from the loaded set
    MissingDependency {
        dependent: String,
        dependency: String,
    },

    /// Dependency loaded, but its version violates the declared constraint
    VersionIncompatibility {
        dependent: String,
        dependency: String,
        required: String,
        actual: String,
    },

    /// Circular dependency between plugins
    CyclicDependency { path: Vec<String> },

    /// Entrypoint could not be resolved or the instance failed to construct
    LoadError { plugin_id: String, cause: String },

    /// Configuration binding or validation failed
    ConfigError { plugin_id: String, cause: String },

    /// Lifecycle hook script failed or timed out
    HookFailed {
        plugin_id: String,
        hook: String,
        cause: String,
    },

    /// Operation not allowed in the plugin's current state
    InvalidState {
        plugin_id: String,
        expected: String,
        actual: String,
    },

    /// Plugin raised during processing or scoring
    ExecutionError {
        plugin_id: String,
        operation: String,
        cause: String,
    },

    /// Generic plugin error
    Generic { message: String },
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginError::PluginNotFound { plugin_id } => {
                write!(f, "Plugin not found: {}", plugin_id)
            }
            PluginError::AlreadyRegistered { plugin_id } => {
                write!(f, "Plugin '{}' is already registered", plugin_id)
            }
            PluginError::ManifestInvalid { path, cause } => {
                write!(f, "Invalid manifest at '{}': {}", path, cause)
            }
            PluginError::VersionIncompatible { message } => {
                write!(f, "Version incompatible: {}", message)
            }
            PluginError::MissingDependency {
                dependent,
                dependency,
            } => {
                write!(
                    f,
                    "Plugin '{}' has missing dependency: {}",
                    dependent, dependency
                )
            }
            PluginError::VersionIncompatibility {
                dependent,
                dependency,
                required,
                actual,
            } => {
                write!(
                    f,
                    "Plugin '{}' requires '{}' version '{}', but found version '{}'",
                    dependent, dependency, required, actual
                )
            }
            PluginError::CyclicDependency { path } => {
                let mut cycle = path.clone();
                if let Some(first) = path.first() {
                    cycle.push(first.clone());
                }
                write!(f, "Cyclic dependency detected: {}", cycle.join(" -> "))
            }
            PluginError::LoadError { plugin_id, cause } => {
                write!(f, "Failed to load plugin '{}': {}", plugin_id, cause)
            }
            PluginError::ConfigError { plugin_id, cause } => {
                write!(f, "Configuration error for plugin '{}': {}", plugin_id, cause)
            }
            PluginError::HookFailed {
                plugin_id,
                hook,
                cause,
            } => {
                write!(
                    f,
                    "Hook '{}' failed for plugin '{}': {}",
                    hook, plugin_id, cause
                )
            }
            PluginError::InvalidState {
                plugin_id,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Plugin '{}' is in state '{}', expected '{}'",
                    plugin_id, actual, expected
                )
            }
            PluginError::ExecutionError {
                plugin_id,
                operation,
                cause,
            } => {
                write!(
                    f,
                    "Plugin '{}' failed during '{}': {}",
                    plugin_id, operation, cause
                )
            }
            PluginError::Generic { message } => {
                write!(f, "Plugin error: {}", message)
            }
        }
    }
}

impl std::error::Error for PluginError {}

impl crate::core::error_handling::ContextualError for PluginError {
    fn is_user_actionable(&self) -> bool {
        self.user_message().is_some()
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            PluginError::ManifestInvalid { .. } => {
                Some("Plugin manifest is invalid. Fix the manifest file and reload.")
            }
            PluginError::MissingDependency { .. } | PluginError::VersionIncompatibility { .. } => {
                Some("Plugin dependencies are not satisfied. Check the installed plugin set.")
            }
            PluginError::CyclicDependency { .. } => {
                Some("Plugins declare a circular dependency. Break the cycle in their manifests.")
            }
            PluginError::ConfigError { .. } => {
                Some("Plugin configuration is invalid. Check its config file and environment overrides.")
            }
            PluginError::VersionIncompatible { .. } => {
                Some("Plugin requires a different core version. Update the plugin or the runtime.")
            }
            _ => None,
        }
    }
}

/// Stable machine-readable code for the HTTP surface.
impl PluginError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            PluginError::PluginNotFound { .. } => "plugin_not_found",
            PluginError::AlreadyRegistered { .. } => "already_registered",
            PluginError::ManifestInvalid { .. } => "manifest_invalid",
            PluginError::VersionIncompatible { .. } => "version_incompatible",
            PluginError::MissingDependency { .. } => "missing_dependency",
            PluginError::VersionIncompatibility { .. } => "version_incompatibility",
            PluginError::CyclicDependency { .. } => "cyclic_dependency",
            PluginError::LoadError { .. } => "load_error",
            PluginError::ConfigError { .. } => "config_error",
            PluginError::HookFailed { .. } => "hook_failed",
            PluginError::InvalidState { .. } => "invalid_state",
            PluginError::ExecutionError { .. } => "execution_error",
            PluginError::Generic { .. } => "plugin_error",
        }
    }
}
