//! Entrypoint Factory Registry
//!
//! Manifests name their implementation through an entrypoint descriptor
//! (`module` + `class`). This runtime has no dynamic code loading: every
//! plugin implementation is compiled into the binary and the descriptor
//! selects among registered factory functions. Hot reload re-runs the
//! factory to obtain a fresh instance.

use crate::manifest::Entrypoint;
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::traits::PluginInstance;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a fresh plugin instance. Factories may capture state (e.g. test
/// side channels), so they are boxed closures rather than fn pointers.
pub type PluginFactory = Arc<dyn Fn() -> PluginInstance + Send + Sync>;

/// Registry of compiled-in plugin factories keyed by `module::class`.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in plugin factories.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::plugin::builtin::register_builtin_factories(&mut registry);
        registry
    }

    /// Register a factory under an entrypoint key. Later registrations for
    /// the same key replace earlier ones, which is what a reload of a
    /// recompiled plugin set wants.
    pub fn register<F>(&mut self, module: &str, class: &str, factory: F)
    where
        F: Fn() -> PluginInstance + Send + Sync + 'static,
    {
        self.factories
            .insert(format!("{}::{}", module, class), Arc::new(factory));
    }

    /// Resolve an entrypoint descriptor to its factory.
    pub fn resolve(&self, plugin_id: &str, entrypoint: &Entrypoint) -> PluginResult<PluginFactory> {
        // Distinguish "module not found" from "class not found" so load
        // errors point at the right half of the descriptor.
        let key = entrypoint.key();
        if let Some(factory) = self.factories.get(&key) {
            return Ok(Arc::clone(factory));
        }

        let module_prefix = format!("{}::", entrypoint.module);
        let module_known = self.factories.keys().any(|k| k.starts_with(&module_prefix));
        let cause = if module_known {
            format!(
                "module '{}' has no class '{}'",
                entrypoint.module, entrypoint.class
            )
        } else {
            format!("module '{}' is not compiled into this binary", entrypoint.module)
        };

        Err(PluginError::LoadError {
            plugin_id: plugin_id.to_string(),
            cause,
        })
    }

    /// Build an instance for the entrypoint.
    pub fn instantiate(
        &self,
        plugin_id: &str,
        entrypoint: &Entrypoint,
    ) -> PluginResult<PluginInstance> {
        let factory = self.resolve(plugin_id, entrypoint)?;
        Ok(factory())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
