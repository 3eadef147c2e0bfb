//! Plugin Manager
//!
//! Single authority for plugin lifecycle: discovery, batch loading with
//! dependency ordering, configuration binding, enable/disable with hook
//! scripts, hot reload, and unregistration. Owns the registry; every other
//! component only reads it.
//!
//! A single plugin's failure never aborts a batch. Load failures are
//! accumulated and returned; dependency failures demote exactly the plugins
//! whose edges do not resolve, cascading to dependents.

use crate::manifest::{PluginManifest, VersionConstraint};
use crate::notifications::api::{AsyncNotificationManager, Event, PluginEvent, PluginEventType};
use crate::plugin::discovery::{self, DiscoveredPlugin, DiscoveryReport};
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::factory::FactoryRegistry;
use crate::plugin::graph::DependencyGraph;
use crate::plugin::registry::{PluginDescriptor, PluginRecord, SharedPluginRegistry};
use crate::plugin::settings::bind_settings;
use crate::plugin::types::PluginState;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Timeouts governing lifecycle operations.
#[derive(Clone, Debug)]
pub struct PluginManagerConfig {
    /// Bound on `shutdown()` of the old instance during reload/unregister
    pub shutdown_deadline: Duration,
    /// Hard timeout for lifecycle hook scripts
    pub hook_timeout: Duration,
}

impl Default for PluginManagerConfig {
    fn default() -> Self {
        Self {
            shutdown_deadline: Duration::from_secs(5),
            hook_timeout: Duration::from_secs(60),
        }
    }
}

/// One failed manifest in a load batch.
#[derive(Debug)]
pub struct LoadFailure {
    pub manifest_path: Option<PathBuf>,
    pub plugin_id: Option<String>,
    pub error: PluginError,
}

/// Outcome of a load batch: which plugins made it, which did not and why.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<LoadFailure>,
}

/// Central plugin manager; constructed once at startup.
pub struct PluginManager {
    registry: SharedPluginRegistry,
    factories: FactoryRegistry,
    api_version: u32,
    config: PluginManagerConfig,
    notifications: Option<Arc<Mutex<AsyncNotificationManager>>>,
}

impl PluginManager {
    /// Create a new plugin manager with default configuration and the
    /// built-in factories registered.
    pub fn new(api_version: u32) -> Self {
        Self::with_config(api_version, PluginManagerConfig::default())
    }

    pub fn with_config(api_version: u32, config: PluginManagerConfig) -> Self {
        Self {
            registry: SharedPluginRegistry::new(),
            factories: FactoryRegistry::with_builtins(),
            api_version,
            config,
            notifications: None,
        }
    }

    /// Attach the lifecycle notification bus.
    pub fn with_notifications(mut self, bus: Arc<Mutex<AsyncNotificationManager>>) -> Self {
        self.notifications = Some(bus);
        self
    }

    pub fn registry(&self) -> &SharedPluginRegistry {
        &self.registry
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// Factory registry, for registering additional compiled-in plugins.
    pub fn factories_mut(&mut self) -> &mut FactoryRegistry {
        &mut self.factories
    }

    async fn publish_event(&self, event_type: PluginEventType, plugin_id: &str, message: Option<String>) {
        if let Some(bus) = &self.notifications {
            let event = match message {
                Some(message) => {
                    PluginEvent::with_message(event_type, plugin_id.to_string(), message)
                }
                None => PluginEvent::new(event_type, plugin_id.to_string()),
            };
            let _ = bus.lock().await.publish(Event::Plugin(event)).await;
        }
    }

    /// Discover manifests under `root`. Schema failures are logged inside
    /// discovery and reported here; valid manifests are returned for loading.
    pub fn discover(&self, root: &Path) -> DiscoveryReport {
        discovery::discover(root)
    }

    /// Discover and load every plugin under `root`.
    pub async fn load_from_directory(&mut self, root: &Path) -> LoadReport {
        let discovery = self.discover(root);
        let mut report = self.load_discovered(discovery.plugins).await;
        for (path, error) in discovery.failures {
            report.failed.push(LoadFailure {
                manifest_path: Some(path.clone()),
                plugin_id: None,
                error: PluginError::ManifestInvalid {
                    path: path.display().to_string(),
                    cause: error.to_string(),
                },
            });
        }
        report
    }

    /// Load a batch of discovered manifests: register and instantiate each,
    /// then resolve the dependency graph, then configure in topological
    /// order.
    pub async fn load_discovered(&mut self, discovered: Vec<DiscoveredPlugin>) -> LoadReport {
        let manifests: Vec<(Option<PathBuf>, PluginManifest)> = discovered
            .into_iter()
            .map(|d| (Some(d.manifest_path), d.manifest))
            .collect();
        self.load_manifests(manifests).await
    }

    /// Register a single manifest programmatically (control-plane register).
    pub async fn register_manifest(
        &mut self,
        manifest: PluginManifest,
        manifest_path: Option<PathBuf>,
    ) -> PluginResult<PluginDescriptor> {
        let plugin_id = manifest.id.clone();
        let report = self.load_manifests(vec![(manifest_path, manifest)]).await;
        if let Some(failure) = report.failed.into_iter().next() {
            return Err(failure.error);
        }
        self.registry
            .descriptor(&plugin_id)
            .await
            .ok_or(PluginError::PluginNotFound { plugin_id })
    }

    async fn load_manifests(
        &mut self,
        manifests: Vec<(Option<PathBuf>, PluginManifest)>,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        let mut pending: Vec<String> = Vec::new();

        // Phase 1: validate runtime compatibility, instantiate, register
        for (manifest_path, manifest) in manifests {
            let plugin_id = manifest.id.clone();
            match self.register_one(manifest, manifest_path.clone()).await {
                Ok(()) => pending.push(plugin_id),
                Err(error) => {
                    log::error!("Failed to register plugin '{}': {}", plugin_id, error);
                    report.failed.push(LoadFailure {
                        manifest_path,
                        plugin_id: Some(plugin_id),
                        error,
                    });
                }
            }
        }

        // Phase 2: resolve the dependency graph over the whole registry,
        // demoting plugins whose edges do not hold. Removing a plugin can
        // orphan its dependents, so iterate to a fixed point.
        let demoted = self.resolve_dependencies().await;
        for (plugin_id, manifest_path, error) in demoted {
            pending.retain(|id| *id != plugin_id);
            report.failed.push(LoadFailure {
                manifest_path,
                plugin_id: Some(plugin_id),
                error,
            });
        }

        // Phase 3: configure surviving new plugins in dependency order
        let order = {
            let registry = self.registry.inner().read().await;
            let (graph, _) = Self::graph_of(&registry);
            graph.topo_order().unwrap_or_else(|_| registry.ids())
        };

        for plugin_id in order {
            if !pending.contains(&plugin_id) {
                continue;
            }
            match self.configure_plugin(&plugin_id).await {
                Ok(()) => {
                    report.loaded.push(plugin_id.clone());
                    self.publish_event(PluginEventType::Registered, &plugin_id, None)
                        .await;
                }
                Err(error) => {
                    log::error!("Failed to configure plugin '{}': {}", plugin_id, error);
                    let manifest_path = {
                        let registry = self.registry.inner().read().await;
                        registry.get(&plugin_id).and_then(|r| r.manifest_path.clone())
                    };
                    {
                        let mut registry = self.registry.inner().write().await;
                        let _ = registry.mark_failed(&plugin_id, error.to_string());
                    }
                    self.publish_event(
                        PluginEventType::Failed,
                        &plugin_id,
                        Some(error.to_string()),
                    )
                    .await;
                    report.failed.push(LoadFailure {
                        manifest_path,
                        plugin_id: Some(plugin_id),
                        error,
                    });
                }
            }
        }

        log::info!(
            "Plugin loading complete: {} loaded, {} failed",
            report.loaded.len(),
            report.failed.len()
        );
        report
    }

    async fn register_one(
        &mut self,
        manifest: PluginManifest,
        manifest_path: Option<PathBuf>,
    ) -> PluginResult<()> {
        let plugin_id = manifest.id.clone();

        self.check_core_version(&manifest)?;

        let entrypoint = manifest
            .entrypoint
            .clone()
            .ok_or_else(|| PluginError::LoadError {
                plugin_id: plugin_id.clone(),
                cause: "manifest declares no entrypoint".to_string(),
            })?;
        let instance = self.factories.instantiate(&plugin_id, &entrypoint)?;

        if instance.kind() != manifest.kind {
            return Err(PluginError::LoadError {
                plugin_id: plugin_id.clone(),
                cause: format!(
                    "entrypoint resolved to a {} plugin but manifest declares kind {}",
                    instance.kind(),
                    manifest.kind
                ),
            });
        }

        let record = PluginRecord::new(manifest, manifest_path, instance);
        let mut registry = self.registry.inner().write().await;
        registry.register(record)
    }

    fn check_core_version(&self, manifest: &PluginManifest) -> PluginResult<()> {
        if let Some(constraint_str) = &manifest.dependencies.core_version {
            // Manifest validation guarantees the constraint parses
            let constraint =
                VersionConstraint::parse(constraint_str).map_err(|e| PluginError::Generic {
                    message: e.to_string(),
                })?;
            let core = crate::manifest::Version::parse(crate::core::version::core_version())
                .map_err(|e| PluginError::Generic {
                    message: e.to_string(),
                })?;
            if !constraint.satisfies(&core) {
                return Err(PluginError::VersionIncompatible {
                    message: format!(
                        "plugin '{}' requires core '{}', this runtime is {}",
                        manifest.id,
                        constraint_str,
                        crate::core::version::core_version()
                    ),
                });
            }
        }
        Ok(())
    }

    fn graph_of(
        registry: &crate::plugin::registry::PluginRegistry,
    ) -> (DependencyGraph, Vec<(String, PluginError)>) {
        let mut graph = DependencyGraph::new();
        let mut errors = Vec::new();
        for record in registry.records() {
            let deps: BTreeMap<String, String> = record
                .manifest
                .dependencies
                .plugins
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if let Err(e) = graph.add_plugin(record.id(), &record.manifest.version, &deps) {
                errors.push((record.id().to_string(), e.into()));
            }
        }
        (graph, errors)
    }

    /// Rebuild the dependency graph and remove every plugin whose edges do
    /// not resolve, until the remaining set is consistent. Returns the
    /// demoted plugins with their reasons.
    async fn resolve_dependencies(&mut self) -> Vec<(String, Option<PathBuf>, PluginError)> {
        let mut demoted = Vec::new();

        loop {
            let mut to_remove: Vec<(String, PluginError)> = Vec::new();
            {
                let registry = self.registry.inner().read().await;
                let (graph, add_errors) = Self::graph_of(&registry);
                to_remove.extend(add_errors);

                if let Some(cycle) = graph.find_shortest_cycle() {
                    for plugin_id in &cycle {
                        to_remove.push((
                            plugin_id.clone(),
                            PluginError::CyclicDependency { path: cycle.clone() },
                        ));
                    }
                } else {
                    for (plugin_id, error) in graph.node_violations() {
                        to_remove.push((plugin_id, error.into()));
                    }
                }
            }

            if to_remove.is_empty() {
                return demoted;
            }

            let mut registry = self.registry.inner().write().await;
            for (plugin_id, error) in to_remove {
                if let Ok(record) = registry.remove(&plugin_id) {
                    log::error!(
                        "Demoting plugin '{}' after dependency validation: {}",
                        plugin_id,
                        error
                    );
                    demoted.push((plugin_id, record.manifest_path.clone(), error));
                }
            }
        }
    }

    /// Bind settings and run the instance's configure hook.
    async fn configure_plugin(&self, plugin_id: &str) -> PluginResult<()> {
        let (manifest, manifest_dir, instance) = {
            let registry = self.registry.inner().read().await;
            let record = registry.get(plugin_id).ok_or_else(|| PluginError::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })?;
            (
                record.manifest.clone(),
                record
                    .manifest_path
                    .as_ref()
                    .and_then(|p| p.parent().map(|d| d.to_path_buf())),
                Arc::clone(&record.instance),
            )
        };

        let env: BTreeMap<String, String> = std::env::vars().collect();
        let settings = bind_settings(&manifest, manifest_dir.as_deref(), &env)?;
        instance.as_plugin().configure(&settings).await?;

        let mut registry = self.registry.inner().write().await;
        registry.set_state(plugin_id, PluginState::Configured)
    }

    /// Enable a plugin: run its enable hook, then flip the state. Only
    /// `Enabled` plugins participate in processing.
    pub async fn enable(&self, plugin_id: &str) -> PluginResult<PluginDescriptor> {
        self.check_state(plugin_id, &[PluginState::Configured, PluginState::Disabled])
            .await?;

        if let Err(error) = self.run_hook(plugin_id, "enable").await {
            let mut registry = self.registry.inner().write().await;
            let _ = registry.mark_failed(plugin_id, error.to_string());
            drop(registry);
            self.publish_event(PluginEventType::Failed, plugin_id, Some(error.to_string()))
                .await;
            return Err(error);
        }

        {
            let mut registry = self.registry.inner().write().await;
            registry.set_state(plugin_id, PluginState::Enabled)?;
        }
        self.publish_event(PluginEventType::Enabled, plugin_id, None).await;
        self.descriptor(plugin_id).await
    }

    /// Disable a plugin: run its disable hook, then flip the state.
    pub async fn disable(&self, plugin_id: &str) -> PluginResult<PluginDescriptor> {
        self.check_state(plugin_id, &[PluginState::Enabled]).await?;

        if let Err(error) = self.run_hook(plugin_id, "disable").await {
            let mut registry = self.registry.inner().write().await;
            let _ = registry.mark_failed(plugin_id, error.to_string());
            drop(registry);
            self.publish_event(PluginEventType::Failed, plugin_id, Some(error.to_string()))
                .await;
            return Err(error);
        }

        {
            let mut registry = self.registry.inner().write().await;
            registry.set_state(plugin_id, PluginState::Disabled)?;
        }
        self.publish_event(PluginEventType::Disabled, plugin_id, None).await;
        self.descriptor(plugin_id).await
    }

    /// Hot reload: the old instance serves until the new one is ready; any
    /// failure leaves the old instance registered and untouched.
    pub async fn reload(&mut self, plugin_id: &str) -> PluginResult<PluginDescriptor> {
        let (old_instance, manifest_path, old_state) = {
            let registry = self.registry.inner().read().await;
            let record = registry.get(plugin_id).ok_or_else(|| PluginError::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })?;
            let manifest_path =
                record
                    .manifest_path
                    .clone()
                    .ok_or_else(|| PluginError::Generic {
                        message: format!(
                            "plugin '{}' was not loaded from a manifest file, cannot reload",
                            plugin_id
                        ),
                    })?;
            (Arc::clone(&record.instance), manifest_path, record.state)
        };

        log::info!("Starting hot reload for plugin: {}", plugin_id);

        // Step 1: graceful shutdown of the old instance, bounded
        match timeout(self.config.shutdown_deadline, old_instance.as_plugin().shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                return Err(PluginError::ExecutionError {
                    plugin_id: plugin_id.to_string(),
                    operation: "shutdown".to_string(),
                    cause: error.to_string(),
                });
            }
            Err(_) => {
                return Err(PluginError::ExecutionError {
                    plugin_id: plugin_id.to_string(),
                    operation: "shutdown".to_string(),
                    cause: format!(
                        "did not complete within {:?}",
                        self.config.shutdown_deadline
                    ),
                });
            }
        }

        // Step 2: re-read the manifest
        let manifest = PluginManifest::load(&manifest_path).map_err(|e| {
            PluginError::ManifestInvalid {
                path: manifest_path.display().to_string(),
                cause: e.to_string(),
            }
        })?;
        if manifest.id != plugin_id {
            return Err(PluginError::ManifestInvalid {
                path: manifest_path.display().to_string(),
                cause: format!(
                    "manifest id changed to '{}' during reload of '{}'",
                    manifest.id, plugin_id
                ),
            });
        }
        self.check_core_version(&manifest)?;

        // Step 3: resolve the (possibly changed) entrypoint
        let entrypoint = manifest
            .entrypoint
            .clone()
            .ok_or_else(|| PluginError::LoadError {
                plugin_id: plugin_id.to_string(),
                cause: "manifest declares no entrypoint".to_string(),
            })?;

        // Step 4: instantiate the replacement
        let new_instance = self.factories.instantiate(plugin_id, &entrypoint)?;
        if new_instance.kind() != manifest.kind {
            return Err(PluginError::LoadError {
                plugin_id: plugin_id.to_string(),
                cause: format!(
                    "entrypoint resolved to a {} plugin but manifest declares kind {}",
                    new_instance.kind(),
                    manifest.kind
                ),
            });
        }

        // Reload is a full re-validation: the new manifest's dependencies
        // must resolve against the current registry, and dependents must
        // still accept the new version.
        self.validate_reload_dependencies(plugin_id, &manifest).await?;

        // Configure the new instance before it becomes visible
        let manifest_dir = manifest_path.parent().map(|d| d.to_path_buf());
        let env: BTreeMap<String, String> = std::env::vars().collect();
        let settings = bind_settings(&manifest, manifest_dir.as_deref(), &env)?;
        new_instance.as_plugin().configure(&settings).await?;

        // Step 5: atomic swap, then restore the prior lifecycle position
        {
            let mut registry = self.registry.inner().write().await;
            registry.swap_instance(plugin_id, manifest, new_instance)?;
            registry.set_state(plugin_id, PluginState::Configured)?;
            if old_state == PluginState::Enabled {
                registry.set_state(plugin_id, PluginState::Enabled)?;
            } else if old_state == PluginState::Disabled {
                // Configured -> Enabled -> Disabled is the only legal path
                registry.set_state(plugin_id, PluginState::Enabled)?;
                registry.set_state(plugin_id, PluginState::Disabled)?;
            }
        }

        if let Err(error) = self.run_hook(plugin_id, "reload").await {
            let mut registry = self.registry.inner().write().await;
            let _ = registry.mark_failed(plugin_id, error.to_string());
            drop(registry);
            self.publish_event(PluginEventType::Failed, plugin_id, Some(error.to_string()))
                .await;
            return Err(error);
        }

        log::info!("Hot reload completed successfully for {}", plugin_id);
        self.publish_event(PluginEventType::Reloaded, plugin_id, None).await;
        self.descriptor(plugin_id).await
    }

    async fn validate_reload_dependencies(
        &self,
        plugin_id: &str,
        new_manifest: &PluginManifest,
    ) -> PluginResult<()> {
        let registry = self.registry.inner().read().await;
        let mut graph = DependencyGraph::new();

        for record in registry.records() {
            let (version, deps) = if record.id() == plugin_id {
                (
                    new_manifest.version.clone(),
                    new_manifest.dependencies.plugins.clone(),
                )
            } else {
                (
                    record.manifest.version.clone(),
                    record.manifest.dependencies.plugins.clone(),
                )
            };
            let deps: BTreeMap<String, String> = deps.into_iter().collect();
            graph
                .add_plugin(record.id(), &version, &deps)
                .map_err(PluginError::from)?;
        }

        if let Some(cycle) = graph.find_shortest_cycle() {
            if cycle.iter().any(|id| id == plugin_id) {
                return Err(PluginError::CyclicDependency { path: cycle });
            }
        }

        // This plugin's own edges
        graph.validate_node(plugin_id).map_err(PluginError::from)?;
        // Dependents must still accept the new version
        for dependent in graph.dependents_of(plugin_id) {
            graph.validate_node(&dependent).map_err(PluginError::from)?;
        }

        Ok(())
    }

    /// Unregister a plugin: graceful shutdown, then removal.
    pub async fn unregister(&mut self, plugin_id: &str) -> PluginResult<PluginDescriptor> {
        let (instance, descriptor) = {
            let registry = self.registry.inner().read().await;
            let record = registry.get(plugin_id).ok_or_else(|| PluginError::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })?;
            (Arc::clone(&record.instance), record.descriptor())
        };

        if timeout(self.config.shutdown_deadline, instance.as_plugin().shutdown())
            .await
            .is_err()
        {
            log::warn!(
                "Plugin '{}' shutdown exceeded {:?} during unregister",
                plugin_id,
                self.config.shutdown_deadline
            );
        }

        {
            let mut registry = self.registry.inner().write().await;
            let record = registry.remove(plugin_id)?;
            drop(record);
        }

        let demoted = self.resolve_dependencies().await;
        for (dependent, _, error) in &demoted {
            log::warn!(
                "Plugin '{}' demoted after unregistering '{}': {}",
                dependent,
                plugin_id,
                error
            );
        }

        self.publish_event(PluginEventType::Unregistered, plugin_id, None).await;
        Ok(descriptor)
    }

    pub async fn descriptor(&self, plugin_id: &str) -> PluginResult<PluginDescriptor> {
        self.registry
            .descriptor(plugin_id)
            .await
            .ok_or_else(|| PluginError::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })
    }

    /// Operator override of a detection plugin's weight.
    pub async fn set_weight(&self, plugin_id: &str, weight: f64) -> PluginResult<()> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(PluginError::ConfigError {
                plugin_id: plugin_id.to_string(),
                cause: format!("weight {} is outside [0.0, 1.0]", weight),
            });
        }
        let mut registry = self.registry.inner().write().await;
        let record = registry
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })?;
        record.weight_override = Some(weight);
        Ok(())
    }

    /// DOT rendering of the current dependency graph.
    pub async fn export_graph_dot(&self) -> String {
        let registry = self.registry.inner().read().await;
        let (graph, _) = Self::graph_of(&registry);
        graph.export_dot()
    }

    async fn check_state(&self, plugin_id: &str, allowed: &[PluginState]) -> PluginResult<()> {
        let registry = self.registry.inner().read().await;
        let record = registry.get(plugin_id).ok_or_else(|| PluginError::PluginNotFound {
            plugin_id: plugin_id.to_string(),
        })?;
        if !allowed.contains(&record.state) {
            return Err(PluginError::InvalidState {
                plugin_id: plugin_id.to_string(),
                expected: allowed
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(" or "),
                actual: record.state.to_string(),
            });
        }
        Ok(())
    }

    /// Run the named hook script if the manifest declares one. Scripts run
    /// from the manifest directory and are killed at the hard timeout.
    async fn run_hook(&self, plugin_id: &str, hook: &str) -> PluginResult<()> {
        let (script, manifest_dir) = {
            let registry = self.registry.inner().read().await;
            let record = registry.get(plugin_id).ok_or_else(|| PluginError::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })?;
            let script = match hook {
                "enable" => record.manifest.hooks.enable.clone(),
                "disable" => record.manifest.hooks.disable.clone(),
                "reload" => record.manifest.hooks.reload.clone(),
                _ => None,
            };
            (
                script,
                record
                    .manifest_path
                    .as_ref()
                    .and_then(|p| p.parent().map(|d| d.to_path_buf())),
            )
        };

        let Some(script) = script else {
            return Ok(());
        };
        let Some(dir) = manifest_dir else {
            // Programmatically registered plugin declaring hooks: nothing to
            // run them against.
            log::warn!(
                "Plugin '{}' declares hook '{}' but has no manifest directory; skipping",
                plugin_id,
                hook
            );
            return Ok(());
        };

        let script_path = dir.join(&script);
        let mut child = tokio::process::Command::new(&script_path)
            .current_dir(&dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PluginError::HookFailed {
                plugin_id: plugin_id.to_string(),
                hook: hook.to_string(),
                cause: format!("cannot start '{}': {}", script_path.display(), e),
            })?;

        match timeout(self.config.hook_timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(PluginError::HookFailed {
                plugin_id: plugin_id.to_string(),
                hook: hook.to_string(),
                cause: format!("exited with {}", status),
            }),
            Ok(Err(e)) => Err(PluginError::HookFailed {
                plugin_id: plugin_id.to_string(),
                hook: hook.to_string(),
                cause: e.to_string(),
            }),
            Err(_) => {
                let _ = child.kill().await;
                Err(PluginError::HookFailed {
                    plugin_id: plugin_id.to_string(),
                    hook: hook.to_string(),
                    cause: format!("timed out after {:?}", self.config.hook_timeout),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PluginKind;
    use crate::model::listing::Listing;
    use crate::plugin::traits::{DetectionPlugin, Plugin, PluginInstance, ProcessingPlugin};
    use crate::plugin::types::{DetectionResult, ProcessingError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct TagProcessor {
        tag: &'static str,
        shutdowns: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Plugin for TagProcessor {
        async fn shutdown(&self) -> PluginResult<()> {
            self.shutdowns.lock().unwrap().push(format!("closed:{}", self.tag));
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl ProcessingPlugin for TagProcessor {
        fn stage_name(&self) -> &str {
            self.tag
        }

        async fn process(
            &self,
            document: serde_json::Value,
        ) -> Result<serde_json::Value, ProcessingError> {
            Ok(document)
        }
    }

    struct NullDetector;

    #[async_trait::async_trait]
    impl Plugin for NullDetector {}

    #[async_trait::async_trait]
    impl DetectionPlugin for NullDetector {
        async fn analyze(&self, _listing: &Listing) -> PluginResult<DetectionResult> {
            Ok(DetectionResult::clean())
        }
    }

    fn manifest_text(id: &str, kind: &str, version: &str, extra: &str) -> String {
        format!(
            "id: {id}\nname: Test\nversion: {version}\nkind: {kind}\napi_version: \"1.0\"\ndescription: Test plugin\nentrypoint:\n  module: test.plugins\n  class: {class}\n{extra}",
            class = if kind == "processing" { "Processor" } else { "Detector" },
        )
    }

    fn parsed(id: &str, kind: &str, version: &str, extra: &str) -> PluginManifest {
        PluginManifest::parse_str(&manifest_text(id, kind, version, extra)).unwrap()
    }

    fn manager_with_test_factories() -> (PluginManager, Arc<StdMutex<Vec<String>>>) {
        let shutdowns: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let mut manager = PluginManager::new(crate::core::version::get_api_version());
        let for_processor = shutdowns.clone();
        manager.factories_mut().register("test.plugins", "Processor", move || {
            PluginInstance::Processing(Box::new(TagProcessor {
                tag: "v1",
                shutdowns: for_processor.clone(),
            }))
        });
        manager.factories_mut().register("test.plugins", "Detector", || {
            PluginInstance::Detection(Box::new(NullDetector))
        });
        (manager, shutdowns)
    }

    async fn load_one(manager: &mut PluginManager, manifest: PluginManifest) -> LoadReport {
        manager.load_manifests(vec![(None, manifest)]).await
    }

    #[tokio::test]
    async fn test_load_and_configure() {
        let (mut manager, _) = manager_with_test_factories();
        let report = load_one(
            &mut manager,
            parsed("plugin-processing-a", "processing", "1.0.0", ""),
        )
        .await;

        assert_eq!(report.loaded, vec!["plugin-processing-a"]);
        assert!(report.failed.is_empty());

        let descriptor = manager.descriptor("plugin-processing-a").await.unwrap();
        assert_eq!(descriptor.state, PluginState::Configured);
        assert_eq!(descriptor.kind, PluginKind::Processing);
    }

    #[tokio::test]
    async fn test_missing_entrypoint_fails_single_plugin() {
        let (mut manager, _) = manager_with_test_factories();
        let mut manifest = parsed("plugin-processing-a", "processing", "1.0.0", "");
        manifest.entrypoint = None;

        let report = manager
            .load_manifests(vec![
                (None, manifest),
                (None, parsed("plugin-detection-b", "detection", "1.0.0", "")),
            ])
            .await;

        assert_eq!(report.loaded, vec!["plugin-detection-b"]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].error, PluginError::LoadError { .. }));
    }

    #[tokio::test]
    async fn test_unknown_entrypoint_class_fails() {
        let (mut manager, _) = manager_with_test_factories();
        let text = manifest_text("plugin-processing-a", "processing", "1.0.0", "")
            .replace("class: Processor", "class: Ghost");
        let manifest = PluginManifest::parse_str(&text).unwrap();

        let report = load_one(&mut manager, manifest).await;
        assert!(report.loaded.is_empty());
        assert!(matches!(report.failed[0].error, PluginError::LoadError { .. }));
    }

    #[tokio::test]
    async fn test_version_incompatibility_demotes_only_dependent() {
        let (mut manager, _) = manager_with_test_factories();
        let dependency = parsed("plugin-processing-norm", "processing", "1.5.0", "");
        let dependent = parsed(
            "plugin-detection-price",
            "detection",
            "1.0.0",
            "dependencies:\n  plugins:\n    plugin-processing-norm: \"^2.0.0\"\n",
        );

        let report = manager
            .load_manifests(vec![(None, dependency), (None, dependent)])
            .await;

        assert_eq!(report.loaded, vec!["plugin-processing-norm"]);
        assert_eq!(report.failed.len(), 1);
        match &report.failed[0].error {
            PluginError::VersionIncompatibility {
                dependent,
                dependency,
                required,
                actual,
            } => {
                assert_eq!(dependent, "plugin-detection-price");
                assert_eq!(dependency, "plugin-processing-norm");
                assert_eq!(required, "^2.0.0");
                assert_eq!(actual, "1.5.0");
            }
            other => panic!("expected VersionIncompatibility, got {:?}", other),
        }

        // B remains loaded, A is gone from the registry
        assert!(manager.registry().contains("plugin-processing-norm").await);
        assert!(!manager.registry().contains("plugin-detection-price").await);
    }

    #[tokio::test]
    async fn test_missing_dependency_demoted() {
        let (mut manager, _) = manager_with_test_factories();
        let report = load_one(
            &mut manager,
            parsed(
                "plugin-detection-price",
                "detection",
                "1.0.0",
                "dependencies:\n  plugins:\n    plugin-processing-ghost: \"*\"\n",
            ),
        )
        .await;

        assert!(report.loaded.is_empty());
        assert!(matches!(
            report.failed[0].error,
            PluginError::MissingDependency { .. }
        ));
    }

    #[tokio::test]
    async fn test_cycle_demotes_all_members() {
        let (mut manager, _) = manager_with_test_factories();
        let a = parsed(
            "plugin-processing-a",
            "processing",
            "1.0.0",
            "dependencies:\n  plugins:\n    plugin-processing-b: \"*\"\n",
        );
        let b = parsed(
            "plugin-processing-b",
            "processing",
            "1.0.0",
            "dependencies:\n  plugins:\n    plugin-processing-a: \"*\"\n",
        );

        let report = manager.load_manifests(vec![(None, a), (None, b)]).await;
        assert!(report.loaded.is_empty());
        assert_eq!(report.failed.len(), 2);
        for failure in &report.failed {
            assert!(matches!(failure.error, PluginError::CyclicDependency { .. }));
        }
    }

    #[tokio::test]
    async fn test_core_version_constraint_enforced() {
        let (mut manager, _) = manager_with_test_factories();
        let report = load_one(
            &mut manager,
            parsed(
                "plugin-processing-a",
                "processing",
                "1.0.0",
                "dependencies:\n  core_version: \">=99.0.0\"\n",
            ),
        )
        .await;

        assert!(report.loaded.is_empty());
        assert!(matches!(
            report.failed[0].error,
            PluginError::VersionIncompatible { .. }
        ));
    }

    #[tokio::test]
    async fn test_enable_disable_cycle() {
        let (mut manager, _) = manager_with_test_factories();
        load_one(&mut manager, parsed("plugin-processing-a", "processing", "1.0.0", "")).await;

        let descriptor = manager.enable("plugin-processing-a").await.unwrap();
        assert_eq!(descriptor.state, PluginState::Enabled);
        assert_eq!(manager.registry().enabled_processing().await.len(), 1);

        let descriptor = manager.disable("plugin-processing-a").await.unwrap();
        assert_eq!(descriptor.state, PluginState::Disabled);
        assert!(manager.registry().enabled_processing().await.is_empty());

        // Disabled plugins can be re-enabled
        let descriptor = manager.enable("plugin-processing-a").await.unwrap();
        assert_eq!(descriptor.state, PluginState::Enabled);
    }

    #[tokio::test]
    async fn test_enable_requires_configured_state() {
        let (manager, _) = manager_with_test_factories();
        let err = manager.enable("plugin-processing-ghost").await.unwrap_err();
        assert!(matches!(err, PluginError::PluginNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reload_from_manifest_file() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("plugin.yaml");
        std::fs::write(
            &manifest_path,
            manifest_text("plugin-processing-a", "processing", "1.0.0", ""),
        )
        .unwrap();

        let (mut manager, shutdowns) = manager_with_test_factories();
        let report = manager
            .load_manifests(vec![(
                Some(manifest_path.clone()),
                PluginManifest::load(&manifest_path).unwrap(),
            )])
            .await;
        assert_eq!(report.loaded.len(), 1);
        manager.enable("plugin-processing-a").await.unwrap();

        let old = manager.registry().instance("plugin-processing-a").await.unwrap();

        // Point the entrypoint at a v2 implementation and bump the version
        let for_v2 = shutdowns.clone();
        manager.factories_mut().register("test.plugins", "ProcessorV2", move || {
            PluginInstance::Processing(Box::new(TagProcessor {
                tag: "v2",
                shutdowns: for_v2.clone(),
            }))
        });
        std::fs::write(
            &manifest_path,
            manifest_text("plugin-processing-a", "processing", "1.1.0", "")
                .replace("class: Processor", "class: ProcessorV2"),
        )
        .unwrap();

        let descriptor = manager.reload("plugin-processing-a").await.unwrap();
        assert_eq!(descriptor.version, "1.1.0");
        assert_eq!(descriptor.state, PluginState::Enabled);

        // Old instance was shut down, new instance took its place
        assert_eq!(shutdowns.lock().unwrap().as_slice(), ["closed:v1"]);
        let new = manager.registry().instance("plugin-processing-a").await.unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_old_instance() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("plugin.yaml");
        std::fs::write(
            &manifest_path,
            manifest_text("plugin-processing-a", "processing", "1.0.0", ""),
        )
        .unwrap();

        let (mut manager, _) = manager_with_test_factories();
        manager
            .load_manifests(vec![(
                Some(manifest_path.clone()),
                PluginManifest::load(&manifest_path).unwrap(),
            )])
            .await;
        manager.enable("plugin-processing-a").await.unwrap();
        let old = manager.registry().instance("plugin-processing-a").await.unwrap();

        // New manifest names an entrypoint that is not compiled in
        std::fs::write(
            &manifest_path,
            manifest_text("plugin-processing-a", "processing", "2.0.0", "")
                .replace("class: Processor", "class: Missing"),
        )
        .unwrap();

        let err = manager.reload("plugin-processing-a").await.unwrap_err();
        assert!(matches!(err, PluginError::LoadError { .. }));

        // Old instance still registered and still enabled
        let descriptor = manager.descriptor("plugin-processing-a").await.unwrap();
        assert_eq!(descriptor.version, "1.0.0");
        assert_eq!(descriptor.state, PluginState::Enabled);
        let current = manager.registry().instance("plugin-processing-a").await.unwrap();
        assert!(Arc::ptr_eq(&old, &current));
    }

    #[tokio::test]
    async fn test_reload_rejects_unsatisfied_new_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("plugin.yaml");
        std::fs::write(
            &manifest_path,
            manifest_text("plugin-processing-a", "processing", "1.0.0", ""),
        )
        .unwrap();

        let (mut manager, _) = manager_with_test_factories();
        manager
            .load_manifests(vec![(
                Some(manifest_path.clone()),
                PluginManifest::load(&manifest_path).unwrap(),
            )])
            .await;

        // The reloaded manifest now requires a plugin that is not loaded
        std::fs::write(
            &manifest_path,
            manifest_text(
                "plugin-processing-a",
                "processing",
                "1.1.0",
                "dependencies:\n  plugins:\n    plugin-processing-ghost: \"*\"\n",
            ),
        )
        .unwrap();

        let err = manager.reload("plugin-processing-a").await.unwrap_err();
        assert!(matches!(err, PluginError::MissingDependency { .. }));

        let descriptor = manager.descriptor("plugin-processing-a").await.unwrap();
        assert_eq!(descriptor.version, "1.0.0");
    }

    #[tokio::test]
    async fn test_unregister_removes_and_shuts_down() {
        let (mut manager, shutdowns) = manager_with_test_factories();
        load_one(&mut manager, parsed("plugin-processing-a", "processing", "1.0.0", "")).await;

        manager.unregister("plugin-processing-a").await.unwrap();
        assert!(!manager.registry().contains("plugin-processing-a").await);
        assert_eq!(shutdowns.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_weight_validates_range() {
        let (mut manager, _) = manager_with_test_factories();
        load_one(&mut manager, parsed("plugin-detection-b", "detection", "1.0.0", "")).await;

        manager.set_weight("plugin-detection-b", 0.8).await.unwrap();
        let descriptor = manager.descriptor("plugin-detection-b").await.unwrap();
        assert_eq!(descriptor.weight, Some(0.8));

        let err = manager.set_weight("plugin-detection-b", 1.5).await.unwrap_err();
        assert!(matches!(err, PluginError::ConfigError { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_enable_hook_failure_drives_failed_state() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let hook_path = dir.path().join("on_enable.sh");
        std::fs::write(&hook_path, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&hook_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let manifest_path = dir.path().join("plugin.yaml");
        std::fs::write(
            &manifest_path,
            manifest_text(
                "plugin-processing-a",
                "processing",
                "1.0.0",
                "hooks:\n  enable: on_enable.sh\n",
            ),
        )
        .unwrap();

        let (mut manager, _) = manager_with_test_factories();
        manager
            .load_manifests(vec![(
                Some(manifest_path.clone()),
                PluginManifest::load(&manifest_path).unwrap(),
            )])
            .await;

        let err = manager.enable("plugin-processing-a").await.unwrap_err();
        assert!(matches!(err, PluginError::HookFailed { .. }));

        let descriptor = manager.descriptor("plugin-processing-a").await.unwrap();
        assert_eq!(descriptor.state, PluginState::Failed);
        assert!(descriptor.failure.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_enable_hook_success() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let hook_path = dir.path().join("on_enable.sh");
        let marker = dir.path().join("enabled.marker");
        std::fs::write(
            &hook_path,
            format!("#!/bin/sh\ntouch {}\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&hook_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let manifest_path = dir.path().join("plugin.yaml");
        std::fs::write(
            &manifest_path,
            manifest_text(
                "plugin-processing-a",
                "processing",
                "1.0.0",
                "hooks:\n  enable: on_enable.sh\n",
            ),
        )
        .unwrap();

        let (mut manager, _) = manager_with_test_factories();
        manager
            .load_manifests(vec![(
                Some(manifest_path.clone()),
                PluginManifest::load(&manifest_path).unwrap(),
            )])
            .await;

        manager.enable("plugin-processing-a").await.unwrap();
        assert!(marker.exists());
    }

    struct ConfigProbe {
        seen: Arc<StdMutex<Option<String>>>,
    }

    #[async_trait::async_trait]
    impl Plugin for ConfigProbe {
        async fn configure(
            &self,
            settings: &crate::plugin::settings::PluginSettings,
        ) -> PluginResult<()> {
            *self.seen.lock().unwrap() = settings.get_str("market").map(|s| s.to_string());
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl ProcessingPlugin for ConfigProbe {
        fn stage_name(&self) -> &str {
            "probe"
        }

        async fn process(
            &self,
            document: serde_json::Value,
        ) -> Result<serde_json::Value, ProcessingError> {
            Ok(document)
        }
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_configure_binds_process_environment() {
        let seen: Arc<StdMutex<Option<String>>> = Arc::new(StdMutex::new(None));
        let mut manager = PluginManager::new(crate::core::version::get_api_version());
        let probe_seen = seen.clone();
        manager.factories_mut().register("test.plugins", "Probe", move || {
            PluginInstance::Processing(Box::new(ConfigProbe {
                seen: probe_seen.clone(),
            }))
        });

        std::env::set_var("PLUGIN_PLUGIN_PROCESSING_PROBE_MARKET", "lisbon");
        let text = manifest_text("plugin-processing-probe", "processing", "1.0.0", "")
            .replace("class: Processor", "class: Probe");
        let report = load_one(&mut manager, PluginManifest::parse_str(&text).unwrap()).await;
        std::env::remove_var("PLUGIN_PLUGIN_PROCESSING_PROBE_MARKET");

        assert_eq!(report.loaded, vec!["plugin-processing-probe"]);
        assert_eq!(seen.lock().unwrap().as_deref(), Some("lisbon"));
    }

    #[tokio::test]
    async fn test_get_never_absent_during_reload() {
        // Hammer get() from another task while a reload happens; every
        // observation must return a descriptor.
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("plugin.yaml");
        std::fs::write(
            &manifest_path,
            manifest_text("plugin-processing-a", "processing", "1.0.0", ""),
        )
        .unwrap();

        let (mut manager, _) = manager_with_test_factories();
        manager
            .load_manifests(vec![(
                Some(manifest_path.clone()),
                PluginManifest::load(&manifest_path).unwrap(),
            )])
            .await;
        manager.enable("plugin-processing-a").await.unwrap();

        let registry = manager.registry().clone();
        let observations = Arc::new(AtomicU32::new(0));
        let absences = Arc::new(AtomicU32::new(0));
        let obs = observations.clone();
        let abs = absences.clone();
        let watcher = tokio::spawn(async move {
            for _ in 0..200 {
                if registry.descriptor("plugin-processing-a").await.is_none() {
                    abs.fetch_add(1, Ordering::SeqCst);
                }
                obs.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
            }
        });

        for _ in 0..5 {
            manager.reload("plugin-processing-a").await.unwrap();
        }
        watcher.await.unwrap();

        assert!(observations.load(Ordering::SeqCst) > 0);
        assert_eq!(absences.load(Ordering::SeqCst), 0);
    }
}
