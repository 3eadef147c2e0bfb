//! Plugin Registry
//!
//! Thread-safe registry of loaded plugins keyed by plugin id. The registry is
//! read-mostly: the plugin manager is the only writer (load, reload, enable,
//! disable, unregister), everything else takes read snapshots. Instances are
//! `Arc`-shared so a hot swap never invalidates an in-flight pipeline run:
//! work started against the old instance finishes against the old instance.

use crate::manifest::{PluginKind, PluginManifest};
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::traits::PluginInstance;
use crate::plugin::types::{PluginState, PluginStats};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One loaded plugin: manifest, live instance, lifecycle state, counters.
pub struct PluginRecord {
    pub manifest: PluginManifest,
    /// Where the manifest was read from; absent for programmatic registration
    pub manifest_path: Option<PathBuf>,
    pub state: PluginState,
    pub instance: Arc<PluginInstance>,
    /// Reason for the `Failed` state, when set
    pub failure: Option<String>,
    /// Operator override of the detection weight
    pub weight_override: Option<f64>,
    pub stats: Arc<PluginStats>,
}

impl PluginRecord {
    pub fn new(
        manifest: PluginManifest,
        manifest_path: Option<PathBuf>,
        instance: PluginInstance,
    ) -> Self {
        Self {
            manifest,
            manifest_path,
            state: PluginState::Registered,
            instance: Arc::new(instance),
            failure: None,
            weight_override: None,
            stats: Arc::new(PluginStats::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    /// Effective detection weight: operator override, then manifest hint,
    /// then the plugin's own default.
    pub fn effective_weight(&self) -> f64 {
        if let Some(weight) = self.weight_override {
            return weight;
        }
        if let Some(weight) = self.manifest.weight {
            return weight;
        }
        self.instance
            .as_detection()
            .map(|d| d.weight())
            .unwrap_or(0.0)
    }

    /// Effective pipeline priority: manifest hint, then the plugin default.
    pub fn effective_priority(&self) -> i32 {
        if let Some(priority) = self.manifest.priority {
            return priority;
        }
        self.instance
            .as_processing()
            .map(|p| p.priority())
            .unwrap_or(10)
    }

    pub fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            id: self.manifest.id.clone(),
            name: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            kind: self.manifest.kind,
            state: self.state,
            failure: self.failure.clone(),
            weight: self
                .instance
                .as_detection()
                .map(|_| self.effective_weight()),
            priority: self
                .instance
                .as_processing()
                .map(|_| self.effective_priority()),
            executions: self.stats.executions(),
            failures: self.stats.failures(),
        }
    }
}

impl std::fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRecord")
            .field("id", &self.manifest.id)
            .field("version", &self.manifest.version)
            .field("state", &self.state)
            .field("failure", &self.failure)
            .finish()
    }
}

/// Serializable view of a plugin for the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub kind: PluginKind,
    pub state: PluginState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    pub executions: u64,
    pub failures: u64,
}

/// An enabled processing plugin ready for pipeline execution.
#[derive(Clone)]
pub struct ProcessingEntry {
    pub plugin_id: String,
    pub priority: i32,
    pub instance: Arc<PluginInstance>,
    pub stats: Arc<PluginStats>,
}

/// An enabled detection plugin ready for the scoring fan-out.
#[derive(Clone)]
pub struct DetectionEntry {
    pub plugin_id: String,
    pub weight: f64,
    pub instance: Arc<PluginInstance>,
    pub stats: Arc<PluginStats>,
}

/// An enabled source plugin ready to be drained by the source pump.
#[derive(Clone)]
pub struct SourceEntry {
    pub plugin_id: String,
    pub instance: Arc<PluginInstance>,
    pub stats: Arc<PluginStats>,
}

/// Plugin registry for managing loaded plugins
#[derive(Debug, Default)]
pub struct PluginRegistry {
    records: HashMap<String, PluginRecord>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Register a plugin record. Ids are unique; re-registering is an error
    /// (reload swaps in place instead).
    pub fn register(&mut self, record: PluginRecord) -> PluginResult<()> {
        let plugin_id = record.id().to_string();
        if self.records.contains_key(&plugin_id) {
            return Err(PluginError::AlreadyRegistered { plugin_id });
        }
        self.records.insert(plugin_id, record);
        Ok(())
    }

    pub fn get(&self, plugin_id: &str) -> Option<&PluginRecord> {
        self.records.get(plugin_id)
    }

    pub fn get_mut(&mut self, plugin_id: &str) -> Option<&mut PluginRecord> {
        self.records.get_mut(plugin_id)
    }

    pub fn remove(&mut self, plugin_id: &str) -> PluginResult<PluginRecord> {
        self.records
            .remove(plugin_id)
            .ok_or_else(|| PluginError::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.records.contains_key(plugin_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All plugin ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn records(&self) -> impl Iterator<Item = &PluginRecord> {
        self.records.values()
    }

    /// Move a plugin to a new lifecycle state, validating the transition.
    pub fn set_state(&mut self, plugin_id: &str, next: PluginState) -> PluginResult<()> {
        let record = self
            .records
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })?;

        if !record.state.can_transition_to(next) {
            return Err(PluginError::InvalidState {
                plugin_id: plugin_id.to_string(),
                expected: format!("a state that can move to {}", next),
                actual: record.state.to_string(),
            });
        }

        record.state = next;
        if next != PluginState::Failed {
            record.failure = None;
        }
        Ok(())
    }

    /// Drive a plugin to `Failed` with a reason. Always legal.
    pub fn mark_failed(&mut self, plugin_id: &str, reason: impl Into<String>) -> PluginResult<()> {
        let record = self
            .records
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })?;
        record.state = PluginState::Failed;
        record.failure = Some(reason.into());
        Ok(())
    }

    /// Atomically replace a plugin's instance and manifest (hot reload).
    /// The record keeps its stats; state resets to Registered.
    pub fn swap_instance(
        &mut self,
        plugin_id: &str,
        manifest: PluginManifest,
        instance: PluginInstance,
    ) -> PluginResult<()> {
        let record = self
            .records
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })?;
        record.manifest = manifest;
        record.instance = Arc::new(instance);
        record.state = PluginState::Registered;
        record.failure = None;
        Ok(())
    }

    /// Descriptors for all plugins, optionally filtered by kind and state,
    /// sorted by id.
    pub fn list(
        &self,
        kind: Option<PluginKind>,
        state: Option<PluginState>,
    ) -> Vec<PluginDescriptor> {
        let mut descriptors: Vec<PluginDescriptor> = self
            .records
            .values()
            .filter(|r| kind.map(|k| r.manifest.kind == k).unwrap_or(true))
            .filter(|r| state.map(|s| r.state == s).unwrap_or(true))
            .map(|r| r.descriptor())
            .collect();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        descriptors
    }

    /// Enabled processing plugins in pipeline order: ascending priority,
    /// ties broken by plugin id.
    pub fn enabled_processing(&self) -> Vec<ProcessingEntry> {
        let mut entries: Vec<ProcessingEntry> = self
            .records
            .values()
            .filter(|r| r.state == PluginState::Enabled)
            .filter(|r| r.instance.as_processing().is_some())
            .map(|r| ProcessingEntry {
                plugin_id: r.manifest.id.clone(),
                priority: r.effective_priority(),
                instance: Arc::clone(&r.instance),
                stats: Arc::clone(&r.stats),
            })
            .collect();
        entries.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.plugin_id.cmp(&b.plugin_id))
        });
        entries
    }

    /// Enabled source plugins in id order.
    pub fn enabled_sources(&self) -> Vec<SourceEntry> {
        let mut entries: Vec<SourceEntry> = self
            .records
            .values()
            .filter(|r| r.state == PluginState::Enabled)
            .filter(|r| r.instance.as_source().is_some())
            .map(|r| SourceEntry {
                plugin_id: r.manifest.id.clone(),
                instance: Arc::clone(&r.instance),
                stats: Arc::clone(&r.stats),
            })
            .collect();
        entries.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        entries
    }

    /// Enabled detection plugins in id order (the scoring fold is keyed by
    /// id, so the order here is presentation only).
    pub fn enabled_detection(&self) -> Vec<DetectionEntry> {
        let mut entries: Vec<DetectionEntry> = self
            .records
            .values()
            .filter(|r| r.state == PluginState::Enabled)
            .filter(|r| r.instance.as_detection().is_some())
            .map(|r| DetectionEntry {
                plugin_id: r.manifest.id.clone(),
                weight: r.effective_weight(),
                instance: Arc::clone(&r.instance),
                stats: Arc::clone(&r.stats),
            })
            .collect();
        entries.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        entries
    }
}

/// Thread-safe shared plugin registry
#[derive(Debug, Clone, Default)]
pub struct SharedPluginRegistry {
    inner: Arc<RwLock<PluginRegistry>>,
}

impl SharedPluginRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(PluginRegistry::new())),
        }
    }

    /// Get access to the inner registry for read/write operations
    pub fn inner(&self) -> &Arc<RwLock<PluginRegistry>> {
        &self.inner
    }

    pub async fn contains(&self, plugin_id: &str) -> bool {
        self.inner.read().await.contains(plugin_id)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner.read().await.ids()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn descriptor(&self, plugin_id: &str) -> Option<PluginDescriptor> {
        self.inner.read().await.get(plugin_id).map(|r| r.descriptor())
    }

    pub async fn list(
        &self,
        kind: Option<PluginKind>,
        state: Option<PluginState>,
    ) -> Vec<PluginDescriptor> {
        self.inner.read().await.list(kind, state)
    }

    pub async fn enabled_processing(&self) -> Vec<ProcessingEntry> {
        self.inner.read().await.enabled_processing()
    }

    pub async fn enabled_detection(&self) -> Vec<DetectionEntry> {
        self.inner.read().await.enabled_detection()
    }

    pub async fn enabled_sources(&self) -> Vec<SourceEntry> {
        self.inner.read().await.enabled_sources()
    }

    /// Live instance handle, regardless of state.
    pub async fn instance(&self, plugin_id: &str) -> Option<Arc<PluginInstance>> {
        self.inner
            .read()
            .await
            .get(plugin_id)
            .map(|r| Arc::clone(&r.instance))
    }
}
