//! Public API for the plugin system
//!
//! External modules should import from here rather than directly from
//! internal modules.

// Core plugin management
pub use crate::plugin::manager::{LoadFailure, LoadReport, PluginManager, PluginManagerConfig};

// Registry access for read-side consumers
pub use crate::plugin::registry::{
    DetectionEntry, PluginDescriptor, PluginRecord, PluginRegistry, ProcessingEntry, SourceEntry,
    SharedPluginRegistry,
};

// Plugin contracts and runtime types
pub use crate::plugin::error::{PluginError, PluginResult};
pub use crate::plugin::settings::{bind_settings, PluginSettings};
pub use crate::plugin::traits::{
    DetectionPlugin, DisplayPlugin, Plugin, PluginInstance, ProcessingPlugin, SearchPlugin,
    SourcePlugin,
};
pub use crate::plugin::types::{DetectionResult, PluginState, PluginStats, ProcessingError};

// Dependency graph and discovery
pub use crate::plugin::discovery::{discover, DiscoveredPlugin, DiscoveryReport};
pub use crate::plugin::factory::{FactoryRegistry, PluginFactory};
pub use crate::plugin::graph::{DependencyGraph, GraphError};

// Built-in plugin implementations
pub use crate::plugin::builtin::{KeywordDetectorPlugin, NormalizerPlugin, PriceAnomalyPlugin};
