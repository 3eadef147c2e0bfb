//! Plugin Trait System
//!
//! One contract per plugin kind. The data flow is:
//! source plugins -> raw-listing topic -> processing plugins (priority
//! chain) -> detection plugins (scoring fan-out) -> downstream consumers.
//!
//! Instances are shared as `Arc<PluginInstance>`; lifecycle methods take
//! `&self`, so plugins keep mutable state behind their own interior
//! mutability. Plugins never hold references to each other; the registry is
//! the only place that knows about other plugins.

use crate::model::event::RawListingEvent;
use crate::model::listing::Listing;
use crate::plugin::error::PluginResult;
use crate::plugin::settings::PluginSettings;
use crate::plugin::types::{DetectionResult, ProcessingError};

/// Base lifecycle shared by every plugin kind.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    /// Bind merged configuration. Called once after registration and again
    /// on each hot reload; a failure drives the plugin to `Failed`.
    async fn configure(&self, _settings: &PluginSettings) -> PluginResult<()> {
        Ok(())
    }

    /// Graceful shutdown before unload or reload, bounded by the shutdown
    /// deadline. Default is a no-op.
    async fn shutdown(&self) -> PluginResult<()> {
        Ok(())
    }
}

/// Source plugins yield a lazy, finite sequence of raw listings.
///
/// `None` marks exhaustion. Producers must return promptly when the caller
/// stops pulling; long scrape batches should be chunked.
#[async_trait::async_trait]
pub trait SourcePlugin: Plugin {
    async fn next_listing(&self) -> PluginResult<Option<RawListingEvent>>;
}

/// Processing plugins transform the listing document through one pipeline
/// stage.
///
/// The document starts as the raw source payload; a normalizer stage maps it
/// into the unified listing shape and later stages refine it. The document
/// stays JSON through the pipeline because source payloads are heterogeneous
/// per portal; the orchestrator deserializes into [`Listing`] once the chain
/// completes.
#[async_trait::async_trait]
pub trait ProcessingPlugin: Plugin {
    /// Stage label recorded on the processed event
    fn stage_name(&self) -> &str;

    /// Pipeline position; lower runs earlier, ties break by plugin id
    fn priority(&self) -> i32 {
        10
    }

    /// Transform the document. Errors are tagged transient or permanent and
    /// drive the orchestrator's retry policy.
    async fn process(
        &self,
        document: serde_json::Value,
    ) -> Result<serde_json::Value, ProcessingError>;
}

/// Detection plugins analyze a listing and emit risk signals.
#[async_trait::async_trait]
pub trait DetectionPlugin: Plugin {
    /// Aggregation weight in [0,1]; may be overridden per deployment
    fn weight(&self) -> f64 {
        0.1
    }

    async fn analyze(&self, listing: &Listing) -> PluginResult<DetectionResult>;
}

/// Search plugins index processed listings for retrieval.
#[async_trait::async_trait]
pub trait SearchPlugin: Plugin {
    async fn index(&self, listing: &Listing) -> PluginResult<()>;
}

/// Display plugins render a listing for an outbound surface.
#[async_trait::async_trait]
pub trait DisplayPlugin: Plugin {
    async fn render(&self, listing: &Listing) -> PluginResult<String>;
}

/// A live plugin instance, tagged by kind at the registry level.
pub enum PluginInstance {
    Source(Box<dyn SourcePlugin>),
    Processing(Box<dyn ProcessingPlugin>),
    Detection(Box<dyn DetectionPlugin>),
    Search(Box<dyn SearchPlugin>),
    Display(Box<dyn DisplayPlugin>),
}

impl PluginInstance {
    pub fn kind(&self) -> crate::manifest::PluginKind {
        use crate::manifest::PluginKind;
        match self {
            PluginInstance::Source(_) => PluginKind::Source,
            PluginInstance::Processing(_) => PluginKind::Processing,
            PluginInstance::Detection(_) => PluginKind::Detection,
            PluginInstance::Search(_) => PluginKind::Search,
            PluginInstance::Display(_) => PluginKind::Display,
        }
    }

    /// Access the shared lifecycle surface regardless of kind.
    pub fn as_plugin(&self) -> &dyn Plugin {
        match self {
            PluginInstance::Source(p) => p.as_ref(),
            PluginInstance::Processing(p) => p.as_ref(),
            PluginInstance::Detection(p) => p.as_ref(),
            PluginInstance::Search(p) => p.as_ref(),
            PluginInstance::Display(p) => p.as_ref(),
        }
    }

    pub fn as_processing(&self) -> Option<&dyn ProcessingPlugin> {
        match self {
            PluginInstance::Processing(p) => Some(p.as_ref()),
            _ => None,
        }
    }

    pub fn as_detection(&self) -> Option<&dyn DetectionPlugin> {
        match self {
            PluginInstance::Detection(p) => Some(p.as_ref()),
            _ => None,
        }
    }

    pub fn as_source(&self) -> Option<&dyn SourcePlugin> {
        match self {
            PluginInstance::Source(p) => Some(p.as_ref()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("kind", &self.kind().as_str())
            .finish()
    }
}
