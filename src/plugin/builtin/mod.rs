//! Built-in Plugins
//!
//! Compiled-in implementations selected through manifest entrypoints like any
//! other plugin. They provide a working baseline pipeline: normalize the raw
//! payload, then score it against price and keyword heuristics.

pub(crate) mod keyword;
pub(crate) mod normalize;
pub(crate) mod price_anomaly;

pub use keyword::KeywordDetectorPlugin;
pub use normalize::NormalizerPlugin;
pub use price_anomaly::PriceAnomalyPlugin;

use crate::plugin::factory::FactoryRegistry;
use crate::plugin::traits::PluginInstance;

/// Register the built-in factories under their entrypoint descriptors.
pub fn register_builtin_factories(registry: &mut FactoryRegistry) {
    registry.register("builtin.normalize", "NormalizerPlugin", || {
        PluginInstance::Processing(Box::new(NormalizerPlugin::new()))
    });
    registry.register("builtin.detect", "PriceAnomalyPlugin", || {
        PluginInstance::Detection(Box::new(PriceAnomalyPlugin::new()))
    });
    registry.register("builtin.detect", "KeywordDetectorPlugin", || {
        PluginInstance::Detection(Box::new(KeywordDetectorPlugin::new()))
    });
}
