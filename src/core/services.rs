//! Service Registry for centralized access to core services
//!
//! One registry is constructed at startup and handed to the components that
//! need it (HTTP surface, orchestrator, daemon loop). There is deliberately
//! no ambient global: everything that talks to the plugin manager or the
//! notification bus receives the registry explicitly.

use crate::notifications::api::AsyncNotificationManager;
use crate::plugin::api::{PluginManager, PluginManagerConfig};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Centralized registry for all core services
pub struct ServiceRegistry {
    notification_manager: Arc<Mutex<AsyncNotificationManager>>,
    plugin_manager: Mutex<PluginManager>,
}

impl ServiceRegistry {
    /// Create a new ServiceRegistry with default services. The plugin
    /// manager publishes its lifecycle events on the shared bus.
    pub fn new(api_version: u32) -> Arc<Self> {
        Self::with_plugin_config(api_version, PluginManagerConfig::default())
    }

    /// Create a ServiceRegistry with explicit plugin manager timeouts.
    pub fn with_plugin_config(api_version: u32, config: PluginManagerConfig) -> Arc<Self> {
        let notification_manager = Arc::new(Mutex::new(AsyncNotificationManager::new()));
        let plugin_manager = PluginManager::with_config(api_version, config)
            .with_notifications(Arc::clone(&notification_manager));

        Arc::new(Self {
            notification_manager,
            plugin_manager: Mutex::new(plugin_manager),
        })
    }

    /// Access notification manager from async context
    pub async fn notification_manager(
        &self,
    ) -> tokio::sync::MutexGuard<'_, AsyncNotificationManager> {
        self.notification_manager.lock().await
    }

    /// Access plugin manager from async context
    pub async fn plugin_manager(&self) -> tokio::sync::MutexGuard<'_, PluginManager> {
        self.plugin_manager.lock().await
    }
}
