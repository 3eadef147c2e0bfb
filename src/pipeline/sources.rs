//! Source Pump
//!
//! Drains enabled source plugins onto the raw-listing topic. Each plugin
//! yields a lazy, finite sequence; one sweep pulls every plugin to
//! exhaustion. The periodic runner repeats sweeps until shutdown, so
//! scrapers that find new listings on each sweep keep feeding the pipeline.

use crate::model::event::topics;
use crate::plugin::api::SharedPluginRegistry;
use crate::queue::api::{EventQueue, QueueMessage};
use std::sync::Arc;
use std::time::Duration;

pub struct SourcePump {
    registry: SharedPluginRegistry,
    queue: Arc<dyn EventQueue>,
}

impl SourcePump {
    pub fn new(registry: SharedPluginRegistry, queue: Arc<dyn EventQueue>) -> Self {
        Self { registry, queue }
    }

    /// One sweep: pull every enabled source plugin until it reports
    /// exhaustion, publishing each raw listing. A plugin error ends that
    /// plugin's sweep; the others continue. Returns the number published.
    pub async fn run_once(&self) -> usize {
        let mut published = 0usize;

        for entry in self.registry.enabled_sources().await {
            let Some(source) = entry.instance.as_source() else {
                continue;
            };

            loop {
                entry.stats.record_execution();
                match source.next_listing().await {
                    Ok(Some(event)) => {
                        let message = match QueueMessage::encode(topics::RAW_LISTINGS, &event) {
                            Ok(message) => message,
                            Err(error) => {
                                log::error!(
                                    "Source '{}' produced an unserializable event: {}",
                                    entry.plugin_id,
                                    error
                                );
                                continue;
                            }
                        };
                        match self.queue.publish(topics::RAW_LISTINGS, message).await {
                            Ok(_) => published += 1,
                            Err(error) => {
                                log::error!(
                                    "Failed to publish raw listing from '{}': {}",
                                    entry.plugin_id,
                                    error
                                );
                                break;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        entry.stats.record_failure();
                        log::error!("Source plugin '{}' failed: {}", entry.plugin_id, error);
                        break;
                    }
                }
            }
        }

        if published > 0 {
            log::info!("Source sweep published {} raw listing(s)", published);
        }
        published
    }

    /// Sweep repeatedly until the shutdown channel fires.
    pub async fn run_periodically(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        loop {
            self.run_once().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => {
                    log::debug!("Source pump stopping");
                    return;
                }
            }
        }
    }
}
