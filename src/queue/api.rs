//! Public API for the queue system
//!
//! External modules should import from here rather than directly from
//! internal modules.

use crate::core::config::{CoreConfig, QueueBackend};
use std::sync::Arc;

pub use crate::queue::error::{QueueError, QueueResult};
pub use crate::queue::memory::InMemoryQueue;
pub use crate::queue::message::QueueMessage;
pub use crate::queue::stream::{RedisStreamQueue, StreamQueueConfig};
pub use crate::queue::traits::{
    EventQueue, HandlerError, HandlerFuture, MessageHandler, QueueHealth, QueueStatistics,
};

/// Build the queue backend selected by the configuration.
pub fn build_queue(config: &CoreConfig) -> Arc<dyn EventQueue> {
    match config.queue.backend {
        QueueBackend::Memory => Arc::new(InMemoryQueue::new()),
        QueueBackend::Stream => {
            let mut stream_config = StreamQueueConfig::new(
                config.queue.redis_url.clone(),
                config.queue.consumer_group.clone(),
            );
            stream_config.block_ms = config.queue.block_ms;
            stream_config.max_pending = config.queue.max_pending;
            Arc::new(RedisStreamQueue::new(stream_config))
        }
    }
}
