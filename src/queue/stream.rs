//! Redis Stream Queue
//!
//! Production backend: one stream per topic (the stream key is the topic
//! name), consumer groups for load balancing across workers, blocking reads,
//! and the pending-entries list for in-flight tracking. Rejected messages
//! are re-appended (requeue) or appended to the `dead_letter` stream, then
//! acknowledged on the original stream.
//!
//! Backpressure: a worker stops reading new entries while it has
//! `max_pending` unsettled deliveries and resumes once it catches up.

use crate::core::retry::{retry_async, RetryPolicy};
use crate::model::event::topics;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::message::QueueMessage;
use crate::queue::traits::{
    EventQueue, MessageHandler, QueueCounters, QueueHealth, QueueStatistics,
};
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Field name carrying the serialized event inside a stream entry.
const PAYLOAD_FIELD: &str = "payload";
/// Separator between topic and stream entry id in a message id.
const ID_SEPARATOR: char = '|';
/// Entries read per XREADGROUP call.
const READ_BATCH: usize = 10;
/// Backoff after a broker error inside a worker loop.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Connection settings for the stream backend.
#[derive(Debug, Clone)]
pub struct StreamQueueConfig {
    pub url: String,
    pub consumer_group: String,
    /// This worker's consumer name within the group
    pub consumer_name: String,
    pub block_ms: u64,
    pub max_pending: usize,
}

impl StreamQueueConfig {
    pub fn new(url: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            consumer_group: consumer_group.into(),
            consumer_name: format!("worker-{}", std::process::id()),
            block_ms: 1000,
            max_pending: 1000,
        }
    }
}

struct Subscription {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

struct Shared {
    config: StreamQueueConfig,
    connection: Mutex<Option<redis::aio::MultiplexedConnection>>,
    /// message_id -> payload, for requeue/dead-letter on reject
    pending: std::sync::Mutex<HashMap<String, String>>,
    counters: QueueCounters,
}

impl Shared {
    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.connection
            .lock()
            .await
            .clone()
            .ok_or(QueueError::NotConnected)
    }

    fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Settle a delivery: append a copy where it belongs (if anywhere), then
    /// acknowledge the original entry so it leaves the pending list.
    async fn settle(
        &self,
        message_id: &str,
        requeue_to: Option<&str>,
    ) -> QueueResult<()> {
        let (topic, entry_id) = split_message_id(message_id)?;
        let payload = self.pending.lock().unwrap().remove(message_id);

        let mut conn = self.connection().await?;

        if let (Some(payload), Some(target)) = (&payload, requeue_to) {
            let _: String = conn
                .xadd(target, "*", &[(PAYLOAD_FIELD, payload.as_str())])
                .await
                .map_err(|e| QueueError::Backend {
                    cause: e.to_string(),
                })?;
            if target == topics::DEAD_LETTER {
                self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
            }
        }

        let _: i32 = conn
            .xack(&topic, &self.config.consumer_group, &[&entry_id])
            .await
            .map_err(|e| QueueError::Backend {
                cause: e.to_string(),
            })?;
        Ok(())
    }
}

fn make_message_id(topic: &str, entry_id: &str) -> String {
    format!("{}{}{}", topic, ID_SEPARATOR, entry_id)
}

fn split_message_id(message_id: &str) -> QueueResult<(String, String)> {
    message_id
        .split_once(ID_SEPARATOR)
        .map(|(topic, id)| (topic.to_string(), id.to_string()))
        .ok_or_else(|| QueueError::MessageNotFound {
            message_id: message_id.to_string(),
        })
}

/// Redis-stream implementation of the queue contract.
pub struct RedisStreamQueue {
    shared: Arc<Shared>,
    subscriptions: std::sync::Mutex<HashMap<String, Subscription>>,
}

impl RedisStreamQueue {
    pub fn new(config: StreamQueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                connection: Mutex::new(None),
                pending: std::sync::Mutex::new(HashMap::new()),
                counters: QueueCounters::default(),
            }),
            subscriptions: std::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn ensure_group(&self, topic: &str) -> QueueResult<()> {
        let mut conn = self.shared.connection().await?;
        let result: redis::RedisResult<String> = conn
            .xgroup_create_mkstream(topic, &self.shared.config.consumer_group, "$")
            .await;
        match result {
            Ok(_) => Ok(()),
            // The group surviving restarts is the normal case
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Backend {
                cause: e.to_string(),
            }),
        }
    }
}

async fn stream_worker(
    shared: Arc<Shared>,
    topic: String,
    handler: MessageHandler,
    stop: Arc<AtomicBool>,
) {
    log::debug!(
        "Stream worker started for topic '{}' (group '{}')",
        topic,
        shared.config.consumer_group
    );

    while !stop.load(Ordering::Acquire) {
        // Backpressure: stop reading while too many deliveries are unsettled
        if shared.pending_len() >= shared.config.max_pending {
            tokio::time::sleep(Duration::from_millis(shared.config.block_ms)).await;
            continue;
        }

        let mut conn = match shared.connection().await {
            Ok(conn) => conn,
            Err(_) => {
                tokio::time::sleep(ERROR_BACKOFF).await;
                continue;
            }
        };

        let options = StreamReadOptions::default()
            .group(
                shared.config.consumer_group.as_str(),
                shared.config.consumer_name.as_str(),
            )
            .count(READ_BATCH)
            .block(shared.config.block_ms as usize);

        let reply: StreamReadReply =
            match conn.xread_options(&[&topic], &[">"], &options).await {
                Ok(reply) => reply,
                Err(e) => {
                    log::warn!("XREADGROUP failed on '{}': {}", topic, e);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    continue;
                }
            };

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let payload = match entry
                    .map
                    .get(PAYLOAD_FIELD)
                    .and_then(|v| redis::from_redis_value::<String>(v).ok())
                {
                    Some(payload) => payload,
                    None => {
                        log::error!(
                            "Entry {} on '{}' has no payload field; acknowledging and skipping",
                            entry.id,
                            topic
                        );
                        let _: Result<i32, _> = conn
                            .xack(&topic, &shared.config.consumer_group, &[&entry.id])
                            .await;
                        continue;
                    }
                };

                let message_id = make_message_id(&topic, &entry.id);
                shared
                    .pending
                    .lock()
                    .unwrap()
                    .insert(message_id.clone(), payload.clone());
                shared.counters.consumed.fetch_add(1, Ordering::Relaxed);

                let message = QueueMessage {
                    message_id: message_id.clone(),
                    topic: topic.clone(),
                    payload,
                    delivery_count: 1,
                    enqueued_at: SystemTime::now(),
                };

                let outcome = handler(message).await;
                let still_pending = shared.pending.lock().unwrap().contains_key(&message_id);
                if !still_pending {
                    // Handler settled it through ack/reject already
                    continue;
                }

                let settle_result = match outcome {
                    Ok(()) => {
                        shared.counters.acked.fetch_add(1, Ordering::Relaxed);
                        shared.settle(&message_id, None).await
                    }
                    Err(error) => {
                        shared
                            .counters
                            .handler_errors
                            .fetch_add(1, Ordering::Relaxed);
                        shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                        let target = if error.requeue {
                            topic.as_str()
                        } else {
                            topics::DEAD_LETTER
                        };
                        log::debug!(
                            "Rejecting {} towards '{}': {}",
                            message_id,
                            target,
                            error
                        );
                        shared.settle(&message_id, Some(target)).await
                    }
                };
                if let Err(e) = settle_result {
                    // The entry stays in the pending list and will be
                    // redelivered; at-least-once holds.
                    log::warn!("Failed to settle {}: {}", message_id, e);
                }
            }
        }
    }

    log::debug!("Stream worker stopped for topic '{}'", topic);
}

#[async_trait::async_trait]
impl EventQueue for RedisStreamQueue {
    async fn connect(&self) -> QueueResult<()> {
        let url = self.shared.config.url.clone();
        let client = redis::Client::open(url.as_str()).map_err(|e| QueueError::ConnectionFailed {
            cause: e.to_string(),
        })?;

        let connection = retry_async("redis_connect", RetryPolicy::default(), || {
            let client = client.clone();
            async move {
                client
                    .get_multiplexed_tokio_connection()
                    .await
                    .map_err(|e| QueueError::ConnectionFailed {
                        cause: e.to_string(),
                    })
            }
        })
        .await?;

        *self.shared.connection.lock().await = Some(connection);
        log::info!("Connected to stream backend at {}", self.shared.config.url);
        Ok(())
    }

    async fn disconnect(&self) -> QueueResult<()> {
        let drained: Vec<(String, Subscription)> = {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            subscriptions.drain().collect()
        };
        for (_, subscription) in &drained {
            subscription.stop.store(true, Ordering::Release);
        }
        for (id, subscription) in drained {
            if tokio::time::timeout(Duration::from_secs(5), subscription.task)
                .await
                .is_err()
            {
                log::warn!("Stream subscription {} did not stop in time", id);
            }
            self.shared
                .counters
                .subscriptions
                .fetch_sub(1, Ordering::Relaxed);
        }

        *self.shared.connection.lock().await = None;
        log::info!("Disconnected from stream backend");
        Ok(())
    }

    async fn publish(&self, topic: &str, message: QueueMessage) -> QueueResult<String> {
        let mut conn = self.shared.connection().await?;
        let entry_id: String = conn
            .xadd(topic, "*", &[(PAYLOAD_FIELD, message.payload.as_str())])
            .await
            .map_err(|e| QueueError::PublishFailed {
                topic: topic.to_string(),
                cause: e.to_string(),
            })?;
        self.shared
            .counters
            .published
            .fetch_add(1, Ordering::Relaxed);
        Ok(make_message_id(topic, &entry_id))
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> QueueResult<String> {
        self.ensure_group(topic).await?;

        let subscription_id = uuid::Uuid::new_v4().to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(stream_worker(
            Arc::clone(&self.shared),
            topic.to_string(),
            handler,
            Arc::clone(&stop),
        ));

        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription_id.clone(), Subscription { stop, task });
        self.shared
            .counters
            .subscriptions
            .fetch_add(1, Ordering::Relaxed);
        Ok(subscription_id)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> QueueResult<()> {
        let subscription = {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            subscriptions.remove(subscription_id)
        }
        .ok_or_else(|| QueueError::SubscriptionNotFound {
            subscription_id: subscription_id.to_string(),
        })?;

        subscription.stop.store(true, Ordering::Release);
        let _ = tokio::time::timeout(Duration::from_secs(5), subscription.task).await;
        self.shared
            .counters
            .subscriptions
            .fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        if !self
            .shared
            .pending
            .lock()
            .unwrap()
            .contains_key(message_id)
        {
            return Ok(());
        }
        self.shared.counters.acked.fetch_add(1, Ordering::Relaxed);
        self.shared.settle(message_id, None).await
    }

    async fn reject(&self, message_id: &str, requeue: bool) -> QueueResult<()> {
        let (topic, _) = split_message_id(message_id)?;
        if !self
            .shared
            .pending
            .lock()
            .unwrap()
            .contains_key(message_id)
        {
            return Ok(());
        }
        self.shared
            .counters
            .rejected
            .fetch_add(1, Ordering::Relaxed);
        let target = if requeue {
            topic
        } else {
            topics::DEAD_LETTER.to_string()
        };
        self.shared.settle(message_id, Some(&target)).await
    }

    async fn queue_size(&self, topic: &str) -> QueueResult<usize> {
        let mut conn = self.shared.connection().await?;
        let length: usize = conn.xlen(topic).await.map_err(|e| QueueError::Backend {
            cause: e.to_string(),
        })?;
        Ok(length)
    }

    async fn purge(&self, topic: &str) -> QueueResult<usize> {
        let mut conn = self.shared.connection().await?;
        let length: usize = conn.xlen(topic).await.unwrap_or(0);
        let _: i32 = conn.del(topic).await.map_err(|e| QueueError::Backend {
            cause: e.to_string(),
        })?;
        Ok(length)
    }

    async fn dead_letter_messages(&self, limit: usize) -> QueueResult<Vec<QueueMessage>> {
        let mut conn = self.shared.connection().await?;
        let reply: redis::streams::StreamRangeReply = conn
            .xrevrange_count(topics::DEAD_LETTER, "+", "-", limit)
            .await
            .map_err(|e| QueueError::Backend {
                cause: e.to_string(),
            })?;

        let mut messages: Vec<QueueMessage> = reply
            .ids
            .into_iter()
            .filter_map(|entry| {
                entry
                    .map
                    .get(PAYLOAD_FIELD)
                    .and_then(|v| redis::from_redis_value::<String>(v).ok())
                    .map(|payload| QueueMessage {
                        message_id: make_message_id(topics::DEAD_LETTER, &entry.id),
                        topic: topics::DEAD_LETTER.to_string(),
                        payload,
                        delivery_count: 0,
                        enqueued_at: SystemTime::now(),
                    })
            })
            .collect();
        // XREVRANGE is newest-first; callers expect most recent last
        messages.reverse();
        Ok(messages)
    }

    fn statistics(&self) -> QueueStatistics {
        self.shared.counters.snapshot()
    }

    async fn health_check(&self) -> QueueHealth {
        let start = Instant::now();
        let connected = match self.shared.connection().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .is_ok(),
            Err(_) => false,
        };
        QueueHealth {
            connected,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            backend: "stream",
        }
    }
}
