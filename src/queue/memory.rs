//! In-Memory Queue
//!
//! Development and test backend: mutex-guarded per-topic buffers, one worker
//! task per subscription, automatic ack on handler success, reject to
//! requeue or dead letter. No persistence; everything dies with the process.

use crate::queue::error::{QueueError, QueueResult};
use crate::queue::message::QueueMessage;
use crate::queue::traits::{
    EventQueue, MessageHandler, QueueCounters, QueueHealth, QueueStatistics,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// How long an idle worker waits before re-checking its stop flag.
const IDLE_POLL: Duration = Duration::from_millis(50);
/// Drain budget per subscription at disconnect.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct Subscription {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    connected: AtomicBool,
    topics: Mutex<HashMap<String, VecDeque<QueueMessage>>>,
    /// message_id -> in-flight message awaiting ack/reject
    pending: Mutex<HashMap<String, QueueMessage>>,
    dead_letter: Mutex<VecDeque<QueueMessage>>,
    counters: QueueCounters,
    notify: Notify,
}

impl Inner {
    fn ensure_connected(&self) -> QueueResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(QueueError::NotConnected)
        }
    }

    fn take_next(&self, topic: &str) -> Option<QueueMessage> {
        let mut topics = self.topics.lock().unwrap();
        topics.get_mut(topic).and_then(|queue| queue.pop_front())
    }

    fn requeue(&self, message: QueueMessage) {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(message.topic.clone())
            .or_default()
            .push_back(message);
        drop(topics);
        self.notify.notify_waiters();
    }

    fn dead_letter(&self, message: QueueMessage) {
        self.dead_letter.lock().unwrap().push_back(message);
        self.counters
            .dead_lettered
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// In-memory implementation of the queue contract.
pub struct InMemoryQueue {
    inner: Arc<Inner>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn worker_loop(
    inner: Arc<Inner>,
    topic: String,
    handler: MessageHandler,
    stop: Arc<AtomicBool>,
) {
    log::debug!("In-memory worker started for topic '{}'", topic);

    while !stop.load(Ordering::Acquire) {
        let Some(mut message) = inner.take_next(&topic) else {
            // Nothing queued; wait for a publish or the poll interval
            tokio::select! {
                _ = inner.notify.notified() => {}
                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
            continue;
        };

        message.delivery_count += 1;
        let message_id = message.message_id.clone();
        inner
            .pending
            .lock()
            .unwrap()
            .insert(message_id.clone(), message.clone());
        inner.counters.consumed.fetch_add(1, Ordering::Relaxed);

        match handler(message).await {
            Ok(()) => {
                // Auto-ack unless the handler already settled the message
                let removed = inner.pending.lock().unwrap().remove(&message_id);
                if removed.is_some() {
                    inner.counters.acked.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(error) => {
                inner
                    .counters
                    .handler_errors
                    .fetch_add(1, Ordering::Relaxed);
                let removed = inner.pending.lock().unwrap().remove(&message_id);
                if let Some(message) = removed {
                    inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    if error.requeue {
                        log::debug!(
                            "Requeueing message {} on '{}': {}",
                            message_id,
                            topic,
                            error
                        );
                        inner.requeue(message);
                    } else {
                        log::debug!(
                            "Dead-lettering message {} from '{}': {}",
                            message_id,
                            topic,
                            error
                        );
                        inner.dead_letter(message);
                    }
                }
            }
        }
    }

    log::debug!("In-memory worker stopped for topic '{}'", topic);
}

#[async_trait::async_trait]
impl EventQueue for InMemoryQueue {
    async fn connect(&self) -> QueueResult<()> {
        if self.inner.connected.swap(true, Ordering::AcqRel) {
            log::warn!("In-memory queue already connected");
        } else {
            log::info!("In-memory queue connected");
        }
        Ok(())
    }

    async fn disconnect(&self) -> QueueResult<()> {
        if !self.inner.connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let drained: Vec<(String, Subscription)> = {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            subscriptions.drain().collect()
        };

        for (_, subscription) in &drained {
            subscription.stop.store(true, Ordering::Release);
        }
        self.inner.notify.notify_waiters();

        for (id, subscription) in drained {
            if tokio::time::timeout(DRAIN_TIMEOUT, subscription.task)
                .await
                .is_err()
            {
                log::warn!("Subscription {} did not drain within {:?}", id, DRAIN_TIMEOUT);
            }
            self.inner
                .counters
                .subscriptions
                .fetch_sub(1, Ordering::Relaxed);
        }

        log::info!("In-memory queue disconnected");
        Ok(())
    }

    async fn publish(&self, topic: &str, mut message: QueueMessage) -> QueueResult<String> {
        self.inner.ensure_connected()?;

        message.topic = topic.to_string();
        let message_id = message.message_id.clone();
        {
            let mut topics = self.inner.topics.lock().unwrap();
            topics.entry(topic.to_string()).or_default().push_back(message);
        }
        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);
        self.inner.notify.notify_waiters();

        log::trace!("Published message {} to topic '{}'", message_id, topic);
        Ok(message_id)
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> QueueResult<String> {
        self.inner.ensure_connected()?;

        let subscription_id = uuid::Uuid::new_v4().to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(worker_loop(
            Arc::clone(&self.inner),
            topic.to_string(),
            handler,
            Arc::clone(&stop),
        ));

        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription_id.clone(), Subscription { stop, task });
        self.inner
            .counters
            .subscriptions
            .fetch_add(1, Ordering::Relaxed);

        log::debug!("Subscribed {} to topic '{}'", subscription_id, topic);
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
        self.inner.notify.notify_waiters();
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, subscription.task).await;
        self.inner
            .counters
            .subscriptions
            .fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        // Idempotent: acking an already-settled message is a no-op, which is
        // what at-least-once redelivery needs.
        let removed = self.inner.pending.lock().unwrap().remove(message_id);
        if removed.is_some() {
            self.inner.counters.acked.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn reject(&self, message_id: &str, requeue: bool) -> QueueResult<()> {
        let removed = self.inner.pending.lock().unwrap().remove(message_id);
        let Some(message) = removed else {
            return Ok(());
        };

        self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
        if requeue {
            self.inner.requeue(message);
        } else {
            self.inner.dead_letter(message);
        }
        Ok(())
    }

    async fn queue_size(&self, topic: &str) -> QueueResult<usize> {
        let topics = self.inner.topics.lock().unwrap();
        Ok(topics.get(topic).map(|q| q.len()).unwrap_or(0))
    }

    async fn purge(&self, topic: &str) -> QueueResult<usize> {
        let mut topics = self.inner.topics.lock().unwrap();
        let count = topics.get_mut(topic).map(|q| {
            let n = q.len();
            q.clear();
            n
        });
        Ok(count.unwrap_or(0))
    }

    async fn dead_letter_messages(&self, limit: usize) -> QueueResult<Vec<QueueMessage>> {
        let dead_letter = self.inner.dead_letter.lock().unwrap();
        let skip = dead_letter.len().saturating_sub(limit);
        Ok(dead_letter.iter().skip(skip).cloned().collect())
    }

    fn statistics(&self) -> QueueStatistics {
        self.inner.counters.snapshot()
    }

    async fn health_check(&self) -> QueueHealth {
        QueueHealth {
            connected: self.inner.connected.load(Ordering::Acquire),
            latency_ms: 0.0,
            backend: "memory",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::traits::HandlerError;
    use std::sync::atomic::AtomicU32;
    use tokio::time::{sleep, timeout};

    fn counting_handler(
        counter: Arc<AtomicU32>,
        result: impl Fn(u32) -> Result<(), HandlerError> + Send + Sync + 'static,
    ) -> MessageHandler {
        Arc::new(move |_message| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let outcome = result(n);
            Box::pin(async move { outcome })
        })
    }

    async fn wait_until(check: impl Fn() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !check() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let queue = InMemoryQueue::new();
        let err = queue
            .publish("listings.raw", QueueMessage::new("listings.raw", "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotConnected));
    }

    #[tokio::test]
    async fn test_publish_and_consume_with_auto_ack() {
        let queue = InMemoryQueue::new();
        queue.connect().await.unwrap();

        let seen = Arc::new(AtomicU32::new(0));
        queue
            .subscribe("listings.raw", counting_handler(seen.clone(), |_| Ok(())))
            .await
            .unwrap();

        queue
            .publish("listings.raw", QueueMessage::new("listings.raw", "{\"n\":1}"))
            .await
            .unwrap();

        wait_until(|| seen.load(Ordering::SeqCst) == 1).await;
        wait_until(|| queue.statistics().messages_acked == 1).await;

        let stats = queue.statistics();
        assert_eq!(stats.messages_published, 1);
        assert_eq!(stats.messages_consumed, 1);
        assert_eq!(stats.messages_rejected, 0);
        queue.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_error_with_requeue_redelivers() {
        let queue = InMemoryQueue::new();
        queue.connect().await.unwrap();

        let attempts = Arc::new(AtomicU32::new(0));
        queue
            .subscribe(
                "listings.raw",
                counting_handler(attempts.clone(), |n| {
                    if n < 3 {
                        Err(HandlerError::requeue("flaky"))
                    } else {
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        queue
            .publish("listings.raw", QueueMessage::new("listings.raw", "{}"))
            .await
            .unwrap();

        wait_until(|| attempts.load(Ordering::SeqCst) >= 3).await;
        wait_until(|| queue.statistics().messages_acked == 1).await;

        // Redelivered twice, no dead letters
        assert_eq!(queue.dead_letter_messages(10).await.unwrap().len(), 0);
        queue.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_discard_goes_to_dead_letter() {
        let queue = InMemoryQueue::new();
        queue.connect().await.unwrap();

        let attempts = Arc::new(AtomicU32::new(0));
        queue
            .subscribe(
                "listings.raw",
                counting_handler(attempts.clone(), |_| Err(HandlerError::discard("poison"))),
            )
            .await
            .unwrap();

        queue
            .publish("listings.raw", QueueMessage::new("listings.raw", "{\"bad\":1}"))
            .await
            .unwrap();

        wait_until(|| queue.statistics().dead_lettered == 1).await;

        let dead = queue.dead_letter_messages(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, "{\"bad\":1}");
        assert_eq!(dead[0].delivery_count, 1);
        // Delivered exactly once; discard does not retry
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        queue.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_messages_distributed_across_competing_subscribers() {
        let queue = InMemoryQueue::new();
        queue.connect().await.unwrap();

        let total = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            queue
                .subscribe("listings.raw", counting_handler(total.clone(), |_| Ok(())))
                .await
                .unwrap();
        }

        for i in 0..30 {
            queue
                .publish(
                    "listings.raw",
                    QueueMessage::new("listings.raw", format!("{{\"n\":{}}}", i)),
                )
                .await
                .unwrap();
        }

        // Each message goes to exactly one worker
        wait_until(|| total.load(Ordering::SeqCst) == 30).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(total.load(Ordering::SeqCst), 30);
        queue.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let queue = InMemoryQueue::new();
        queue.connect().await.unwrap();

        let raw_seen = Arc::new(AtomicU32::new(0));
        queue
            .subscribe("listings.raw", counting_handler(raw_seen.clone(), |_| Ok(())))
            .await
            .unwrap();

        queue
            .publish("fraud.detected", QueueMessage::new("fraud.detected", "{}"))
            .await
            .unwrap();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(raw_seen.load(Ordering::SeqCst), 0);
        assert_eq!(queue.queue_size("fraud.detected").await.unwrap(), 1);
        queue.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_drops_queued_messages() {
        let queue = InMemoryQueue::new();
        queue.connect().await.unwrap();

        for _ in 0..5 {
            queue
                .publish("listings.raw", QueueMessage::new("listings.raw", "{}"))
                .await
                .unwrap();
        }
        assert_eq!(queue.queue_size("listings.raw").await.unwrap(), 5);
        assert_eq!(queue.purge("listings.raw").await.unwrap(), 5);
        assert_eq!(queue.queue_size("listings.raw").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_worker() {
        let queue = InMemoryQueue::new();
        queue.connect().await.unwrap();

        let seen = Arc::new(AtomicU32::new(0));
        let subscription_id = queue
            .subscribe("listings.raw", counting_handler(seen.clone(), |_| Ok(())))
            .await
            .unwrap();
        queue.unsubscribe(&subscription_id).await.unwrap();

        queue
            .publish("listings.raw", QueueMessage::new("listings.raw", "{}"))
            .await
            .unwrap();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        let err = queue.unsubscribe(&subscription_id).await.unwrap_err();
        assert!(matches!(err, QueueError::SubscriptionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_health_check_reflects_connection() {
        let queue = InMemoryQueue::new();
        assert!(!queue.health_check().await.connected);
        queue.connect().await.unwrap();
        let health = queue.health_check().await;
        assert!(health.connected);
        assert_eq!(health.backend, "memory");
    }

    #[tokio::test]
    async fn test_delivery_count_increments_on_redelivery() {
        let queue = InMemoryQueue::new();
        queue.connect().await.unwrap();

        let counts: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let observed = counts.clone();
        let handler: MessageHandler = Arc::new(move |message| {
            let observed = observed.clone();
            Box::pin(async move {
                observed.lock().unwrap().push(message.delivery_count);
                if message.delivery_count < 2 {
                    Err(HandlerError::requeue("again"))
                } else {
                    Ok(())
                }
            })
        });
        queue.subscribe("listings.raw", handler).await.unwrap();

        queue
            .publish("listings.raw", QueueMessage::new("listings.raw", "{}"))
            .await
            .unwrap();

        wait_until(|| counts.lock().unwrap().len() >= 2).await;
        let seen = counts.lock().unwrap().clone();
        assert_eq!(&seen[..2], &[1, 2]);
        queue.disconnect().await.unwrap();
    }
}
