//! Async Notification Manager
//!
//! Fan-out of lifecycle events to registered subscribers over unbounded
//! channels. Publishing never blocks; subscribers whose receiver has been
//! dropped are pruned on the next publish.

use crate::notifications::error::NotificationError;
use crate::notifications::event::{Event, EventFilter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receiving half handed to a subscriber.
pub type EventReceiver = mpsc::UnboundedReceiver<Arc<Event>>;

struct Subscriber {
    filter: EventFilter,
    source: String,
    sender: mpsc::UnboundedSender<Arc<Event>>,
}

/// Central notification manager
#[derive(Default)]
pub struct AsyncNotificationManager {
    subscribers: HashMap<String, Subscriber>,
}

impl AsyncNotificationManager {
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
        }
    }

    /// Subscribe under a unique id. The `source` string identifies the
    /// component for diagnostics.
    pub fn subscribe(
        &mut self,
        subscriber_id: String,
        filter: EventFilter,
        source: String,
    ) -> Result<EventReceiver, NotificationError> {
        if self.subscribers.contains_key(&subscriber_id) {
            return Err(NotificationError::DuplicateSubscriber { subscriber_id });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.insert(
            subscriber_id,
            Subscriber {
                filter,
                source,
                sender,
            },
        );
        Ok(receiver)
    }

    pub fn unsubscribe(&mut self, subscriber_id: &str) -> Result<(), NotificationError> {
        self.subscribers
            .remove(subscriber_id)
            .map(|_| ())
            .ok_or_else(|| NotificationError::UnknownSubscriber {
                subscriber_id: subscriber_id.to_string(),
            })
    }

    /// Publish an event to all matching subscribers. Dead receivers are
    /// dropped; delivery to live ones cannot fail.
    pub async fn publish(&mut self, event: Event) -> Result<usize, NotificationError> {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut dead: Vec<String> = Vec::new();

        for (id, subscriber) in &self.subscribers {
            if !event.matches(subscriber.filter) {
                continue;
            }
            match subscriber.sender.send(Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    log::trace!(
                        "Pruning dead subscriber '{}' (source: {})",
                        id,
                        subscriber.source
                    );
                    dead.push(id.clone());
                }
            }
        }

        for id in dead {
            self.subscribers.remove(&id);
        }

        Ok(delivered)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
