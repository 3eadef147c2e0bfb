//! Event types for the notification system
//!
//! These are the control-plane lifecycle events (observability bus), not the
//! data-plane listing events that flow through the queue.

use std::time::SystemTime;

#[derive(Clone, Debug, PartialEq)]
pub enum SystemEventType {
    Startup,
    Shutdown,
    ForceShutdown,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PluginEventType {
    Registered,
    Configured,
    Enabled,
    Disabled,
    Reloaded,
    Failed,
    Unregistered,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueueEventType {
    Connected,
    Disconnected,
    DeadLettered,
}

#[derive(Clone, Debug)]
pub struct SystemEvent {
    pub event_type: SystemEventType,
    pub timestamp: SystemTime,
    pub message: Option<String>,
}

impl SystemEvent {
    pub fn new(event_type: SystemEventType) -> Self {
        Self {
            event_type,
            timestamp: SystemTime::now(),
            message: None,
        }
    }

    pub fn with_message(event_type: SystemEventType, message: String) -> Self {
        Self {
            event_type,
            timestamp: SystemTime::now(),
            message: Some(message),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PluginEvent {
    pub event_type: PluginEventType,
    pub timestamp: SystemTime,
    pub plugin_id: String,
    pub message: Option<String>,
}

impl PluginEvent {
    pub fn new(event_type: PluginEventType, plugin_id: String) -> Self {
        Self {
            event_type,
            timestamp: SystemTime::now(),
            plugin_id,
            message: None,
        }
    }

    pub fn with_message(event_type: PluginEventType, plugin_id: String, message: String) -> Self {
        Self {
            event_type,
            timestamp: SystemTime::now(),
            plugin_id,
            message: Some(message),
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueEvent {
    pub event_type: QueueEventType,
    pub timestamp: SystemTime,
    pub topic: Option<String>,
    pub message: Option<String>,
}

impl QueueEvent {
    pub fn new(event_type: QueueEventType) -> Self {
        Self {
            event_type,
            timestamp: SystemTime::now(),
            topic: None,
            message: None,
        }
    }

    pub fn for_topic(event_type: QueueEventType, topic: String) -> Self {
        Self {
            event_type,
            timestamp: SystemTime::now(),
            topic: Some(topic),
            message: None,
        }
    }
}

/// Events that can be published on the notification bus
#[derive(Clone, Debug)]
pub enum Event {
    System(SystemEvent),
    Plugin(PluginEvent),
    Queue(QueueEvent),
}

/// Subscriber-side filtering
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventFilter {
    All,
    SystemOnly,
    PluginOnly,
    QueueOnly,
}

impl Event {
    pub fn matches(&self, filter: EventFilter) -> bool {
        matches!(
            (self, filter),
            (_, EventFilter::All)
                | (Event::System(_), EventFilter::SystemOnly)
                | (Event::Plugin(_), EventFilter::PluginOnly)
                | (Event::Queue(_), EventFilter::QueueOnly)
        )
    }
}
