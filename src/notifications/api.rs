//! Public API for the notification system

pub use crate::notifications::error::{NotificationError, NotificationResult};
pub use crate::notifications::event::{
    Event, EventFilter, PluginEvent, PluginEventType, QueueEvent, QueueEventType, SystemEvent,
    SystemEventType,
};
pub use crate::notifications::manager::{AsyncNotificationManager, EventReceiver};
