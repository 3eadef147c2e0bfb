//! Notification Error Types

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("subscriber '{subscriber_id}' already exists")]
    DuplicateSubscriber { subscriber_id: String },

    #[error("subscriber '{subscriber_id}' not found")]
    UnknownSubscriber { subscriber_id: String },
}

pub type NotificationResult<T> = Result<T, NotificationError>;
