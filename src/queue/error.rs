//! Queue Error Types

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is not connected")]
    NotConnected,

    #[error("failed to connect to queue backend: {cause}")]
    ConnectionFailed { cause: String },

    #[error("failed to publish to topic '{topic}': {cause}")]
    PublishFailed { topic: String, cause: String },

    #[error("subscription not found: {subscription_id}")]
    SubscriptionNotFound { subscription_id: String },

    #[error("message not found: {message_id}")]
    MessageNotFound { message_id: String },

    #[error("message payload is not valid JSON: {cause}")]
    Serialization { cause: String },

    #[error("queue backend error: {cause}")]
    Backend { cause: String },

    #[error("operation timed out: {operation}")]
    Timeout { operation: String },
}

impl crate::core::error_handling::ContextualError for QueueError {
    fn is_user_actionable(&self) -> bool {
        match self {
            QueueError::ConnectionFailed { .. } => true, // operator can fix the broker URL
            QueueError::NotConnected => true,
            QueueError::PublishFailed { .. } => false,
            QueueError::SubscriptionNotFound { .. } => false,
            QueueError::MessageNotFound { .. } => false,
            QueueError::Serialization { .. } => false,
            QueueError::Backend { .. } => false,
            QueueError::Timeout { .. } => false,
        }
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            QueueError::ConnectionFailed { .. } | QueueError::NotConnected => {
                Some("Queue backend unreachable. Check the broker URL and that the broker is running.")
            }
            _ => None,
        }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
