use thiserror::Error;

/// Errors that can occur within a transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The outbound message could not be queued.
    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// The subscription request could not be queued.
    #[error("Subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// The configured broker URL is not usable.
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),

    /// The adapter has been disconnected and accepts no more work.
    #[error("Transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
