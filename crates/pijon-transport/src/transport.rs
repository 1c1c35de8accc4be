use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;

/// Callback invoked with the UTF-8 payload of every message on a topic.
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Common interface implemented by every publish/subscribe adapter.
///
/// Implementations must be `Send + Sync` so a single adapter can be shared
/// between the controller, timer tasks and the adapter's own event loop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable lowercase identifier (e.g. `"mqtt"`), used in logs.
    fn name(&self) -> &str;

    /// Queue `payload` for delivery on `topic`.
    ///
    /// Never waits for the broker: delivery is at-most-once and no
    /// acknowledgement is reported back.
    fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError>;

    /// Route every message on `topic` to `handler`.
    ///
    /// Each topic has a single handler slot; subscribing again replaces the
    /// previous handler. Adapters re-establish the subscription after every
    /// reconnect without duplicating it.
    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), TransportError>;

    /// Clear the handler slot for `topic`. Unknown topics are a no-op.
    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Clear the slot for `topic` only while it still holds `handler`.
    ///
    /// Returns `false` when the slot is empty or owned by a later subscriber,
    /// which is left untouched.
    fn unsubscribe_handler(
        &self,
        topic: &str,
        handler: &MessageHandler,
    ) -> Result<bool, TransportError>;

    /// Current state of the link to the broker.
    fn link_status(&self) -> LinkStatus;

    /// Close the connection; afterwards no handler is invoked.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Runtime state of the broker link. Says nothing about the feeder itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkStatus::Connecting => write!(f, "connecting"),
            LinkStatus::Connected => write!(f, "connected"),
            LinkStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}
