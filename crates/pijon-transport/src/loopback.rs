//! In-process bus with the same slot semantics as the MQTT adapter.
//!
//! Nothing leaves the process: publishes are recorded in order and inbound
//! traffic is injected with [`LoopbackTransport::deliver`]. Used by tests and
//! by the CLI's `--loopback` mode to exercise the controller without a broker.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::{
    error::TransportError,
    transport::{LinkStatus, MessageHandler, Transport},
};

pub struct LoopbackTransport {
    slots: DashMap<String, MessageHandler>,
    published: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            published: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Simulate an inbound message. Returns `false` when no handler is
    /// subscribed to `topic` (the message is dropped, as on a real broker).
    pub fn deliver(&self, topic: &str, payload: &str) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        // Clone the handler out so the shard lock is released before the
        // callback runs; handlers may subscribe or publish re-entrantly.
        let handler = self.slots.get(topic).map(|h| h.value().clone());
        match handler {
            Some(h) => {
                h(payload);
                true
            }
            None => {
                debug!(%topic, "loopback: no subscriber, message dropped");
                false
            }
        }
    }

    /// Every `(topic, payload)` published so far, oldest first.
    pub fn published(&self) -> Vec<(String, String)> {
        self.lock_published().clone()
    }

    /// Payloads published on `topic`, oldest first.
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.lock_published()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Drain the publish log.
    pub fn take_published(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.lock_published())
    }

    pub fn has_subscriber(&self, topic: &str) -> bool {
        self.slots.contains_key(topic)
    }

    fn lock_published(&self) -> std::sync::MutexGuard<'_, Vec<(String, String)>> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn name(&self) -> &str {
        "loopback"
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        debug!(%topic, %payload, "loopback publish");
        self.lock_published()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.slots.insert(topic.to_string(), handler).is_some() {
            debug!(%topic, "loopback: replaced existing handler");
        }
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.slots.remove(topic);
        Ok(())
    }

    fn unsubscribe_handler(
        &self,
        topic: &str,
        handler: &MessageHandler,
    ) -> Result<bool, TransportError> {
        let removed = self
            .slots
            .remove_if(topic, |_, current| Arc::ptr_eq(current, handler))
            .is_some();
        if !removed {
            debug!(%topic, "loopback: slot owned by another handler, kept");
        }
        Ok(removed)
    }

    fn link_status(&self) -> LinkStatus {
        if self.closed.load(Ordering::SeqCst) {
            LinkStatus::Disconnected
        } else {
            LinkStatus::Connected
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.slots.clear();
        info!("loopback transport closed");
        Ok(())
    }
}
