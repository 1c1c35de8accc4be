//! MQTT adapter built on `rumqttc`.
//!
//! The event loop runs on its own Tokio task for the lifetime of the adapter.
//! Connection failures are never surfaced to callers: the loop waits
//! `reconnect_period_ms` and tries again, forever, until [`Transport::disconnect`].
//! Every successful CONNACK re-subscribes all topics currently holding a
//! handler, so a clean-session broker never loses routes across reconnects.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pijon_core::config::BrokerConfig;

use crate::{
    error::{Result, TransportError},
    transport::{LinkStatus, MessageHandler, Transport},
};

/// Bound on requests queued towards the event loop.
const REQUEST_CAPACITY: usize = 64;
/// rumqttc rejects keep-alive intervals shorter than this.
const MIN_KEEP_ALIVE_SECS: u64 = 5;
/// How long `disconnect` waits for the DISCONNECT packet to be flushed.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Wire scheme of the broker URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl Scheme {
    fn default_port(&self) -> u16 {
        match self {
            Scheme::Tcp => 1883,
            Scheme::Tls => 8883,
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }
}

/// Broker address split out of a `scheme://host[:port][/path]` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Websocket path including the leading `/`; empty for raw MQTT.
    pub path: String,
}

impl BrokerEndpoint {
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => Scheme::Tcp,
            "mqtts" | "ssl" | "tls" => Scheme::Tls,
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            _ => return Err(TransportError::InvalidUrl(url.to_string())),
        };

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], rest[i..].to_string()),
            None => (rest, String::new()),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| TransportError::InvalidUrl(url.to_string()))?;
                (host, port)
            }
            None => (authority, scheme.default_port()),
        };
        if host.is_empty() {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path,
        })
    }

    /// Canonical URL form; rumqttc expects this as the host for websockets.
    pub fn url(&self) -> String {
        let scheme = match self.scheme {
            Scheme::Tcp => "mqtt",
            Scheme::Tls => "mqtts",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
    }

    fn mqtt_options(&self, client_id: &str, config: &BrokerConfig) -> MqttOptions {
        let host = match self.scheme {
            Scheme::Tcp | Scheme::Tls => self.host.clone(),
            Scheme::Ws | Scheme::Wss => self.url(),
        };
        let mut opts = MqttOptions::new(client_id, host, self.port);
        opts.set_keep_alive(Duration::from_secs(
            config.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
        ));
        opts.set_clean_session(config.clean_session);
        match self.scheme {
            Scheme::Tcp => {}
            Scheme::Tls => {
                opts.set_transport(rumqttc::Transport::tls_with_default_config());
            }
            Scheme::Ws => {
                opts.set_transport(rumqttc::Transport::Ws);
            }
            Scheme::Wss => {
                opts.set_transport(rumqttc::Transport::wss_with_default_config());
            }
        }
        opts
    }
}

/// State shared between the adapter handle and its event loop task.
struct Shared {
    slots: DashMap<String, MessageHandler>,
    status: Mutex<LinkStatus>,
    closed: AtomicBool,
}

impl Shared {
    fn status(&self) -> LinkStatus {
        *self.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_status(&self, status: LinkStatus) {
        *self.status.lock().unwrap_or_else(|p| p.into_inner()) = status;
    }

    /// Install `handler` in the slot for `topic`. Returns whether a SUBSCRIBE
    /// must go out now; a replaced slot is already subscribed and while the
    /// link is down the next CONNACK covers it.
    fn install(&self, topic: &str, handler: MessageHandler) -> bool {
        let replaced = self.slots.insert(topic.to_string(), handler).is_some();
        if replaced {
            debug!(%topic, "mqtt: replaced existing handler");
        }
        !replaced && self.status() == LinkStatus::Connected
    }

    /// Mark the link up and list every topic that needs a SUBSCRIBE, once
    /// each, in a stable order.
    fn on_connack(&self) -> Vec<String> {
        self.set_status(LinkStatus::Connected);
        let mut topics: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        topics
    }

    fn dispatch(&self, topic: &str, payload: &str) {
        // Release the shard lock before running the callback.
        let handler = self.slots.get(topic).map(|h| h.value().clone());
        match handler {
            Some(h) => h(payload),
            None => debug!(%topic, "mqtt: message on topic without handler"),
        }
    }
}

/// Publish/subscribe adapter for a real MQTT broker.
pub struct MqttTransport {
    client: AsyncClient,
    client_id: String,
    shared: Arc<Shared>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Start connecting to the configured broker. Must be called inside a
    /// Tokio runtime; returns immediately while the link comes up in the
    /// background.
    pub fn connect(config: &BrokerConfig) -> Result<Self> {
        let endpoint = BrokerEndpoint::parse(&config.url)?;
        let client_id = config.generate_client_id();
        let opts = endpoint.mqtt_options(&client_id, config);
        let (client, eventloop) = AsyncClient::new(opts, REQUEST_CAPACITY);

        let shared = Arc::new(Shared {
            slots: DashMap::new(),
            status: Mutex::new(LinkStatus::Connecting),
            closed: AtomicBool::new(false),
        });

        info!(url = %endpoint.url(), %client_id, "connecting to MQTT broker");
        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            Arc::clone(&shared),
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.reconnect_period_ms),
        ));

        Ok(Self {
            client,
            client_id,
            shared,
            event_loop: Mutex::new(Some(task)),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.ensure_open()?;
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        debug!(%topic, %payload, "mqtt publish queued");
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<()> {
        self.ensure_open()?;
        if self.shared.install(topic, handler) {
            self.client
                .try_subscribe(topic, QoS::AtMostOnce)
                .map_err(|e| TransportError::SubscribeFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<()> {
        let removed = self.shared.slots.remove(topic).is_some();
        if removed
            && !self.shared.closed.load(Ordering::SeqCst)
            && self.shared.status() == LinkStatus::Connected
        {
            if let Err(e) = self.client.try_unsubscribe(topic) {
                warn!(%topic, error = %e, "mqtt unsubscribe could not be queued");
            }
        }
        Ok(())
    }

    fn unsubscribe_handler(&self, topic: &str, handler: &MessageHandler) -> Result<bool> {
        let removed = self
            .shared
            .slots
            .remove_if(topic, |_, current| Arc::ptr_eq(current, handler))
            .is_some();
        if !removed {
            debug!(%topic, "mqtt: slot owned by another handler, kept");
            return Ok(false);
        }
        if !self.shared.closed.load(Ordering::SeqCst)
            && self.shared.status() == LinkStatus::Connected
        {
            if let Err(e) = self.client.try_unsubscribe(topic) {
                warn!(%topic, error = %e, "mqtt unsubscribe could not be queued");
            }
        }
        Ok(true)
    }

    fn link_status(&self) -> LinkStatus {
        self.shared.status()
    }

    async fn disconnect(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.slots.clear();
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "mqtt disconnect request failed");
        }

        let task = self
            .event_loop
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(mut task) = task {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
        self.shared.set_status(LinkStatus::Disconnected);
        info!(client_id = %self.client_id, "disconnected from MQTT broker");
        Ok(())
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    shared: Arc<Shared>,
    connect_timeout: Duration,
    reconnect_period: Duration,
) {
    loop {
        let polled = if shared.status() == LinkStatus::Connected {
            eventloop.poll().await
        } else {
            match tokio::time::timeout(connect_timeout, eventloop.poll()).await {
                Ok(polled) => polled,
                Err(_) => {
                    if shared.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!(
                        timeout_ms = connect_timeout.as_millis() as u64,
                        "MQTT connect timed out, retrying"
                    );
                    tokio::time::sleep(reconnect_period).await;
                    continue;
                }
            }
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                resubscribe_all(&client, shared.on_connack());
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload);
                shared.dispatch(&publish.topic, &payload);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                if shared.closed.load(Ordering::SeqCst) {
                    break;
                }
                error!("MQTT error: {e}");
                shared.set_status(LinkStatus::Connecting);
                tokio::time::sleep(reconnect_period).await;
            }
        }
    }
    shared.set_status(LinkStatus::Disconnected);
    debug!("mqtt event loop stopped");
}

/// Re-issue SUBSCRIBE for every topic that currently has a handler.
fn resubscribe_all(client: &AsyncClient, topics: Vec<String>) {
    for topic in topics {
        match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            Ok(()) => debug!(%topic, "mqtt subscribed"),
            Err(e) => error!(%topic, error = %e, "mqtt resubscribe failed"),
        }
    }
}
