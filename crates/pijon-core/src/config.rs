use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Wire topics; must match the feeder firmware exactly
pub const FEED_TOPIC: &str = "pijon/feed";
pub const STATUS_TOPIC: &str = "pijon/status";
pub const ACK_TOPIC: &str = "pijon/ack";

pub const DEFAULT_BROKER_URL: &str = "wss://broker.hivemq.com:8884/mqtt";
pub const CLIENT_ID_PREFIX: &str = "PIJON_WEB_";
pub const SILENCE_TIMEOUT_MS: u64 = 10_000; // OFFLINE after 10s without a heartbeat
pub const CONNECT_TIMEOUT_MS: u64 = 10_000; // give up on CONNECTING after 10s
pub const MQTT_CONNECT_TIMEOUT_MS: u64 = 4_000;
pub const MQTT_RECONNECT_PERIOD_MS: u64 = 2_000;
pub const MQTT_KEEP_ALIVE_SECS: u64 = 30;

/// Names the config file when no explicit path is given.
pub const CONFIG_PATH_ENV: &str = "PIJON_CONFIG";

/// Top-level config (pijon.toml + PIJON_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PijonConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

/// Broker connection parameters. Only the transport adapter reads these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// `wss://`, `ws://`, `mqtt://` or `tcp://` URL of the broker.
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Non-persistent session: the broker forgets subscriptions on disconnect.
    #[serde(default = "bool_true")]
    pub clean_session: bool,
    #[serde(default = "default_mqtt_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_period")]
    pub reconnect_period_ms: u64,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            client_id_prefix: default_client_id_prefix(),
            clean_session: true,
            connect_timeout_ms: MQTT_CONNECT_TIMEOUT_MS,
            reconnect_period_ms: MQTT_RECONNECT_PERIOD_MS,
            keep_alive_secs: MQTT_KEEP_ALIVE_SECS,
        }
    }
}

impl BrokerConfig {
    /// Fresh per-session client identifier: prefix + 12 random hex digits.
    pub fn generate_client_id(&self) -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("{}{}", self.client_id_prefix, &hex[..12])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    #[serde(default = "default_feed_topic")]
    pub feed: String,
    #[serde(default = "default_status_topic")]
    pub status: String,
    #[serde(default = "default_ack_topic")]
    pub ack: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            feed: default_feed_topic(),
            status: default_status_topic(),
            ack: default_ack_topic(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Declare OFFLINE this long after the last heartbeat.
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_ms: u64,
    /// Force OFFLINE if still CONNECTING this long after start.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// When false the monitor starts directly in OFFLINE (no CONNECTING phase).
    #[serde(default = "bool_true")]
    pub start_connecting: bool,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: SILENCE_TIMEOUT_MS,
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            start_connecting: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Release a held command lock if no ack arrives within this window.
    /// 0 disables the timeout: the lock then holds until a response arrives.
    #[serde(default)]
    pub response_timeout_ms: u64,
}

impl CommandsConfig {
    pub fn response_timeout(&self) -> Option<std::time::Duration> {
        (self.response_timeout_ms > 0)
            .then(|| std::time::Duration::from_millis(self.response_timeout_ms))
    }
}

fn bool_true() -> bool {
    true
}
fn default_broker_url() -> String {
    DEFAULT_BROKER_URL.to_string()
}
fn default_client_id_prefix() -> String {
    CLIENT_ID_PREFIX.to_string()
}
fn default_mqtt_connect_timeout() -> u64 {
    MQTT_CONNECT_TIMEOUT_MS
}
fn default_reconnect_period() -> u64 {
    MQTT_RECONNECT_PERIOD_MS
}
fn default_keep_alive() -> u64 {
    MQTT_KEEP_ALIVE_SECS
}
fn default_feed_topic() -> String {
    FEED_TOPIC.to_string()
}
fn default_status_topic() -> String {
    STATUS_TOPIC.to_string()
}
fn default_ack_topic() -> String {
    ACK_TOPIC.to_string()
}
fn default_silence_timeout() -> u64 {
    SILENCE_TIMEOUT_MS
}
fn default_connect_timeout() -> u64 {
    CONNECT_TIMEOUT_MS
}

impl PijonConfig {
    /// Load config from a TOML file with PIJON_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. PIJON_CONFIG env var
    ///   3. ~/.pijon/pijon.toml
    ///
    /// Nested keys use a double underscore, e.g. `PIJON_BROKER__URL`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::PijonError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(PijonConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PIJON_").ignore(&["config"]).split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.pijon/pijon.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_device_protocol() {
        let cfg = PijonConfig::default();
        assert_eq!(cfg.topics.feed, "pijon/feed");
        assert_eq!(cfg.topics.status, "pijon/status");
        assert_eq!(cfg.topics.ack, "pijon/ack");
        assert_eq!(cfg.liveness.silence_timeout_ms, 10_000);
        assert_eq!(cfg.liveness.connect_timeout_ms, 10_000);
        assert_eq!(cfg.broker.connect_timeout_ms, 4_000);
        assert_eq!(cfg.broker.reconnect_period_ms, 2_000);
        assert!(cfg.broker.clean_session);
        assert!(cfg.commands.response_timeout().is_none());
    }

    #[test]
    fn client_ids_are_prefixed_and_unique() {
        let broker = BrokerConfig::default();
        let a = broker.generate_client_id();
        let b = broker.generate_client_id();
        assert!(a.starts_with("PIJON_WEB_"));
        assert_eq!(a.len(), "PIJON_WEB_".len() + 12);
        assert_ne!(a, b);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = PijonConfig::load(Some("/nonexistent/pijon.toml")).unwrap();
        assert_eq!(cfg.broker.url, DEFAULT_BROKER_URL);
    }

    #[test]
    fn config_env_var_selects_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
                [broker]
                url = "mqtt://feeder.lan:1883"
                "#,
            )?;
            jail.create_file(
                "explicit.toml",
                r#"
                [broker]
                url = "mqtt://explicit.lan:1883"
                "#,
            )?;
            jail.set_env("PIJON_CONFIG", "custom.toml");

            let cfg = PijonConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(cfg.broker.url, "mqtt://feeder.lan:1883");

            // An explicit path still wins over the env var.
            let cfg = PijonConfig::load(Some("explicit.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.broker.url, "mqtt://explicit.lan:1883");
            Ok(())
        });
    }

    #[test]
    fn env_overrides_nested_keys() {
        Jail::expect_with(|jail| {
            jail.set_env("PIJON_CONFIG", "missing.toml");
            jail.set_env("PIJON_LIVENESS__SILENCE_TIMEOUT_MS", "2500");
            let cfg = PijonConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(cfg.liveness.silence_timeout_ms, 2_500);
            assert_eq!(cfg.broker.url, DEFAULT_BROKER_URL);
            Ok(())
        });
    }

    #[test]
    fn toml_overrides_are_applied() {
        let toml = r#"
            [broker]
            url = "mqtt://localhost:1883"

            [liveness]
            silence_timeout_ms = 2500
            start_connecting = false

            [commands]
            response_timeout_ms = 30000
        "#;
        let cfg: PijonConfig = Figment::from(Serialized::defaults(PijonConfig::default()))
            .merge(Toml::string(toml))
            .extract()
            .unwrap();
        assert_eq!(cfg.broker.url, "mqtt://localhost:1883");
        assert_eq!(cfg.broker.reconnect_period_ms, 2_000);
        assert_eq!(cfg.liveness.silence_timeout_ms, 2_500);
        assert!(!cfg.liveness.start_connecting);
        assert_eq!(
            cfg.commands.response_timeout(),
            Some(std::time::Duration::from_millis(30_000))
        );
    }
}
