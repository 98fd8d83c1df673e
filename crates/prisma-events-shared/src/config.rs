//! Configuration management for prisma-events

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Topic namespace used when none is configured
pub const DEFAULT_TOPIC_PREFIX: &str = "prisma/events";

/// Environment variable prefix, e.g. `PRISMA_EVENTS__BROKER__BROKER_URL`
pub const ENV_PREFIX: &str = "PRISMA_EVENTS";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broker configuration; absent means local dispatch only
    pub broker: Option<BrokerConfig>,

    /// Default emission flags for mutations that carry none
    pub emit: EmitConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Gates all broker activity
    pub enabled: bool,

    /// `mqtt://`, `mqtts://`, `ws://` or `wss://` URL
    pub broker_url: String,

    /// Overrides the default topic namespace
    pub topic_prefix: Option<String>,

    /// Connection options passed through to the broker client
    pub options: BrokerOptions,

    /// How long a published event id is remembered for loop-back suppression (ms)
    pub dedup_ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerOptions {
    /// Publisher identity; the subscriber uses `{client_id}-subscriber`
    pub client_id: Option<String>,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,

    pub clean_session: bool,

    /// Pause before the client reconnects after a connection error (ms)
    pub reconnect_period_ms: u64,

    /// Upper bound on connect and publish waits (ms)
    pub connect_timeout_ms: u64,

    /// Capacity of the client request queue
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitConfig {
    /// Run local listeners by default
    pub local: bool,

    /// Publish to the broker by default
    pub remote: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json or pretty)
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    pub enabled: bool,

    /// Prometheus scrape endpoint bind address
    pub bind_address: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broker_url: "mqtt://localhost:1883".to_string(),
            topic_prefix: None,
            options: BrokerOptions::default(),
            dedup_ttl_ms: 5_000,
        }
    }
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: 30,
            clean_session: true,
            reconnect_period_ms: 1_000,
            connect_timeout_ms: 30_000,
            channel_capacity: 64,
        }
    }
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            local: true,
            remote: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            ..Default::default()
        }
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = Some(prefix.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.options.client_id = Some(client_id.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Configured prefix, or [`DEFAULT_TOPIC_PREFIX`]
    pub fn topic_prefix(&self) -> &str {
        self.topic_prefix
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_TOPIC_PREFIX)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.options.connect_timeout_ms)
    }

    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.options.reconnect_period_ms)
    }
}

impl EventsConfig {
    /// Load configuration from `prisma-events.toml` and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("prisma-events.toml")
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&EventsConfig::default())?);

        if path.as_ref().exists() {
            builder = builder.add_source(File::from(path.as_ref()));
        }

        builder
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    /// Load configuration from TOML text layered over the defaults
    pub fn load_from_str(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&EventsConfig::default())?)
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Load configuration from environment variables only
    pub fn load_from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&EventsConfig::default())?)
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EventsConfig::default();
        assert!(config.broker.is_none());
        assert!(config.emit.local);
        assert!(config.emit.remote);
        assert_eq!(config.observability.logging.level, "info");
    }

    #[test]
    fn test_broker_defaults() {
        let broker = BrokerConfig::new("mqtts://broker.example.com");
        assert!(broker.enabled);
        assert_eq!(broker.topic_prefix(), DEFAULT_TOPIC_PREFIX);
        assert_eq!(broker.dedup_ttl(), Duration::from_secs(5));

        let broker = broker.with_topic_prefix("acme/db");
        assert_eq!(broker.topic_prefix(), "acme/db");

        let broker = broker.with_topic_prefix("");
        assert_eq!(broker.topic_prefix(), DEFAULT_TOPIC_PREFIX);
    }

    #[test]
    fn test_load_from_toml() {
        let config = EventsConfig::load_from_str(
            r#"
            [broker]
            enabled = false
            broker_url = "ws://localhost:8083/mqtt"
            topic_prefix = "shop/events"

            [broker.options]
            client_id = "api-1"

            [emit]
            remote = false
            "#,
        )
        .unwrap();

        let broker = config.broker.expect("broker section");
        assert!(!broker.enabled);
        assert_eq!(broker.broker_url, "ws://localhost:8083/mqtt");
        assert_eq!(broker.topic_prefix(), "shop/events");
        assert_eq!(broker.options.client_id.as_deref(), Some("api-1"));
        assert_eq!(broker.options.keep_alive_secs, 30);
        assert!(config.emit.local);
        assert!(!config.emit.remote);
    }

    #[test]
    fn test_config_serialization() {
        let config = EventsConfig {
            broker: Some(BrokerConfig::new("mqtt://localhost:1883")),
            ..Default::default()
        };
        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: EventsConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(
            deserialized.broker.unwrap().broker_url,
            "mqtt://localhost:1883"
        );
    }
}
