//! Layered application configuration.
//!
//! Loaded from an optional YAML file plus environment overrides, mirroring the
//! teacher framework's `Config::load`: file source(s) first, then environment
//! variables prefixed and double-underscore nested.

use std::time::Duration;

use serde::Deserialize;

/// Environment variable carrying an explicit config file path.
pub const CONFIG_ENV_VAR: &str = "SAGA_CONFIG";
/// Prefix for environment-variable overrides (`SAGA__STORE__DSN`, etc).
pub const CONFIG_ENV_PREFIX: &str = "SAGA";
/// Default config file name looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Top-level configuration aggregating every module's settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub messaging: MessagingSettings,
    pub store: StoreSettings,
    pub blockchain: BlockchainSettings,
    pub retry: RetrySettings,
    pub saga: SagaSettings,
    pub admin: AdminSettings,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            messaging: MessagingSettings::default(),
            store: StoreSettings::default(),
            blockchain: BlockchainSettings::default(),
            retry: RetrySettings::default(),
            saga: SagaSettings::default(),
            admin: AdminSettings::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources, later overriding earlier:
    /// 1. `config.yaml` in the current directory (if present)
    /// 2. the file named by `path`, if given (required)
    /// 3. the file named by the `SAGA_CONFIG` environment variable, if set (required)
    /// 4. environment variables prefixed `SAGA__` with `__` nesting separators
    pub fn load(path: Option<&str>) -> std::result::Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Configuration for tests: defaults only, no file/env lookup.
    pub fn for_test() -> Self {
        Self::default()
    }
}

/// Messaging backend selection and per-backend connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingSettings {
    #[serde(rename = "type")]
    pub backend: MessagingBackend,
    pub amqp_url: String,
    pub kafka_bootstrap_servers: String,
    pub kafka_group_id: String,
    pub nats_url: String,
    pub nats_stream: String,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            backend: MessagingBackend::Channel,
            amqp_url: "amqp://localhost:5672".to_string(),
            kafka_bootstrap_servers: "localhost:9092".to_string(),
            kafka_group_id: "saga-coordinator".to_string(),
            nats_url: "nats://localhost:4222".to_string(),
            nats_stream: "saga".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingBackend {
    #[default]
    Channel,
    Amqp,
    Kafka,
    Nats,
}

/// Saga/blockchain durable store selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    #[serde(rename = "type")]
    pub backend: StoreBackend,
    pub postgres_dsn: String,
    pub sqlite_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            postgres_dsn: "postgres://localhost:5432/shipment_saga".to_string(),
            sqlite_path: "shipment_saga.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Postgres,
}

/// Blockchain recorder policy knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlockchainSettings {
    pub required_confirmations: u64,
    pub confirmation_interval_secs: u64,
    pub submission_batch_size: usize,
    pub gateway_base_url: Option<String>,
    /// Signing address the Nonce Manager tracks a counter for; this service
    /// runs a single signer, so there is exactly one address to manage.
    pub signing_address: String,
    /// Network name the signing address's nonce counter belongs to, part of
    /// `nonce_state`'s primary key alongside the address.
    pub network: String,
    pub listen_topics: Vec<String>,
    pub target_events: Vec<String>,
    /// Confirmation-poll attempts before a still-unmined transaction is
    /// marked `Dropped` rather than polled forever.
    pub max_poll_attempts: u32,
}

impl Default for BlockchainSettings {
    fn default() -> Self {
        Self {
            required_confirmations: 6,
            confirmation_interval_secs: 15,
            submission_batch_size: 50,
            gateway_base_url: None,
            signing_address: "0xshipmentsaga".to_string(),
            network: "mainnet".to_string(),
            listen_topics: vec![
                "shipment-events".to_string(),
                "delivery-events".to_string(),
                "inventory-events".to_string(),
            ],
            target_events: vec![
                "shipment.created".to_string(),
                "shipment.updated".to_string(),
                "delivery.completed".to_string(),
                "inventory.released".to_string(),
            ],
            max_poll_attempts: 40,
        }
    }
}

impl BlockchainSettings {
    pub fn confirmation_interval(&self) -> Duration {
        Duration::from_secs(self.confirmation_interval_secs)
    }
}

/// Publish retry budget, shared by every `MessagingPort` backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

/// Orchestrator/compensation-worker policy knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SagaSettings {
    pub stuck_saga_threshold_secs: u64,
    pub reaper_sweep_interval_secs: u64,
}

impl Default for SagaSettings {
    fn default() -> Self {
        Self {
            stuck_saga_threshold_secs: 3600,
            reaper_sweep_interval_secs: 60,
        }
    }
}

impl SagaSettings {
    pub fn stuck_saga_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_saga_threshold_secs)
    }

    pub fn reaper_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_sweep_interval_secs)
    }
}

/// Read-only admin HTTP surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    /// 0 = OS-assigned ephemeral port, logged once bound.
    pub port: u16,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_standalone_friendly() {
        let config = Config::default();
        assert_eq!(config.messaging.backend, MessagingBackend::Channel);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn for_test_matches_default() {
        let a = Config::for_test();
        let b = Config::default();
        assert_eq!(a.blockchain.required_confirmations, b.blockchain.required_confirmations);
    }
}
