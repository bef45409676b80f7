//! Wires a `Config` into concrete trait-object backends for the two
//! binaries. Kept separate from `main.rs` so both entry points build the
//! same messaging/store stack from one place.

use std::sync::Arc;

use tracing::info;

use crate::blockchain::gateway::{BlockchainGateway, HttpBlockchainGateway, MockBlockchainGateway};
use crate::blockchain::nonce_store::NonceStore;
use crate::blockchain::store::BlockchainStore;
use crate::config::{Config, MessagingBackend, StoreBackend};
use crate::error::{CoreError, Result};
use crate::messaging::{ChannelMessagingPort, MessagingPort, RetryConfig};
use crate::store::SagaStore;

pub async fn build_messaging_port(config: &Config) -> Result<Arc<dyn MessagingPort>> {
    let retry = RetryConfig::from_settings(&config.retry);

    match config.messaging.backend {
        MessagingBackend::Channel => {
            info!("messaging backend: in-memory channel");
            Ok(Arc::new(ChannelMessagingPort::new()))
        }
        MessagingBackend::Amqp => {
            #[cfg(feature = "amqp")]
            {
                info!(url = %config.messaging.amqp_url, "messaging backend: AMQP");
                let port = crate::messaging::amqp::AmqpMessagingPort::connect(&config.messaging.amqp_url, retry).await?;
                Ok(Arc::new(port))
            }
            #[cfg(not(feature = "amqp"))]
            Err(CoreError::Messaging(crate::messaging::MessagingError::BackendUnavailable("amqp")))
        }
        MessagingBackend::Kafka => {
            #[cfg(feature = "kafka")]
            {
                info!(
                    bootstrap_servers = %config.messaging.kafka_bootstrap_servers,
                    "messaging backend: Kafka"
                );
                let port = crate::messaging::kafka::KafkaMessagingPort::connect(
                    &config.messaging.kafka_bootstrap_servers,
                    &config.messaging.kafka_group_id,
                    retry,
                )?;
                Ok(Arc::new(port))
            }
            #[cfg(not(feature = "kafka"))]
            Err(CoreError::Messaging(crate::messaging::MessagingError::BackendUnavailable("kafka")))
        }
        MessagingBackend::Nats => {
            #[cfg(feature = "nats")]
            {
                info!(url = %config.messaging.nats_url, "messaging backend: NATS JetStream");
                let port = crate::messaging::nats::NatsMessagingPort::connect(&config.messaging.nats_url, retry).await?;
                Ok(Arc::new(port))
            }
            #[cfg(not(feature = "nats"))]
            Err(CoreError::Messaging(crate::messaging::MessagingError::BackendUnavailable("nats")))
        }
    }
}

pub async fn build_saga_store(config: &Config) -> Result<Arc<dyn SagaStore>> {
    match config.store.backend {
        StoreBackend::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                info!(path = %config.store.sqlite_path, "saga store backend: SQLite");
                let store = crate::store::SqliteSagaStore::connect(&sqlite_url(&config.store.sqlite_path)).await?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "sqlite"))]
            Err(CoreError::FeatureNotCompiled("sqlite"))
        }
        StoreBackend::Postgres => {
            #[cfg(feature = "postgres")]
            {
                info!("saga store backend: Postgres");
                let store = crate::store::PostgresSagaStore::connect(&config.store.postgres_dsn).await?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "postgres"))]
            Err(CoreError::FeatureNotCompiled("postgres"))
        }
    }
}

pub async fn build_blockchain_store(config: &Config) -> Result<Arc<dyn BlockchainStore>> {
    match config.store.backend {
        StoreBackend::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                let store = crate::blockchain::store::sqlite::SqliteBlockchainStore::connect(&sqlite_url(
                    &config.store.sqlite_path,
                ))
                .await?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "sqlite"))]
            Err(CoreError::FeatureNotCompiled("sqlite"))
        }
        StoreBackend::Postgres => {
            #[cfg(feature = "postgres")]
            {
                let store = crate::blockchain::store::postgres::PostgresBlockchainStore::connect(&config.store.postgres_dsn).await?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "postgres"))]
            Err(CoreError::FeatureNotCompiled("postgres"))
        }
    }
}

pub async fn build_blockchain_gateway(config: &Config) -> Result<Arc<dyn BlockchainGateway>> {
    match &config.blockchain.gateway_base_url {
        Some(base_url) => {
            info!(base_url, "blockchain gateway: HTTP");
            let nonce_store = build_nonce_store(config).await?;
            Ok(Arc::new(HttpBlockchainGateway::with_nonce_store(
                base_url.clone(),
                config.blockchain.signing_address.clone(),
                config.blockchain.network.clone(),
                nonce_store,
            )))
        }
        None => {
            info!("blockchain gateway: in-memory mock (no gateway_base_url configured)");
            Ok(Arc::new(MockBlockchainGateway::new()))
        }
    }
}

pub async fn build_nonce_store(config: &Config) -> Result<Arc<dyn NonceStore>> {
    match config.store.backend {
        StoreBackend::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                let store = crate::blockchain::nonce_store::sqlite::SqliteNonceStore::connect(&sqlite_url(
                    &config.store.sqlite_path,
                ))
                .await?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "sqlite"))]
            Err(CoreError::FeatureNotCompiled("sqlite"))
        }
        StoreBackend::Postgres => {
            #[cfg(feature = "postgres")]
            {
                let store =
                    crate::blockchain::nonce_store::postgres::PostgresNonceStore::connect(&config.store.postgres_dsn)
                        .await?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "postgres"))]
            Err(CoreError::FeatureNotCompiled("postgres"))
        }
    }
}

#[cfg(feature = "sqlite")]
fn sqlite_url(path: &str) -> String {
    if path.contains(':') {
        path.to_string()
    } else {
        format!("sqlite://{path}?mode=rwc")
    }
}
