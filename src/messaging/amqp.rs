//! AMQP (RabbitMQ) `MessagingPort` adapter.
//!
//! Events and commands are published to a topic exchange keyed by
//! `aggregate_id`.`topic`, giving per-aggregate ordering on a single queue
//! binding. JSON is the wire format (this system has no protobuf schema),
//! unlike the framework's protobuf `EventBook` exchange of the same shape.

use std::sync::Arc;

use async_trait::async_trait;
use backon::Retryable;
use deadpool_lapin::{Manager, Pool};
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, ExchangeKind,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{CommandStream, EventStream, MessagingError, MessagingPort, RetryConfig, Result};
use crate::domain::{Command, Event};

const EVENTS_EXCHANGE: &str = "shipment_saga.events";
const COMMANDS_EXCHANGE: &str = "shipment_saga.commands";

/// Connection-pooled AMQP backend. One pool serves both publish and consume.
pub struct AmqpMessagingPort {
    pool: Pool,
    retry: RetryConfig,
    consumer_tag_prefix: String,
}

impl AmqpMessagingPort {
    pub async fn connect(url: &str, retry: RetryConfig) -> Result<Self> {
        let manager = Manager::new(url.to_string(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(10)
            .build()
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        let conn = pool
            .get()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        for exchange in [EVENTS_EXCHANGE, COMMANDS_EXCHANGE] {
            channel
                .exchange_declare(
                    exchange,
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| MessagingError::Connection(e.to_string()))?;
        }

        info!(url, "connected to AMQP broker");

        Ok(Self {
            pool,
            retry,
            consumer_tag_prefix: "shipment-saga".to_string(),
        })
    }

    async fn publish_to(&self, exchange: &str, topic: &str, payload: Vec<u8>) -> Result<()> {
        let pool = self.pool.clone();
        let exchange = exchange.to_string();
        let routing_key = topic.to_string();
        let payload = Arc::new(payload);

        let attempt = || {
            let pool = pool.clone();
            let exchange = exchange.clone();
            let routing_key = routing_key.clone();
            let payload = payload.clone();
            async move {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| MessagingError::Connection(e.to_string()))?;
                let channel = conn
                    .create_channel()
                    .await
                    .map_err(|e| MessagingError::Connection(e.to_string()))?;
                channel
                    .basic_publish(
                        &exchange,
                        &routing_key,
                        BasicPublishOptions::default(),
                        &payload,
                        BasicProperties::default()
                            .with_content_type("application/json".into())
                            .with_delivery_mode(2),
                    )
                    .await
                    .map_err(|e| MessagingError::PublishExhausted(e.to_string()))?
                    .await
                    .map_err(|e| MessagingError::PublishExhausted(e.to_string()))?;
                Ok::<(), MessagingError>(())
            }
        };

        attempt
            .retry(self.retry.backoff())
            .when(|_| true)
            .await
            .map_err(|e| MessagingError::PublishExhausted(e.to_string()))
    }

    async fn consume_from(&self, exchange: &str, topics: &[&str]) -> Result<lapin::Consumer> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        let queue_name = format!(
            "{}.{}",
            self.consumer_tag_prefix,
            topics.join("-")
        );

        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::Subscribe(e.to_string()))?;

        for topic in topics {
            channel
                .queue_bind(
                    &queue_name,
                    exchange,
                    topic,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| MessagingError::Subscribe(e.to_string()))?;
        }

        channel
            .basic_consume(
                &queue_name,
                &format!("{}-consumer", self.consumer_tag_prefix),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::Subscribe(e.to_string()))
    }
}

#[async_trait]
impl MessagingPort for AmqpMessagingPort {
    async fn publish_event(&self, event: &Event, topics: &[&str]) -> Result<()> {
        let payload = event.to_bytes()?;
        for topic in topics {
            self.publish_to(EVENTS_EXCHANGE, topic, payload.clone()).await?;
        }
        Ok(())
    }

    async fn publish_command(&self, command: &Command, topics: &[&str]) -> Result<()> {
        let payload = command.to_bytes()?;
        for topic in topics {
            self.publish_to(COMMANDS_EXCHANGE, topic, payload.clone()).await?;
        }
        Ok(())
    }

    async fn consume_event(&self, topics: &[&str]) -> Result<EventStream> {
        let mut consumer = self.consume_from(EVENTS_EXCHANGE, topics).await?;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => match Event::from_bytes(&delivery.data) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                                error!(error = %e, "failed to ack AMQP delivery");
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "malformed event payload, skipping");
                            let _ = delivery.reject(BasicRejectOptions { requeue: false }).await;
                        }
                    },
                    Err(e) => error!(error = %e, "AMQP consumer error"),
                }
            }
            debug!("AMQP event consumer stopped");
        });

        Ok(rx)
    }

    async fn consume_command(&self, topics: &[&str]) -> Result<CommandStream> {
        let mut consumer = self.consume_from(COMMANDS_EXCHANGE, topics).await?;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => match Command::from_bytes(&delivery.data) {
                        Ok(command) => {
                            if tx.send(command).await.is_err() {
                                break;
                            }
                            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                                error!(error = %e, "failed to ack AMQP delivery");
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "malformed command payload, skipping");
                            let _ = delivery.reject(BasicRejectOptions { requeue: false }).await;
                        }
                    },
                    Err(e) => error!(error = %e, "AMQP consumer error"),
                }
            }
            debug!("AMQP command consumer stopped");
        });

        Ok(rx)
    }
}
