//! Kafka `MessagingPort` adapter built on `rdkafka`.
//!
//! Topics map directly to Kafka topics; `aggregate_id` is used as the
//! partition key so every event/command for one aggregate lands on the same
//! partition and is delivered in order to a single consumer.

use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use rdkafka::{
    config::ClientConfig,
    consumer::{Consumer, StreamConsumer},
    producer::{FutureProducer, FutureRecord},
    Message as _,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{CommandStream, EventStream, MessagingError, MessagingPort, RetryConfig, Result};
use crate::domain::{Command, Event};

pub struct KafkaMessagingPort {
    producer: FutureProducer,
    bootstrap_servers: String,
    group_id: String,
    retry: RetryConfig,
}

impl KafkaMessagingPort {
    pub fn connect(bootstrap_servers: &str, group_id: &str, retry: RetryConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        info!(bootstrap_servers, "connected to Kafka cluster");

        Ok(Self {
            producer,
            bootstrap_servers: bootstrap_servers.to_string(),
            group_id: group_id.to_string(),
            retry,
        })
    }

    fn consumer_for(&self, topics: &[&str]) -> Result<StreamConsumer> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| MessagingError::Subscribe(e.to_string()))?;

        consumer
            .subscribe(topics)
            .map_err(|e| MessagingError::Subscribe(e.to_string()))?;

        Ok(consumer)
    }

    async fn publish_to(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let attempt = || async {
            let record: FutureRecord<'_, str, Vec<u8>> =
                FutureRecord::to(topic).key(key).payload(&payload);
            self.producer
                .send(record, Duration::from_secs(5))
                .await
                .map(|_| ())
                .map_err(|(e, _)| MessagingError::PublishExhausted(e.to_string()))
        };

        attempt
            .retry(self.retry.backoff())
            .when(|_| true)
            .await
            .map_err(|e| MessagingError::PublishExhausted(e.to_string()))
    }
}

#[async_trait]
impl MessagingPort for KafkaMessagingPort {
    async fn publish_event(&self, event: &Event, topics: &[&str]) -> Result<()> {
        let payload = event.to_bytes()?;
        let key = event.aggregate_id.to_string();
        for topic in topics {
            self.publish_to(topic, &key, payload.clone()).await?;
        }
        Ok(())
    }

    async fn publish_command(&self, command: &Command, topics: &[&str]) -> Result<()> {
        let payload = command.to_bytes()?;
        let key = command.aggregate_id.to_string();
        for topic in topics {
            self.publish_to(topic, &key, payload.clone()).await?;
        }
        Ok(())
    }

    async fn consume_event(&self, topics: &[&str]) -> Result<EventStream> {
        let consumer = self.consumer_for(topics)?;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            loop {
                match consumer.recv().await {
                    Ok(message) => {
                        let Some(payload) = message.payload() else {
                            continue;
                        };
                        match Event::from_bytes(payload) {
                            Ok(event) => {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "malformed event payload, skipping"),
                        }
                    }
                    Err(e) => error!(error = %e, "Kafka consumer error"),
                }
            }
        });

        Ok(rx)
    }

    async fn consume_command(&self, topics: &[&str]) -> Result<CommandStream> {
        let consumer = self.consumer_for(topics)?;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            loop {
                match consumer.recv().await {
                    Ok(message) => {
                        let Some(payload) = message.payload() else {
                            continue;
                        };
                        match Command::from_bytes(payload) {
                            Ok(command) => {
                                if tx.send(command).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "malformed command payload, skipping"),
                        }
                    }
                    Err(e) => error!(error = %e, "Kafka consumer error"),
                }
            }
        });

        Ok(rx)
    }
}
