//! NATS JetStream `MessagingPort` adapter.
//!
//! Each topic is a JetStream stream subject; consumers are ephemeral pull
//! consumers scoped to the requested subjects, acked individually so a
//! crash mid-batch only redelivers the unacked tail.

use async_trait::async_trait;
use backon::Retryable;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{CommandStream, EventStream, MessagingError, MessagingPort, RetryConfig, Result};
use crate::domain::{Command, Event};

const STREAM_NAME: &str = "SHIPMENT_SAGA";

pub struct NatsMessagingPort {
    client: async_nats::Client,
    jetstream: async_nats::jetstream::Context,
    retry: RetryConfig,
}

impl NatsMessagingPort {
    pub async fn connect(url: &str, retry: RetryConfig) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;
        let jetstream = async_nats::jetstream::new(client.clone());

        jetstream
            .get_or_create_stream(async_nats::jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: vec![format!("{STREAM_NAME}.>")],
                ..Default::default()
            })
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        info!(url, "connected to NATS JetStream");

        Ok(Self {
            client,
            jetstream,
            retry,
        })
    }

    fn subject(topic: &str) -> String {
        format!("{STREAM_NAME}.{topic}")
    }

    async fn publish_to(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let subject = Self::subject(topic);
        let attempt = || async {
            self.jetstream
                .publish(subject.clone(), payload.clone().into())
                .await
                .map_err(|e| MessagingError::PublishExhausted(e.to_string()))?
                .await
                .map_err(|e| MessagingError::PublishExhausted(e.to_string()))?;
            Ok::<(), MessagingError>(())
        };

        attempt
            .retry(self.retry.backoff())
            .when(|_| true)
            .await
            .map_err(|e| MessagingError::PublishExhausted(e.to_string()))
    }

    async fn consumer_for(
        &self,
        topics: &[&str],
    ) -> Result<async_nats::jetstream::consumer::PullConsumer> {
        let filter_subjects: Vec<String> = topics.iter().map(|t| Self::subject(t)).collect();
        let stream = self
            .jetstream
            .get_stream(STREAM_NAME)
            .await
            .map_err(|e| MessagingError::Subscribe(e.to_string()))?;

        stream
            .create_consumer(async_nats::jetstream::consumer::pull::Config {
                filter_subjects,
                ack_policy: async_nats::jetstream::consumer::AckPolicy::Explicit,
                ..Default::default()
            })
            .await
            .map_err(|e| MessagingError::Subscribe(e.to_string()))
    }
}

#[async_trait]
impl MessagingPort for NatsMessagingPort {
    async fn publish_event(&self, event: &Event, topics: &[&str]) -> Result<()> {
        let payload = event.to_bytes()?;
        for topic in topics {
            self.publish_to(topic, payload.clone()).await?;
        }
        Ok(())
    }

    async fn publish_command(&self, command: &Command, topics: &[&str]) -> Result<()> {
        let payload = command.to_bytes()?;
        for topic in topics {
            self.publish_to(topic, payload.clone()).await?;
        }
        Ok(())
    }

    async fn consume_event(&self, topics: &[&str]) -> Result<EventStream> {
        let consumer = self.consumer_for(topics).await?;
        let (tx, rx) = mpsc::channel(256);
        let _ = &self.client;

        tokio::spawn(async move {
            let Ok(mut messages) = consumer.messages().await else {
                error!("failed to start NATS message stream");
                return;
            };
            while let Some(message) = messages.next().await {
                match message {
                    Ok(message) => match Event::from_bytes(&message.payload) {
                        Ok(event) => {
                            let ack = message.ack().await;
                            if let Err(e) = ack {
                                error!(error = %e, "failed to ack NATS message");
                            }
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "malformed event payload, skipping"),
                    },
                    Err(e) => error!(error = %e, "NATS consumer error"),
                }
            }
        });

        Ok(rx)
    }

    async fn consume_command(&self, topics: &[&str]) -> Result<CommandStream> {
        let consumer = self.consumer_for(topics).await?;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            let Ok(mut messages) = consumer.messages().await else {
                error!("failed to start NATS message stream");
                return;
            };
            while let Some(message) = messages.next().await {
                match message {
                    Ok(message) => match Command::from_bytes(&message.payload) {
                        Ok(command) => {
                            let ack = message.ack().await;
                            if let Err(e) = ack {
                                error!(error = %e, "failed to ack NATS message");
                            }
                            if tx.send(command).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "malformed command payload, skipping"),
                    },
                    Err(e) => error!(error = %e, "NATS consumer error"),
                }
            }
        });

        Ok(rx)
    }
}
