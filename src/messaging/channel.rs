//! In-memory messaging backend built on `tokio::sync::broadcast`, used for
//! the `standalone` feature profile and for every test in this crate.
//!
//! One broadcast channel carries both events and commands tagged with their
//! topic name; each `consume_*` call spawns a forwarding task that filters
//! by topic membership and forwards matches into a bounded mpsc channel,
//! the same "shared sender, per-consumer filter" shape as the framework's
//! `ChannelEventBus`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::{CommandStream, EventStream, MessagingError, MessagingPort, Result};
use crate::domain::{Command, Event};

const CHANNEL_CAPACITY: usize = 1024;
const CONSUMER_BUFFER: usize = 256;

#[derive(Debug, Clone)]
enum Message {
    Event { topic: String, event: Event },
    Command { topic: String, command: Command },
}

/// Shared in-process bus. Clone to obtain another handle to the same
/// underlying channel (mirrors `ChannelEventBus::sender()`), which is how
/// tests wire up a publisher and several topic-scoped consumers.
#[derive(Clone)]
pub struct ChannelMessagingPort {
    sender: broadcast::Sender<Arc<Message>>,
}

impl Default for ChannelMessagingPort {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelMessagingPort {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

#[async_trait]
impl MessagingPort for ChannelMessagingPort {
    async fn publish_event(&self, event: &Event, topics: &[&str]) -> Result<()> {
        for topic in topics {
            let message = Arc::new(Message::Event {
                topic: topic.to_string(),
                event: event.clone(),
            });
            match self.sender.send(message) {
                Ok(receivers) => debug!(topic = %topic, receivers, "published event to channel"),
                Err(_) => debug!(topic = %topic, "published event (no receivers)"),
            }
        }
        Ok(())
    }

    async fn publish_command(&self, command: &Command, topics: &[&str]) -> Result<()> {
        for topic in topics {
            let message = Arc::new(Message::Command {
                topic: topic.to_string(),
                command: command.clone(),
            });
            match self.sender.send(message) {
                Ok(receivers) => debug!(topic = %topic, receivers, "published command to channel"),
                Err(_) => debug!(topic = %topic, "published command (no receivers)"),
            }
        }
        Ok(())
    }

    async fn consume_event(&self, topics: &[&str]) -> Result<EventStream> {
        let mut receiver = self.sender.subscribe();
        let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
        let (tx, rx) = mpsc::channel(CONSUMER_BUFFER);

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if let Message::Event { topic, event } = message.as_ref() {
                            if topics.iter().any(|t| t == topic) && tx.send(event.clone()).await.is_err()
                            {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event consumer lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }

    async fn consume_command(&self, topics: &[&str]) -> Result<CommandStream> {
        let mut receiver = self.sender.subscribe();
        let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
        let (tx, rx) = mpsc::channel(CONSUMER_BUFFER);

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if let Message::Command { topic, command } = message.as_ref() {
                            if topics.iter().any(|t| t == topic)
                                && tx.send(command.clone()).await.is_err()
                            {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "command consumer lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}

impl From<broadcast::error::SendError<Arc<Message>>> for MessagingError {
    fn from(err: broadcast::error::SendError<Arc<Message>>) -> Self {
        MessagingError::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{topics, EventKind};
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn publish_with_no_receivers_does_not_error() {
        let bus = ChannelMessagingPort::new();
        let event = Event::new(EventKind::ShipmentCreated, Uuid::new_v4(), json!({}), None);
        bus.publish_event(&event, &[topics::SHIPMENT_EVENTS])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subscriber_receives_matching_topic_only() {
        let bus = ChannelMessagingPort::new();
        let mut rx = bus.consume_event(&[topics::SHIPMENT_EVENTS]).await.unwrap();

        let matching = Event::new(EventKind::ShipmentCreated, Uuid::new_v4(), json!({}), None);
        let other = Event::new(EventKind::InventoryReserved, Uuid::new_v4(), json!({}), None);

        bus.publish_event(&matching, &[topics::SHIPMENT_EVENTS])
            .await
            .unwrap();
        bus.publish_event(&other, &[topics::INVENTORY_EVENTS])
            .await
            .unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event_id, matching.event_id);

        let none_left = tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await;
        assert!(none_left.is_err(), "no second message should have matched");
    }

    #[tokio::test]
    async fn cloned_handle_shares_the_same_bus() {
        let publisher = ChannelMessagingPort::new();
        let subscriber = publisher.clone();
        let mut rx = subscriber
            .consume_command(&[topics::INVENTORY_COMMANDS])
            .await
            .unwrap();

        let command = Command::new(
            crate::domain::CommandKind::ReserveInventory,
            Uuid::new_v4(),
            json!({}),
            None,
        );
        publisher
            .publish_command(&command, &[topics::INVENTORY_COMMANDS])
            .await
            .unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.command_id, command.command_id);
    }
}
