//! Messaging Port: the contract every participant uses to publish and
//! consume events/commands with at-least-once delivery and retry-on-publish.

pub mod channel;
pub mod retry;

#[cfg(feature = "amqp")]
pub mod amqp;
#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(feature = "nats")]
pub mod nats;

pub use channel::ChannelMessagingPort;
pub use retry::RetryConfig;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{Command, Event};

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors that can occur publishing or consuming through a `MessagingPort`.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("publish failed after exhausting retry budget: {0}")]
    PublishExhausted(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("backend not compiled in: {0}")]
    BackendUnavailable(&'static str),
}

/// A consumed stream of events, terminated by dropping the receiver or by the
/// producing task observing cancellation. Mirrors `async for event in
/// queue.consume_event(topic)` from the system this was distilled from.
pub type EventStream = mpsc::Receiver<Event>;
/// Symmetric command stream.
pub type CommandStream = mpsc::Receiver<Command>;

/// Unified publish/consume API. In-memory (`ChannelMessagingPort`) and
/// broker-backed adapters (AMQP/Kafka/NATS, behind Cargo features) all
/// satisfy this trait so orchestrator/worker code never depends on the
/// concrete backend.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    /// Durably hand `event` to the broker for every topic in `topics`,
    /// keyed by `event.aggregate_id` for per-aggregate ordering. Retries
    /// transient failures up to the configured budget before failing with
    /// `MessagingError::PublishExhausted`.
    async fn publish_event(&self, event: &Event, topics: &[&str]) -> Result<()>;

    /// Same contract as `publish_event`, keyed by `command.aggregate_id`.
    async fn publish_command(&self, command: &Command, topics: &[&str]) -> Result<()>;

    /// Subscribe to `topics` and return a channel yielding events in commit
    /// order per partition. The stream is not restartable; dropping it (or
    /// cancelling the owning task) ends consumption.
    async fn consume_event(&self, topics: &[&str]) -> Result<EventStream>;

    /// Symmetric command-side consumer.
    async fn consume_command(&self, topics: &[&str]) -> Result<CommandStream>;
}
