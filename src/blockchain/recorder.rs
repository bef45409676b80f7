//! Blockchain submission worker: consumes domain events off its configured
//! topics, filters to the configured `target_events` whitelist, and
//! registers each as a pending on-chain transaction.
//!
//! Grounded in `BlockchainWorker`/`BlockchainService.register_event` from
//! the system this was distilled from.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};

use super::gateway::BlockchainGateway;
use super::store::BlockchainStore;
use super::{BlockchainRecord, Result};
use crate::config::BlockchainSettings;
use crate::domain::{Event, EventKind};
use crate::messaging::MessagingPort;

pub struct BlockchainRecorder {
    queue: Arc<dyn MessagingPort>,
    store: Arc<dyn BlockchainStore>,
    gateway: Arc<dyn BlockchainGateway>,
    settings: BlockchainSettings,
}

impl BlockchainRecorder {
    pub fn new(
        queue: Arc<dyn MessagingPort>,
        store: Arc<dyn BlockchainStore>,
        gateway: Arc<dyn BlockchainGateway>,
        settings: BlockchainSettings,
    ) -> Self {
        Self {
            queue,
            store,
            gateway,
            settings,
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!("blockchain worker started");
        let topics: Vec<&str> = self.settings.listen_topics.iter().map(String::as_str).collect();
        let mut events = self.queue.consume_event(&topics).await?;

        while let Some(event) = events.recv().await {
            if !self.settings.target_events.iter().any(|t| t == &event.event_type) {
                continue;
            }
            if let Err(e) = self.register_event(&event).await {
                error!(error = %e, event_type = %event.event_type, "error processing event for blockchain recording");
            }
        }
        Ok(())
    }

    async fn register_event(&self, event: &Event) -> Result<()> {
        info!(event_type = %event.event_type, "processing event for blockchain recording");

        let payload = json!({
            "event_id": event.event_id,
            "event_type": event.event_type,
            "aggregate_id": event.aggregate_id,
            "payload": event.payload,
        });

        let tx_hash = self.gateway.send_transaction(&payload).await?;
        let record = BlockchainRecord::new(event.aggregate_id, tx_hash.clone(), payload);
        self.store.insert(&record).await?;
        info!(tx_hash, shipment_id = %event.aggregate_id, "saved pending transaction");
        Ok(())
    }
}

/// Published once a record's confirmation monitor observes it on-chain.
pub fn blockchain_verified_event(record: &BlockchainRecord, required_confirmations: u64) -> Event {
    Event::new(
        EventKind::BlockchainVerified,
        record.shipment_id,
        json!({
            "record_id": record.record_id,
            "shipment_id": record.shipment_id,
            "transaction_hash": record.tx_hash,
            "verified_at": record.confirmed_at,
            "confirmations": required_confirmations,
        }),
        None,
    )
}
