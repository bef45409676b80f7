//! Confirmation Monitor: polls every `Pending` `BlockchainRecord` in
//! batches, advancing each to `Confirmed`, `Failed`, or (past
//! `max_poll_attempts`) `Dropped`.
//!
//! Grounded in `ConfirmationMonitor`/`BlockchainService.update_confirmation`
//! from the system this was distilled from; `run`/`stop` keep its
//! start/cancel shape (`tokio::select!` on a cancellation token in place of
//! `asyncio.CancelledError`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use super::gateway::{BlockchainGateway, ReceiptStatus};
use super::recorder::blockchain_verified_event;
use super::store::BlockchainStore;
use super::{BlockchainRecord, Result};
use crate::config::BlockchainSettings;
use crate::domain::catalog::topics;
use crate::messaging::MessagingPort;

pub struct ConfirmationMonitor {
    queue: Arc<dyn MessagingPort>,
    store: Arc<dyn BlockchainStore>,
    gateway: Arc<dyn BlockchainGateway>,
    settings: BlockchainSettings,
    running: AtomicBool,
}

impl ConfirmationMonitor {
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
            running: AtomicBool::new(true),
        }
    }

    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("confirmation monitor started");

        while self.running.load(Ordering::SeqCst) {
            let pending = match self
                .store
                .get_pending(self.settings.submission_batch_size as u32)
                .await
            {
                Ok(records) => records,
                Err(e) => {
                    error!(error = %e, "monitor loop failed to load pending records");
                    tokio::time::sleep(self.settings.confirmation_interval()).await;
                    continue;
                }
            };

            if pending.is_empty() {
                tokio::time::sleep(self.settings.confirmation_interval()).await;
                continue;
            }

            debug!(count = pending.len(), "checking pending transactions");
            let checks = pending
                .into_iter()
                .map(|record| self.update_confirmation(record));
            join_all(checks).await;
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn update_confirmation(&self, mut record: BlockchainRecord) {
        let tx_hash = record.tx_hash.clone();
        let receipt = match self.gateway.get_receipt(&tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(error = %e, tx_hash, "error updating confirmation");
                return;
            }
        };

        let Some(receipt) = receipt else {
            record.poll_attempts += 1;
            if record.poll_attempts >= self.settings.max_poll_attempts {
                record.drop_from_mempool();
                if let Err(e) = self.store.update(&record).await {
                    error!(error = %e, tx_hash, "failed to persist dropped transaction");
                }
                warn!(tx_hash, "transaction dropped after exhausting poll attempts");
            } else if let Err(e) = self.store.update(&record).await {
                error!(error = %e, tx_hash, "failed to persist poll attempt count");
            }
            return;
        };

        match receipt.status {
            ReceiptStatus::Failed => self.fail_transaction(record, "transaction reverted on chain").await,
            ReceiptStatus::Success => {
                if receipt.confirmations >= self.settings.required_confirmations {
                    self.confirm_transaction(record, receipt.block_number, receipt.gas_used, receipt.timestamp)
                        .await;
                } else {
                    debug!(
                        tx_hash,
                        confirmations = receipt.confirmations,
                        required = self.settings.required_confirmations,
                        "waiting for confirmations"
                    );
                }
            }
        }
    }

    async fn confirm_transaction(
        &self,
        mut record: BlockchainRecord,
        block_number: u64,
        gas_used: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) {
        record.confirm(block_number, gas_used, timestamp);
        if let Err(e) = self.store.update(&record).await {
            error!(error = %e, tx_hash = %record.tx_hash, "failed to persist confirmation");
            return;
        }

        let event = blockchain_verified_event(&record, self.settings.required_confirmations);
        if let Err(e) = self.queue.publish_event(&event, &[topics::BLOCKCHAIN_EVENTS]).await {
            error!(error = %e, tx_hash = %record.tx_hash, "failed to publish blockchain.verified");
            return;
        }
        info!(tx_hash = %record.tx_hash, "transaction verified");
    }

    async fn fail_transaction(&self, mut record: BlockchainRecord, reason: &str) {
        record.fail(reason);
        if let Err(e) = self.store.update(&record).await {
            error!(error = %e, tx_hash = %record.tx_hash, "failed to persist failed transaction");
            return;
        }
        warn!(tx_hash = %record.tx_hash, reason, "transaction failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::gateway::MockBlockchainGateway;
    use crate::blockchain::store::sqlite::SqliteBlockchainStore;
    use crate::messaging::ChannelMessagingPort;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn confirmed_receipt_marks_record_confirmed_and_publishes_event() {
        let queue = Arc::new(ChannelMessagingPort::new());
        let store = Arc::new(SqliteBlockchainStore::connect("sqlite::memory:").await.unwrap());
        let gateway = Arc::new(MockBlockchainGateway::new());
        let settings = BlockchainSettings::default();

        let mut events = queue.consume_event(&[topics::BLOCKCHAIN_EVENTS]).await.unwrap();

        let record = BlockchainRecord::new(Uuid::new_v4(), "0xabc".to_string(), json!({}));
        store.insert(&record).await.unwrap();

        let monitor = ConfirmationMonitor::new(queue, store.clone(), gateway, settings);
        monitor.update_confirmation(record.clone()).await;

        let fetched = store.get(record.record_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, crate::blockchain::TransactionStatus::Confirmed);

        let verified = tokio::time::timeout(std::time::Duration::from_millis(200), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verified.event_type, "blockchain.verified");
    }

    #[tokio::test]
    async fn stop_flips_running_flag() {
        let queue = Arc::new(ChannelMessagingPort::new());
        let store = Arc::new(SqliteBlockchainStore::connect("sqlite::memory:").await.unwrap());
        let gateway = Arc::new(MockBlockchainGateway::new());
        let monitor = ConfirmationMonitor::new(queue, store, gateway, BlockchainSettings::default());
        monitor.stop();
        assert!(!monitor.running.load(Ordering::SeqCst));
    }
}
