//! Blockchain Recorder (C5): submits domain events for on-chain notarization
//! and polls for confirmation, plus the Nonce Manager (C6) that keeps
//! submissions from colliding on the signing address.

pub mod gateway;
pub mod monitor;
pub mod nonce;
pub mod nonce_store;
pub mod recorder;
pub mod store;

pub use gateway::{BlockchainGateway, MockBlockchainGateway, TransactionReceipt};
pub use nonce::NonceManager;
pub use nonce_store::NonceStore;
pub use recorder::BlockchainRecorder;
pub use monitor::ConfirmationMonitor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, thiserror::Error)]
pub enum BlockchainError {
    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("messaging error: {0}")]
    Messaging(#[from] crate::messaging::MessagingError),

    #[error("nonce divergence for {address}: local {local}, chain {chain}")]
    NonceDivergence {
        address: String,
        local: u64,
        chain: u64,
    },

    /// The gateway rejected a submission as "nonce too low"/"replacement
    /// underpriced" — distinct from a generic `Gateway` error so the
    /// submission worker knows to resync and retry exactly once (§4.6)
    /// rather than giving up.
    #[error("nonce rejected by gateway: {0}")]
    NonceRejected(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Lifecycle of a submitted transaction. `Dropped` is this system's own
/// addition beyond the source's PENDING/CONFIRMED/FAILED set: a transaction
/// that falls out of the mempool (the gateway returns no receipt at all
/// after enough polling attempts) is distinct from one that was mined and
/// reverted, and the distinction matters for deciding whether resubmission
/// is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
    Dropped,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Confirmed | TransactionStatus::Failed | TransactionStatus::Dropped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Dropped => "dropped",
        }
    }
}

/// A submitted on-chain notarization of a domain event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockchainRecord {
    pub record_id: Uuid,
    pub shipment_id: Uuid,
    pub tx_hash: String,
    pub payload: Value,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub error_message: Option<String>,
    pub poll_attempts: u32,
}

impl BlockchainRecord {
    pub fn new(shipment_id: Uuid, tx_hash: String, payload: Value) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            shipment_id,
            tx_hash,
            payload,
            status: TransactionStatus::Pending,
            created_at: Utc::now(),
            confirmed_at: None,
            block_number: None,
            gas_used: None,
            error_message: None,
            poll_attempts: 0,
        }
    }

    pub fn confirm(&mut self, block_number: u64, gas_used: u64, timestamp: DateTime<Utc>) {
        self.status = TransactionStatus::Confirmed;
        self.block_number = Some(block_number);
        self.gas_used = Some(gas_used);
        self.confirmed_at = Some(timestamp);
    }

    pub fn fail(&mut self, error: &str) {
        self.status = TransactionStatus::Failed;
        self.error_message = Some(error.to_string());
    }

    pub fn drop_from_mempool(&mut self) {
        self.status = TransactionStatus::Dropped;
        self.error_message = Some("transaction dropped from mempool".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_record_starts_pending() {
        let record = BlockchainRecord::new(Uuid::new_v4(), "0xabc".to_string(), json!({}));
        assert_eq!(record.status, TransactionStatus::Pending);
        assert!(!record.status.is_terminal());
    }

    #[test]
    fn confirm_sets_terminal_fields() {
        let mut record = BlockchainRecord::new(Uuid::new_v4(), "0xabc".to_string(), json!({}));
        record.confirm(100, 21000, Utc::now());
        assert_eq!(record.status, TransactionStatus::Confirmed);
        assert_eq!(record.block_number, Some(100));
        assert!(record.status.is_terminal());
    }

    #[test]
    fn dropped_is_distinct_from_failed() {
        let mut record = BlockchainRecord::new(Uuid::new_v4(), "0xabc".to_string(), json!({}));
        record.drop_from_mempool();
        assert_eq!(record.status, TransactionStatus::Dropped);
        assert_ne!(record.status, TransactionStatus::Failed);
    }
}
