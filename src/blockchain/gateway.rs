//! `BlockchainGateway`: the boundary between this service and whatever
//! chain client actually signs and submits transactions. Grounded in
//! `BlockchainGatewayPort`/`MockBlockchainGateway` from the system this was
//! distilled from.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::nonce::{NonceManager, NonceSource};
use super::nonce_store::NonceStore;
use super::{BlockchainError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionReceipt {
    pub block_number: u64,
    pub gas_used: u64,
    pub confirmations: u64,
    pub status: ReceiptStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Failed,
}

#[async_trait]
pub trait BlockchainGateway: Send + Sync {
    /// Sign and submit a transaction carrying `payload`; returns its hash.
    /// Nonce acquisition and any chain-side nonce-divergence recovery is
    /// the implementation's concern, not the caller's.
    async fn send_transaction(&self, payload: &Value) -> Result<String>;

    /// Fetch the current receipt for `tx_hash`, or `None` if it hasn't been
    /// mined (or observed) yet.
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>>;

    /// The chain's own view of the next nonce for `address` (its pending
    /// transaction count). Used by `NonceManager::resync` to recover from
    /// local/chain divergence.
    async fn get_transaction_count(&self, address: &str) -> Result<u64>;
}

/// Fixed-receipt gateway for tests and the `standalone` profile: every
/// transaction is immediately "confirmed" with a stable fake receipt.
pub struct MockBlockchainGateway {
    counter: AtomicU64,
}

impl Default for MockBlockchainGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBlockchainGateway {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl BlockchainGateway for MockBlockchainGateway {
    async fn send_transaction(&self, _payload: &Value) -> Result<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("0xmock{n:08x}"))
    }

    async fn get_receipt(&self, _tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        Ok(Some(TransactionReceipt {
            block_number: 123_456,
            gas_used: 21_000,
            confirmations: 6,
            status: ReceiptStatus::Success,
            timestamp: Utc::now(),
        }))
    }

    async fn get_transaction_count(&self, _address: &str) -> Result<u64> {
        Ok(self.counter.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl NonceSource for MockBlockchainGateway {
    async fn get_transaction_count(&self, address: &str) -> Result<u64> {
        BlockchainGateway::get_transaction_count(self, address).await
    }
}

/// Queries a chain node's transaction count for an address over the same
/// HTTP API `HttpBlockchainGateway` submits to. Split out from the gateway
/// itself so `NonceManager` can be built from it directly, rather than from
/// an `Arc<dyn BlockchainGateway>` handle to a gateway that doesn't exist yet.
struct HttpChainClient {
    client: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl NonceSource for HttpChainClient {
    async fn get_transaction_count(&self, address: &str) -> Result<u64> {
        #[derive(Deserialize)]
        struct CountResponse {
            count: u64,
        }

        let response: CountResponse = self
            .client
            .get(format!("{}/accounts/{}/transaction-count", self.base_url, address))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.count)
    }
}

/// HTTP-backed gateway for a JSON-RPC-fronting chain service, reached via a
/// plain `reqwest` client rather than a chain-specific SDK — this system
/// treats the chain as an opaque HTTP dependency behind `BlockchainGateway`.
///
/// Owns its own `NonceManager` for `signing_address`, mirroring
/// `Web3BlockchainGateway`: nonce acquisition and resync-then-retry-once
/// on a stale-nonce rejection both happen inside `send_transaction`, not in
/// the caller.
pub struct HttpBlockchainGateway {
    client: reqwest::Client,
    base_url: String,
    signing_address: String,
    nonce_manager: NonceManager,
}

impl HttpBlockchainGateway {
    pub fn new(base_url: impl Into<String>, signing_address: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let chain_client = HttpChainClient {
            client: reqwest::Client::new(),
            base_url: base_url.clone(),
        };
        Self {
            client: reqwest::Client::new(),
            base_url,
            signing_address: signing_address.into(),
            nonce_manager: NonceManager::new(Arc::new(chain_client)),
        }
    }

    /// Same as `new`, but mirrors the nonce counter into `nonce_store` under
    /// `network` on every resync (§4.6's `nonce_state` table).
    pub fn with_nonce_store(
        base_url: impl Into<String>,
        signing_address: impl Into<String>,
        network: impl Into<String>,
        nonce_store: Arc<dyn NonceStore>,
    ) -> Self {
        let base_url = base_url.into();
        let chain_client = HttpChainClient {
            client: reqwest::Client::new(),
            base_url: base_url.clone(),
        };
        Self {
            client: reqwest::Client::new(),
            base_url,
            signing_address: signing_address.into(),
            nonce_manager: NonceManager::with_store(Arc::new(chain_client), nonce_store, network),
        }
    }

    async fn submit(&self, payload: &Value, nonce: u64) -> Result<String> {
        #[derive(Deserialize)]
        struct SendResponse {
            tx_hash: String,
        }

        let mut body = payload.clone();
        if let Value::Object(ref mut map) = body {
            map.insert("nonce".to_string(), Value::from(nonce));
        }

        let response = self
            .client
            .post(format!("{}/transactions", self.base_url))
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            return Err(BlockchainError::NonceRejected(format!("nonce {nonce} rejected")));
        }

        let parsed: SendResponse = response.error_for_status()?.json().await?;
        Ok(parsed.tx_hash)
    }
}

#[async_trait]
impl BlockchainGateway for HttpBlockchainGateway {
    async fn send_transaction(&self, payload: &Value) -> Result<String> {
        self.nonce_manager
            .submit_with_retry(&self.signing_address, |nonce| self.submit(payload, nonce))
            .await
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        let response = self
            .client
            .get(format!("{}/transactions/{}/receipt", self.base_url, tx_hash))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let receipt = response.error_for_status()?.json().await?;
        Ok(Some(receipt))
    }

    async fn get_transaction_count(&self, address: &str) -> Result<u64> {
        #[derive(Deserialize)]
        struct CountResponse {
            count: u64,
        }

        let response: CountResponse = self
            .client
            .get(format!("{}/accounts/{}/transaction-count", self.base_url, address))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mock_gateway_issues_unique_hashes() {
        let gateway = MockBlockchainGateway::new();
        let a = gateway.send_transaction(&json!({})).await.unwrap();
        let b = gateway.send_transaction(&json!({})).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn mock_gateway_returns_a_confirmed_receipt() {
        let gateway = MockBlockchainGateway::new();
        let receipt = gateway.get_receipt("0xmock00000000").await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Success);
        assert!(receipt.confirmations >= 6);
    }
}
