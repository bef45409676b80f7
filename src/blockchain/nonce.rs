//! Nonce Manager (C6): hands out strictly increasing per-address nonces for
//! outgoing transactions.
//!
//! Grounded in `RedisNonceManager`, reshaped around an in-process
//! `AtomicU64` per address instead of a Redis `INCR` — this service owns a
//! single signing process per address, so the shared-counter problem Redis
//! solved there doesn't exist here. The exclusive section only runs on
//! resync (chain disagrees with the local counter), guarded by `RwLock` so
//! the hot path (`next_nonce`) never blocks on it.
//!
//! The in-process counters are the source of truth while the process is
//! up; an optional `NonceStore` mirrors them into `nonce_state` as a
//! write-through cache, updated on every resync, so a restarted process has
//! a fallback if `get_transaction_count` is briefly unreachable on startup.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::nonce_store::NonceStore;
use super::Result;

const DEFAULT_NETWORK: &str = "default";

/// Whatever can tell the Nonce Manager the chain's own view of an address's
/// next nonce. Kept separate from `BlockchainGateway` so a gateway can own a
/// `NonceManager` built from its own chain client without needing an
/// `Arc<dyn BlockchainGateway>` handle to itself.
#[async_trait]
pub trait NonceSource: Send + Sync {
    async fn get_transaction_count(&self, address: &str) -> Result<u64>;
}

pub struct NonceManager {
    source: Arc<dyn NonceSource>,
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    store: Option<Arc<dyn NonceStore>>,
    network: String,
}

impl NonceManager {
    pub fn new(source: Arc<dyn NonceSource>) -> Self {
        Self {
            source,
            counters: RwLock::new(HashMap::new()),
            store: None,
            network: DEFAULT_NETWORK.to_string(),
        }
    }

    /// Mirrors resynced counters into `store` under `network`, so a
    /// restarted process can recover its last known nonce durably instead
    /// of only from the in-process counters.
    pub fn with_store(source: Arc<dyn NonceSource>, store: Arc<dyn NonceStore>, network: impl Into<String>) -> Self {
        Self {
            source,
            counters: RwLock::new(HashMap::new()),
            store: Some(store),
            network: network.into(),
        }
    }

    /// The next nonce to use for `address`. Syncs from the chain on first
    /// use for that address; afterwards this is a lock-free atomic bump.
    pub async fn next_nonce(&self, address: &str) -> Result<u64> {
        if let Some(counter) = self.counters.read().await.get(address) {
            return Ok(counter.fetch_add(1, Ordering::SeqCst));
        }
        self.resync(address).await?;
        let counters = self.counters.read().await;
        let counter = counters
            .get(address)
            .expect("resync always inserts a counter for address");
        Ok(counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Reports a "nonce too low" style rejection from the chain: the local
    /// counter has drifted ahead of (or behind) what the chain will accept.
    /// One resync, one retry — if the retry also diverges, surface it
    /// rather than looping, since a process crash-looping on resync is
    /// worse than a failed submission an operator can see.
    pub async fn report_divergence(&self, address: &str) -> Result<u64> {
        warn!(address, "nonce divergence reported, resyncing from chain");
        self.resync(address).await?;
        self.next_nonce(address).await
    }

    /// Runs the acquire-nonce/submit/resync-and-retry-once policy around an
    /// arbitrary submit callback, so gateway implementations don't each have
    /// to reimplement the retry shape.
    pub async fn submit_with_retry<F, Fut>(&self, address: &str, mut submit: F) -> Result<String>
    where
        F: FnMut(u64) -> Fut,
        Fut: std::future::Future<Output = Result<String>>,
    {
        let nonce = self.next_nonce(address).await?;

        match submit(nonce).await {
            Ok(tx_hash) => Ok(tx_hash),
            Err(super::BlockchainError::NonceRejected(reason)) => {
                warn!(address, reason, "nonce rejected, resyncing and retrying once");
                let retry_nonce = self.report_divergence(address).await?;
                submit(retry_nonce).await
            }
            Err(e) => Err(e),
        }
    }

    async fn resync(&self, address: &str) -> Result<()> {
        let on_chain = self.source.get_transaction_count(address).await?;
        let mut counters = self.counters.write().await;
        counters.insert(address.to_string(), Arc::new(AtomicU64::new(on_chain)));
        info!(address, on_chain, "synced nonce from chain");

        if let Some(store) = &self.store {
            store.record(address, &self.network, on_chain).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::gateway::MockBlockchainGateway;
    use crate::blockchain::nonce_store::sqlite::SqliteNonceStore;

    #[tokio::test]
    async fn first_use_syncs_from_chain_and_increments() {
        let gateway = Arc::new(MockBlockchainGateway::new());
        let manager = NonceManager::new(gateway);

        let first = manager.next_nonce("0xabc").await.unwrap();
        let second = manager.next_nonce("0xabc").await.unwrap();
        assert_eq!(second, first + 1);
    }

    #[tokio::test]
    async fn different_addresses_get_independent_counters() {
        let gateway = Arc::new(MockBlockchainGateway::new());
        let manager = NonceManager::new(gateway);

        let a1 = manager.next_nonce("0xaaa").await.unwrap();
        let b1 = manager.next_nonce("0xbbb").await.unwrap();
        let a2 = manager.next_nonce("0xaaa").await.unwrap();
        assert_eq!(a2, a1 + 1);
        assert_eq!(b1, a1);
    }

    #[tokio::test]
    async fn report_divergence_resyncs_before_returning_a_nonce() {
        let gateway = Arc::new(MockBlockchainGateway::new());
        let manager = NonceManager::new(gateway);

        manager.next_nonce("0xabc").await.unwrap();
        let recovered = manager.report_divergence("0xabc").await.unwrap();
        assert!(recovered >= 0);
    }

    #[tokio::test]
    async fn submit_with_retry_resyncs_and_retries_exactly_once_on_rejection() {
        let gateway = Arc::new(MockBlockchainGateway::new());
        let manager = NonceManager::new(gateway);
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let tx_hash = manager
            .submit_with_retry("0xabc", |nonce| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(super::super::BlockchainError::NonceRejected("stale nonce".to_string()))
                    } else {
                        Ok(format!("0xretry{nonce:08x}"))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2, "exactly one retry after the rejection");
        assert_eq!(tx_hash, "0xretry00000000");
    }

    #[tokio::test]
    async fn submit_with_retry_surfaces_a_second_rejection_rather_than_looping() {
        let gateway = Arc::new(MockBlockchainGateway::new());
        let manager = NonceManager::new(gateway);

        let result = manager
            .submit_with_retry("0xabc", |_nonce| async {
                Err(super::super::BlockchainError::NonceRejected("still stale".to_string()))
            })
            .await;

        assert!(matches!(result, Err(super::super::BlockchainError::NonceRejected(_))));
    }

    #[tokio::test]
    async fn resync_mirrors_the_synced_nonce_into_the_durable_store() {
        let gateway = Arc::new(MockBlockchainGateway::new());
        let store = Arc::new(SqliteNonceStore::connect("sqlite::memory:").await.unwrap());
        let manager = NonceManager::with_store(gateway, store.clone(), "mainnet");

        manager.next_nonce("0xabc").await.unwrap();

        assert_eq!(store.load("0xabc", "mainnet").await.unwrap(), Some(0));
    }
}
