//! Stuck-saga reaper: periodically sweeps for active sagas that have not
//! advanced within `stuck_saga_threshold_secs` and logs them.
//!
//! Observability-only by design (see Open Question decisions in
//! `DESIGN.md`): a saga stuck past the threshold usually means a downstream
//! consumer died silently, and the fix for that is an operator paging on
//! this log line, not an automatic status flip that could race the
//! consumer recovering on its own.

use std::sync::Arc;

use tracing::warn;

use crate::config::SagaSettings;
use crate::store::SagaStore;

pub struct StuckSagaReaper {
    store: Arc<dyn SagaStore>,
    settings: SagaSettings,
}

impl StuckSagaReaper {
    pub fn new(store: Arc<dyn SagaStore>, settings: SagaSettings) -> Self {
        Self { store, settings }
    }

    /// Runs forever, sweeping at `reaper_sweep_interval_secs`. Intended to be
    /// spawned as its own task alongside the orchestrator.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.settings.reaper_sweep_interval());
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep().await {
                warn!(error = %e, "stuck saga sweep failed");
            }
        }
    }

    async fn sweep(&self) -> crate::store::Result<()> {
        let stuck = self
            .store
            .list_stuck(self.settings.stuck_saga_threshold_secs as i64)
            .await?;
        for saga in &stuck {
            warn!(
                saga_id = %saga.saga_id,
                shipment_id = %saga.shipment_id,
                status = ?saga.status,
                current_step = %saga.current_step,
                stuck_for_secs = self.settings.stuck_saga_threshold_secs,
                "saga has not advanced within the stuck-saga threshold"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::{SagaInstance, SHIPMENT_FULFILLMENT};
    use crate::store::SqliteSagaStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_does_not_error_with_no_stuck_sagas() {
        let store = Arc::new(SqliteSagaStore::connect("sqlite::memory:").await.unwrap());
        let reaper = StuckSagaReaper::new(store, SagaSettings::default());
        reaper.sweep().await.unwrap();
    }

    #[tokio::test]
    async fn sweep_finds_a_saga_stuck_past_the_threshold() {
        let store = Arc::new(SqliteSagaStore::connect("sqlite::memory:").await.unwrap());
        let mut saga = SagaInstance::start(Uuid::new_v4(), Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
        saga.updated_at = chrono::Utc::now() - chrono::Duration::hours(2);
        store.insert(&saga).await.unwrap();

        let settings = SagaSettings {
            stuck_saga_threshold_secs: 3600,
            ..SagaSettings::default()
        };
        let reaper = StuckSagaReaper::new(store.clone(), settings);
        reaper.sweep().await.unwrap();

        let stuck = store.list_stuck(3600).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].saga_id, saga.saga_id);
    }
}
