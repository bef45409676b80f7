//! Saga State Store: durable persistence for `SagaInstance` rows.
//!
//! Two backends, selected by Cargo feature: `sqlite` for standalone/test
//! deployments, `postgres` for production. Both enforce "at most one active
//! saga per shipment" through a partial unique index rather than an
//! application-level check-then-insert race.

pub mod schema;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PostgresSagaStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSagaStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::saga::SagaInstance;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("saga {0} not found")]
    NotFound(Uuid),

    #[error("an active saga already exists for shipment {0}")]
    DuplicateActiveSaga(Uuid),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Postgres(sqlx::Error),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Sqlite(sqlx::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid timestamp stored in row: {0}")]
    InvalidTimestamp(String),
}

/// Durable persistence for saga instances, keyed by `saga_id`
/// (== `correlation_id` on the wire).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Insert a new saga instance. Fails with `DuplicateActiveSaga` if an
    /// active (started/compensating) saga already exists for this shipment.
    async fn insert(&self, saga: &SagaInstance) -> Result<()>;

    /// Replace the stored row for `saga.saga_id`, touching only mutable
    /// columns (status, current_step, warehouse_id, delivery_id, updated_at,
    /// failed_step, error_message) — an UPSERT that never changes
    /// `shipment_id`, `saga_type`, or `started_at`.
    async fn upsert(&self, saga: &SagaInstance) -> Result<()>;

    async fn get(&self, saga_id: Uuid) -> Result<Option<SagaInstance>>;

    /// The single active (started/compensating) saga for a shipment, if any.
    /// Deliberately stricter than an unfiltered "most recent saga for this
    /// shipment" lookup: a shipment may have many completed/failed sagas in
    /// its history, but only one may be active at a time.
    async fn get_active_by_shipment(&self, shipment_id: Uuid) -> Result<Option<SagaInstance>>;

    /// Active sagas ordered by oldest `updated_at` first, capped at `limit`
    /// — so an operator paging through this list reaches the sagas most in
    /// need of attention before the limit is exhausted.
    async fn list_active(&self, limit: u32) -> Result<Vec<SagaInstance>>;

    /// Active sagas whose `updated_at` is older than `threshold_secs` ago,
    /// for the stuck-saga reaper sweep.
    async fn list_stuck(&self, threshold_secs: i64) -> Result<Vec<SagaInstance>>;
}
