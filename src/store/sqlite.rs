//! SQLite `SagaStore`, used by the `standalone` feature profile and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::schema::{SagaInstances, CREATE_SAGA_INSTANCES_TABLE};
use super::{Result, SagaStore, StoreError};
use crate::saga::{SagaInstance, SagaStatus};

pub struct SqliteSagaStore {
    pool: SqlitePool,
}

impl SqliteSagaStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(StoreError::Sqlite)?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_SAGA_INSTANCES_TABLE)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    fn row_to_instance(row: &sqlx::sqlite::SqliteRow) -> Result<SagaInstance> {
        let status_str: String = row.get("status");
        let status = status_from_str(&status_str);

        Ok(SagaInstance {
            saga_id: parse_uuid(row.get("saga_id"))?,
            saga_type: row.get("saga_type"),
            shipment_id: parse_uuid(row.get("shipment_id"))?,
            warehouse_id: row
                .get::<Option<String>, _>("warehouse_id")
                .map(|s| parse_uuid(&s))
                .transpose()?,
            delivery_id: row
                .get::<Option<String>, _>("delivery_id")
                .map(|s| parse_uuid(&s))
                .transpose()?,
            status,
            current_step: row.get("current_step"),
            started_at: parse_timestamp(row.get("started_at"))?,
            updated_at: parse_timestamp(row.get("updated_at"))?,
            failed_step: row.get("failed_step"),
            error_message: row.get("error_message"),
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::InvalidTimestamp(e.to_string()))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidTimestamp(e.to_string()))
}

fn status_from_str(raw: &str) -> SagaStatus {
    match raw {
        "compensating" => SagaStatus::Compensating,
        "completed" => SagaStatus::Completed,
        "failed" => SagaStatus::Failed,
        _ => SagaStatus::Started,
    }
}

const SELECT_COLUMNS: [SagaInstances; 11] = [
    SagaInstances::SagaId,
    SagaInstances::SagaType,
    SagaInstances::ShipmentId,
    SagaInstances::WarehouseId,
    SagaInstances::DeliveryId,
    SagaInstances::Status,
    SagaInstances::CurrentStep,
    SagaInstances::StartedAt,
    SagaInstances::UpdatedAt,
    SagaInstances::FailedStep,
    SagaInstances::ErrorMessage,
];

#[async_trait]
impl SagaStore for SqliteSagaStore {
    async fn insert(&self, saga: &SagaInstance) -> Result<()> {
        if self.get_active_by_shipment(saga.shipment_id).await?.is_some() {
            return Err(StoreError::DuplicateActiveSaga(saga.shipment_id));
        }

        let query = Query::insert()
            .into_table(SagaInstances::Table)
            .columns(SELECT_COLUMNS)
            .values_panic([
                saga.saga_id.to_string().into(),
                saga.saga_type.clone().into(),
                saga.shipment_id.to_string().into(),
                saga.warehouse_id.map(|u| u.to_string()).into(),
                saga.delivery_id.map(|u| u.to_string()).into(),
                saga.status.as_str().into(),
                saga.current_step.clone().into(),
                saga.started_at.to_rfc3339().into(),
                saga.updated_at.to_rfc3339().into(),
                saga.failed_step.clone().into(),
                saga.error_message.clone().into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if e.to_string().contains("UNIQUE") {
                    StoreError::DuplicateActiveSaga(saga.shipment_id)
                } else {
                    StoreError::Sqlite(e)
                }
            })?;
        Ok(())
    }

    async fn upsert(&self, saga: &SagaInstance) -> Result<()> {
        let query = "INSERT INTO saga_instances \
             (saga_id, saga_type, shipment_id, warehouse_id, delivery_id, status, current_step, started_at, updated_at, failed_step, error_message) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(saga_id) DO UPDATE SET \
             status = excluded.status, current_step = excluded.current_step, warehouse_id = excluded.warehouse_id, \
             delivery_id = excluded.delivery_id, updated_at = excluded.updated_at, failed_step = excluded.failed_step, \
             error_message = excluded.error_message";

        sqlx::query(query)
            .bind(saga.saga_id.to_string())
            .bind(&saga.saga_type)
            .bind(saga.shipment_id.to_string())
            .bind(saga.warehouse_id.map(|u| u.to_string()))
            .bind(saga.delivery_id.map(|u| u.to_string()))
            .bind(saga.status.as_str())
            .bind(&saga.current_step)
            .bind(saga.started_at.to_rfc3339())
            .bind(saga.updated_at.to_rfc3339())
            .bind(&saga.failed_step)
            .bind(&saga.error_message)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn get(&self, saga_id: Uuid) -> Result<Option<SagaInstance>> {
        let query = Query::select()
            .columns(SELECT_COLUMNS)
            .from(SagaInstances::Table)
            .and_where(Expr::col(SagaInstances::SagaId).eq(saga_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Sqlite)?;
        row.as_ref().map(Self::row_to_instance).transpose()
    }

    async fn get_active_by_shipment(&self, shipment_id: Uuid) -> Result<Option<SagaInstance>> {
        let query = Query::select()
            .columns(SELECT_COLUMNS)
            .from(SagaInstances::Table)
            .and_where(Expr::col(SagaInstances::ShipmentId).eq(shipment_id.to_string()))
            .and_where(
                Expr::col(SagaInstances::Status)
                    .is_in([SagaStatus::Started.as_str(), SagaStatus::Compensating.as_str()]),
            )
            .order_by(SagaInstances::StartedAt, Order::Desc)
            .limit(1)
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Sqlite)?;
        row.as_ref().map(Self::row_to_instance).transpose()
    }

    async fn list_active(&self, limit: u32) -> Result<Vec<SagaInstance>> {
        let query = Query::select()
            .columns(SELECT_COLUMNS)
            .from(SagaInstances::Table)
            .and_where(
                Expr::col(SagaInstances::Status)
                    .is_in([SagaStatus::Started.as_str(), SagaStatus::Compensating.as_str()]),
            )
            .order_by(SagaInstances::UpdatedAt, Order::Asc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Sqlite)?;
        rows.iter().map(Self::row_to_instance).collect()
    }

    async fn list_stuck(&self, threshold_secs: i64) -> Result<Vec<SagaInstance>> {
        let cutoff = (Utc::now() - chrono::Duration::seconds(threshold_secs)).to_rfc3339();
        let query = Query::select()
            .columns(SELECT_COLUMNS)
            .from(SagaInstances::Table)
            .and_where(
                Expr::col(SagaInstances::Status)
                    .is_in([SagaStatus::Started.as_str(), SagaStatus::Compensating.as_str()]),
            )
            .and_where(Expr::col(SagaInstances::UpdatedAt).lt(cutoff))
            .order_by(SagaInstances::UpdatedAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Sqlite)?;
        rows.iter().map(Self::row_to_instance).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::SHIPMENT_FULFILLMENT;

    async fn test_store() -> SqliteSagaStore {
        SqliteSagaStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = test_store().await;
        let mut saga = SagaInstance::start(Uuid::new_v4(), Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
        saga.warehouse_id = Some(Uuid::new_v4());
        store.insert(&saga).await.unwrap();

        let fetched = store.get(saga.saga_id).await.unwrap().unwrap();
        assert_eq!(fetched.saga_id, saga.saga_id);
        assert_eq!(fetched.saga_type, SHIPMENT_FULFILLMENT);
        assert_eq!(fetched.current_step, "reserve_inventory");
        assert_eq!(fetched.warehouse_id, saga.warehouse_id);
        assert!(fetched.delivery_id.is_none());
    }

    #[tokio::test]
    async fn duplicate_active_saga_for_same_shipment_is_rejected() {
        let store = test_store().await;
        let shipment_id = Uuid::new_v4();
        let first = SagaInstance::start(shipment_id, Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
        let second = SagaInstance::start(shipment_id, Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");

        store.insert(&first).await.unwrap();
        let err = store.insert(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateActiveSaga(_)));
    }

    #[tokio::test]
    async fn completed_saga_does_not_block_a_new_active_saga() {
        let store = test_store().await;
        let shipment_id = Uuid::new_v4();
        let mut first = SagaInstance::start(shipment_id, Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
        first.mark_completed().unwrap();
        store.insert(&first).await.unwrap();

        let second = SagaInstance::start(shipment_id, Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
        store.insert(&second).await.unwrap();

        let active = store.get_active_by_shipment(shipment_id).await.unwrap().unwrap();
        assert_eq!(active.saga_id, second.saga_id);
    }

    #[tokio::test]
    async fn upsert_updates_mutable_columns_only() {
        let store = test_store().await;
        let mut saga = SagaInstance::start(Uuid::new_v4(), Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
        store.insert(&saga).await.unwrap();

        saga.delivery_id = Some(Uuid::new_v4());
        saga.advance_step("assign_courier");
        store.upsert(&saga).await.unwrap();

        let fetched = store.get(saga.saga_id).await.unwrap().unwrap();
        assert_eq!(fetched.current_step, "assign_courier");
        assert_eq!(fetched.delivery_id, saga.delivery_id);
        assert_eq!(fetched.started_at, saga.started_at);
    }

    #[tokio::test]
    async fn list_active_excludes_terminal_sagas() {
        let store = test_store().await;
        let active = SagaInstance::start(Uuid::new_v4(), Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
        let mut done = SagaInstance::start(Uuid::new_v4(), Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
        done.mark_completed().unwrap();

        store.insert(&active).await.unwrap();
        store.insert(&done).await.unwrap();

        let listed = store.list_active(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].saga_id, active.saga_id);
    }

    #[tokio::test]
    async fn list_active_orders_oldest_updated_at_first() {
        let store = test_store().await;

        let mut older = SagaInstance::start(Uuid::new_v4(), Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
        older.updated_at = Utc::now() - chrono::Duration::minutes(10);
        let mut newer = SagaInstance::start(Uuid::new_v4(), Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
        newer.updated_at = Utc::now();

        // insert newer first so a bug ordering by insertion/started_at would
        // surface it ahead of the genuinely stuck older saga
        store.insert(&newer).await.unwrap();
        store.insert(&older).await.unwrap();

        let listed = store.list_active(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].saga_id, older.saga_id, "oldest updated_at must come first");
        assert_eq!(listed[1].saga_id, newer.saga_id);
    }
}
