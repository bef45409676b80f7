//! PostgreSQL `SagaStore`, the production backend.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, Order, PostgresQueryBuilder, Query};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::schema::{SagaInstances, CREATE_SAGA_INSTANCES_TABLE_POSTGRES};
use super::{Result, SagaStore, StoreError};
use crate::saga::{SagaInstance, SagaStatus};

pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(StoreError::Postgres)?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_SAGA_INSTANCES_TABLE_POSTGRES)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Postgres)?;
        Ok(())
    }

    fn row_to_instance(row: &sqlx::postgres::PgRow) -> Result<SagaInstance> {
        let status_str: String = row.get("status");
        Ok(SagaInstance {
            saga_id: row.get("saga_id"),
            saga_type: row.get("saga_type"),
            shipment_id: row.get("shipment_id"),
            warehouse_id: row.get::<Option<Uuid>, _>("warehouse_id"),
            delivery_id: row.get::<Option<Uuid>, _>("delivery_id"),
            status: status_from_str(&status_str),
            current_step: row.get("current_step"),
            started_at: row.get("started_at"),
            updated_at: row.get("updated_at"),
            failed_step: row.get("failed_step"),
            error_message: row.get("error_message"),
        })
    }
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
impl SagaStore for PostgresSagaStore {
    async fn insert(&self, saga: &SagaInstance) -> Result<()> {
        let query = "INSERT INTO saga_instances \
            (saga_id, saga_type, shipment_id, warehouse_id, delivery_id, status, current_step, started_at, updated_at, failed_step, error_message) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

        sqlx::query(query)
            .bind(saga.saga_id)
            .bind(&saga.saga_type)
            .bind(saga.shipment_id)
            .bind(saga.warehouse_id)
            .bind(saga.delivery_id)
            .bind(saga.status.as_str())
            .bind(&saga.current_step)
            .bind(saga.started_at)
            .bind(saga.updated_at)
            .bind(&saga.failed_step)
            .bind(&saga.error_message)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if e.as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false)
                {
                    StoreError::DuplicateActiveSaga(saga.shipment_id)
                } else {
                    StoreError::Postgres(e)
                }
            })?;
        Ok(())
    }

    async fn upsert(&self, saga: &SagaInstance) -> Result<()> {
        let query = "INSERT INTO saga_instances \
            (saga_id, saga_type, shipment_id, warehouse_id, delivery_id, status, current_step, started_at, updated_at, failed_step, error_message) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
            ON CONFLICT (saga_id) DO UPDATE SET \
            status = EXCLUDED.status, current_step = EXCLUDED.current_step, warehouse_id = EXCLUDED.warehouse_id, \
            delivery_id = EXCLUDED.delivery_id, updated_at = EXCLUDED.updated_at, failed_step = EXCLUDED.failed_step, \
            error_message = EXCLUDED.error_message";

        sqlx::query(query)
            .bind(saga.saga_id)
            .bind(&saga.saga_type)
            .bind(saga.shipment_id)
            .bind(saga.warehouse_id)
            .bind(saga.delivery_id)
            .bind(saga.status.as_str())
            .bind(&saga.current_step)
            .bind(saga.started_at)
            .bind(saga.updated_at)
            .bind(&saga.failed_step)
            .bind(&saga.error_message)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Postgres)?;
        Ok(())
    }

    async fn get(&self, saga_id: Uuid) -> Result<Option<SagaInstance>> {
        let row = sqlx::query("SELECT * FROM saga_instances WHERE saga_id = $1")
            .bind(saga_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Postgres)?;
        row.as_ref().map(Self::row_to_instance).transpose()
    }

    async fn get_active_by_shipment(&self, shipment_id: Uuid) -> Result<Option<SagaInstance>> {
        let query = Query::select()
            .columns(SELECT_COLUMNS)
            .from(SagaInstances::Table)
            .and_where(Expr::col(SagaInstances::ShipmentId).eq(shipment_id))
            .and_where(
                Expr::col(SagaInstances::Status)
                    .is_in([SagaStatus::Started.as_str(), SagaStatus::Compensating.as_str()]),
            )
            .order_by(SagaInstances::StartedAt, Order::Desc)
            .limit(1)
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Postgres)?;
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
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Postgres)?;
        rows.iter().map(Self::row_to_instance).collect()
    }

    async fn list_stuck(&self, threshold_secs: i64) -> Result<Vec<SagaInstance>> {
        let cutoff = Utc::now() - chrono::Duration::seconds(threshold_secs);
        let query = Query::select()
            .columns(SELECT_COLUMNS)
            .from(SagaInstances::Table)
            .and_where(
                Expr::col(SagaInstances::Status)
                    .is_in([SagaStatus::Started.as_str(), SagaStatus::Compensating.as_str()]),
            )
            .and_where(Expr::col(SagaInstances::UpdatedAt).lt(cutoff))
            .order_by(SagaInstances::UpdatedAt, Order::Asc)
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Postgres)?;
        rows.iter().map(Self::row_to_instance).collect()
    }
}
