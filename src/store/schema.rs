//! Table and column identifiers for type-safe query building with sea-query.

use sea_query::Iden;

#[derive(Iden)]
pub enum SagaInstances {
    Table,
    #[iden = "saga_id"]
    SagaId,
    #[iden = "saga_type"]
    SagaType,
    #[iden = "shipment_id"]
    ShipmentId,
    #[iden = "warehouse_id"]
    WarehouseId,
    #[iden = "delivery_id"]
    DeliveryId,
    #[iden = "status"]
    Status,
    #[iden = "current_step"]
    CurrentStep,
    #[iden = "started_at"]
    StartedAt,
    #[iden = "updated_at"]
    UpdatedAt,
    #[iden = "failed_step"]
    FailedStep,
    #[iden = "error_message"]
    ErrorMessage,
}

pub const CREATE_SAGA_INSTANCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS saga_instances (
    saga_id TEXT PRIMARY KEY,
    saga_type TEXT NOT NULL,
    shipment_id TEXT NOT NULL,
    warehouse_id TEXT,
    delivery_id TEXT,
    status TEXT NOT NULL,
    current_step TEXT NOT NULL,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    failed_step TEXT,
    error_message TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_saga_instances_active_shipment
    ON saga_instances(shipment_id)
    WHERE status IN ('started', 'compensating');

CREATE INDEX IF NOT EXISTS idx_saga_instances_status ON saga_instances(status);
"#;

pub const CREATE_SAGA_INSTANCES_TABLE_POSTGRES: &str = r#"
CREATE TABLE IF NOT EXISTS saga_instances (
    saga_id UUID PRIMARY KEY,
    saga_type TEXT NOT NULL,
    shipment_id UUID NOT NULL,
    warehouse_id UUID,
    delivery_id UUID,
    status TEXT NOT NULL,
    current_step TEXT NOT NULL,
    started_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    failed_step TEXT,
    error_message TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_saga_instances_active_shipment
    ON saga_instances(shipment_id)
    WHERE status IN ('started', 'compensating');

CREATE INDEX IF NOT EXISTS idx_saga_instances_status ON saga_instances(status);
"#;
