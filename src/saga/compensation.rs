//! Saga Compensation Worker (C4): a standalone rollback executor.
//!
//! Sole owner of the failure-indicating events (`inventory.insufficient`,
//! `delivery.failed`, `courier.unassigned`): it issues the compensating
//! commands for whichever saga they reference. `SagaOrchestrator` does not
//! also react to these events — see its module docs — so there is exactly
//! one compensation path per saga instead of two racing to mark it
//! Compensating first.
//!
//! Grounded in `SagaCompensationWorker` from the system this was distilled
//! from.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};

use super::{Result, SagaError, SagaInstance};
use crate::domain::catalog::topics;
use crate::domain::{Command, CommandKind, Event, EventKind};
use crate::messaging::MessagingPort;
use crate::store::SagaStore;

const INVENTORY_INSUFFICIENT: &str = "inventory.insufficient";
const DELIVERY_FAILED: &str = "delivery.failed";
const COURIER_UNASSIGNED: &str = "courier.unassigned";

pub struct CompensationWorker {
    queue: Arc<dyn MessagingPort>,
    store: Arc<dyn SagaStore>,
}

impl CompensationWorker {
    pub fn new(queue: Arc<dyn MessagingPort>, store: Arc<dyn SagaStore>) -> Self {
        Self { queue, store }
    }

    pub async fn run(&self) -> Result<()> {
        info!("saga compensation worker running");
        let mut events = self
            .queue
            .consume_event(&[topics::INVENTORY_EVENTS, topics::DELIVERY_EVENTS])
            .await?;

        while let Some(event) = events.recv().await {
            if !matches!(
                event.event_type.as_str(),
                INVENTORY_INSUFFICIENT | DELIVERY_FAILED | COURIER_UNASSIGNED
            ) {
                continue;
            }
            if let Err(e) = self.handle_failure_event(&event).await {
                error!(error = %e, event_id = %event.event_id, event_type = %event.event_type, "error handling failure event");
            }
        }
        Ok(())
    }

    async fn handle_failure_event(&self, event: &Event) -> Result<()> {
        let Some(saga_id) = event.correlation_id else {
            warn!(event_type = %event.event_type, "skipping event without correlation_id");
            return Ok(());
        };

        let Some(mut saga) = self.store.get(saga_id).await? else {
            error!(%saga_id, "saga instance not found");
            return Ok(());
        };

        if saga.status.is_terminal() || saga.status == super::SagaStatus::Compensating {
            info!(status = ?saga.status, "saga already in final or compensating state");
            return Ok(());
        }

        info!(reason = %event.event_type, "triggering compensation");
        if let Err(SagaError::AlreadyTerminal { .. }) = saga.mark_compensating(&event.event_type) {
            return Ok(());
        }
        self.store.upsert(&saga).await?;

        self.execute_compensation_strategy(&saga, event).await?;

        let error_message = format!("compensation triggered by {}", event.event_type);
        saga.mark_failed(&event.event_type, &error_message)?;
        self.store.upsert(&saga).await?;

        let saga_failed = Event::new(
            EventKind::SagaFailed,
            saga_id,
            json!({"saga_id": saga_id, "saga_type": saga.saga_type, "error_message": error_message}),
            Some(saga_id),
        );
        self.queue.publish_event(&saga_failed, &[topics::SAGA_EVENTS]).await?;
        Ok(())
    }

    async fn execute_compensation_strategy(&self, saga: &SagaInstance, trigger: &Event) -> Result<()> {
        let reason = trigger
            .payload
            .get("reason")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("triggered by {}", trigger.event_type));

        match trigger.event_type.as_str() {
            DELIVERY_FAILED => {
                self.compensate_delivery(saga, &reason).await?;
                self.compensate_inventory(saga, "delivery failed rollback").await?;
                self.compensate_shipment(saga, "delivery failed rollback").await?;
            }
            COURIER_UNASSIGNED => {
                self.compensate_inventory(saga, "courier unassigned rollback").await?;
                self.compensate_shipment(saga, "courier unassigned rollback").await?;
            }
            INVENTORY_INSUFFICIENT => {
                self.compensate_shipment(saga, "inventory insufficient").await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn compensate_inventory(&self, saga: &SagaInstance, reason: &str) -> Result<()> {
        let Some(warehouse_id) = saga.warehouse_id else {
            warn!(saga_id = %saga.saga_id, "skipping inventory compensation: no warehouse_id");
            return Ok(());
        };
        let command = Command::new(
            CommandKind::ReleaseInventory,
            saga.shipment_id,
            json!({
                "shipment_id": saga.shipment_id,
                "warehouse_id": warehouse_id,
                "items": [],
                "reason": reason,
            }),
            Some(saga.saga_id),
        );
        self.queue.publish_command(&command, &[topics::INVENTORY_COMMANDS]).await?;
        info!("sent ReleaseInventoryCommand");
        Ok(())
    }

    async fn compensate_shipment(&self, saga: &SagaInstance, reason: &str) -> Result<()> {
        let command = Command::new(
            CommandKind::CancelShipment,
            saga.shipment_id,
            json!({"shipment_id": saga.shipment_id, "reason": reason}),
            Some(saga.saga_id),
        );
        self.queue.publish_command(&command, &[topics::SHIPMENT_COMMANDS]).await?;
        info!("sent CancelShipmentCommand");
        Ok(())
    }

    async fn compensate_delivery(&self, saga: &SagaInstance, reason: &str) -> Result<()> {
        let Some(delivery_id) = saga.delivery_id else {
            return Ok(());
        };
        let command = Command::new(
            CommandKind::UnassignCourier,
            saga.shipment_id,
            json!({"delivery_id": delivery_id, "reason": reason}),
            Some(saga.saga_id),
        );
        self.queue.publish_command(&command, &[topics::DELIVERY_COMMANDS]).await?;
        info!("sent UnassignCourierCommand");
        Ok(())
    }
}
