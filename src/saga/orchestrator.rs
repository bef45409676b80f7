//! Saga Orchestrator (C3): drives the `ShipmentFulfillment` saga forward by
//! reacting to shipment/inventory/delivery events and issuing the next
//! command in the happy path, or compensating commands on failure.
//!
//! Grounded in `ShipmentFulfillmentSagaOrchestrator` from the system this
//! was distilled from: three independent per-topic consumer loops run
//! concurrently (there, `asyncio.gather`; here, `tokio::try_join!`).
//!
//! ```text
//! ShipmentCreated --> ReserveInventory --> InventoryReserved --> AssignCourier --> CourierAssigned --> SagaCompleted
//!                                       \-> InventoryInsufficient -> SagaFailed (ShipmentCancelled)
//! ```
//!
//! `delivery.failed` is deliberately not handled here: the system this was
//! distilled from never actually wires the orchestrator's own compensation
//! path into its running process (only `SagaCompensationWorker` runs), and
//! having both the orchestrator and the compensation worker react to the
//! same failure event races on which one gets to mark the saga Compensating
//! first. `super::compensation::CompensationWorker` is the sole owner of
//! `delivery.failed` handling.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::{Result, SagaInstance, SHIPMENT_FULFILLMENT};
use crate::domain::catalog::topics;
use crate::domain::{Command, CommandKind, Event, EventKind};
use crate::messaging::MessagingPort;
use crate::store::SagaStore;

pub struct SagaOrchestrator {
    queue: Arc<dyn MessagingPort>,
    store: Arc<dyn SagaStore>,
}

impl SagaOrchestrator {
    pub fn new(queue: Arc<dyn MessagingPort>, store: Arc<dyn SagaStore>) -> Self {
        Self { queue, store }
    }

    /// Runs the three consumer loops until one of them ends (channel closed
    /// or task cancelled). Each loop is an independent task, matching the
    /// "each major loop is an independent task" concurrency model.
    pub async fn run(&self) -> Result<()> {
        tokio::try_join!(
            self.consume_shipment_events(),
            self.consume_inventory_events(),
            self.consume_delivery_events(),
        )?;
        Ok(())
    }

    async fn consume_shipment_events(&self) -> Result<()> {
        let mut events = self.queue.consume_event(&[topics::SHIPMENT_EVENTS]).await?;
        while let Some(event) = events.recv().await {
            if event.event_type == EventKind::ShipmentCreated.as_str() {
                if let Err(e) = self.on_shipment_created(&event).await {
                    warn!(error = %e, event_id = %event.event_id, "failed to handle shipment.created");
                }
            }
        }
        Ok(())
    }

    async fn consume_inventory_events(&self) -> Result<()> {
        let mut events = self.queue.consume_event(&[topics::INVENTORY_EVENTS]).await?;
        while let Some(event) = events.recv().await {
            let outcome = if event.event_type == EventKind::InventoryReserved.as_str() {
                self.on_inventory_reserved(&event).await
            } else if event.event_type == EventKind::InventoryInsufficient.as_str() {
                self.on_inventory_insufficient(&event).await
            } else {
                Ok(())
            };
            if let Err(e) = outcome {
                warn!(error = %e, event_id = %event.event_id, "failed to handle inventory event");
            }
        }
        Ok(())
    }

    async fn consume_delivery_events(&self) -> Result<()> {
        let mut events = self.queue.consume_event(&[topics::DELIVERY_EVENTS]).await?;
        while let Some(event) = events.recv().await {
            if event.event_type == EventKind::CourierAssigned.as_str() {
                if let Err(e) = self.on_courier_assigned(&event).await {
                    warn!(error = %e, event_id = %event.event_id, "failed to handle delivery event");
                }
            }
            // delivery.failed: left to CompensationWorker, see module docs.
        }
        Ok(())
    }

    async fn on_shipment_created(&self, event: &Event) -> Result<()> {
        let shipment_id = event.aggregate_id;
        let warehouse_id = event
            .payload
            .get("warehouse_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());
        let items = event.payload.get("items").cloned().unwrap_or_else(|| json!([]));

        let saga_id = Uuid::new_v4();
        let mut saga = SagaInstance::start(shipment_id, saga_id, SHIPMENT_FULFILLMENT, "reserve_inventory");
        saga.warehouse_id = warehouse_id;
        self.store.insert(&saga).await?;
        info!(saga_id = %saga_id, %shipment_id, "saga started");

        let started = Event::new(
            EventKind::SagaStarted,
            saga_id,
            json!({
                "saga_id": saga_id,
                "saga_type": SHIPMENT_FULFILLMENT,
                "shipment_id": shipment_id,
            }),
            Some(saga_id),
        );
        self.queue.publish_event(&started, &[topics::SAGA_EVENTS]).await?;

        let reserve = Command::new(
            CommandKind::ReserveInventory,
            shipment_id,
            json!({
                "shipment_id": shipment_id,
                "warehouse_id": warehouse_id.unwrap_or(Uuid::nil()),
                "items": items,
            }),
            Some(saga_id),
        );
        self.queue
            .publish_command(&reserve, &[topics::INVENTORY_COMMANDS])
            .await?;
        Ok(())
    }

    async fn on_inventory_reserved(&self, event: &Event) -> Result<()> {
        let Some(saga_id) = event.correlation_id else {
            return Ok(());
        };
        let Some(mut saga) = self.store.get(saga_id).await? else {
            warn!(%saga_id, "saga not found for inventory.reserved");
            return Ok(());
        };

        let delivery_id = Uuid::new_v4();
        saga.delivery_id = Some(delivery_id);
        saga.advance_step("assign_courier");
        self.store.upsert(&saga).await?;

        let assign = Command::new(
            CommandKind::AssignCourier,
            saga.shipment_id,
            json!({
                "shipment_id": saga.shipment_id,
                "delivery_id": delivery_id,
            }),
            Some(saga_id),
        );
        self.queue
            .publish_command(&assign, &[topics::DELIVERY_COMMANDS])
            .await?;
        Ok(())
    }

    async fn on_inventory_insufficient(&self, event: &Event) -> Result<()> {
        let Some(saga_id) = event.correlation_id else {
            return Ok(());
        };
        let Some(mut saga) = self.store.get(saga_id).await? else {
            warn!(%saga_id, "saga not found for inventory.insufficient");
            return Ok(());
        };

        saga.mark_failed("inventory.reserve", "inventory_insufficient")?;
        self.store.upsert(&saga).await?;

        let cancelled = Event::new(
            EventKind::ShipmentCancelled,
            saga.shipment_id,
            json!({"shipment_id": saga.shipment_id, "reason": "inventory_insufficient"}),
            Some(saga_id),
        );
        self.queue
            .publish_event(&cancelled, &[topics::SHIPMENT_EVENTS])
            .await?;

        let saga_failed = Event::new(
            EventKind::SagaFailed,
            saga_id,
            json!({"saga_id": saga_id, "error_message": "inventory_insufficient"}),
            Some(saga_id),
        );
        self.queue.publish_event(&saga_failed, &[topics::SAGA_EVENTS]).await?;
        Ok(())
    }

    async fn on_courier_assigned(&self, event: &Event) -> Result<()> {
        let Some(saga_id) = event.correlation_id else {
            return Ok(());
        };
        let Some(mut saga) = self.store.get(saga_id).await? else {
            warn!(%saga_id, "saga not found for courier.assigned");
            return Ok(());
        };

        saga.mark_completed()?;
        self.store.upsert(&saga).await?;

        let completed = Event::new(
            EventKind::SagaCompleted,
            saga_id,
            json!({"saga_id": saga_id}),
            Some(saga_id),
        );
        self.queue.publish_event(&completed, &[topics::SAGA_EVENTS]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::ChannelMessagingPort;
    use crate::store::SqliteSagaStore;
    use std::time::Duration;

    async fn harness() -> (SagaOrchestrator, Arc<ChannelMessagingPort>, Arc<SqliteSagaStore>) {
        let queue = Arc::new(ChannelMessagingPort::new());
        let store = Arc::new(SqliteSagaStore::connect("sqlite::memory:").await.unwrap());
        let orchestrator = SagaOrchestrator::new(queue.clone(), store.clone());
        (orchestrator, queue, store)
    }

    #[tokio::test]
    async fn shipment_created_starts_a_saga_and_requests_inventory() {
        let (orchestrator, queue, store) = harness().await;
        let mut commands = queue.consume_command(&[topics::INVENTORY_COMMANDS]).await.unwrap();

        tokio::spawn(async move {
            orchestrator.consume_shipment_events().await.unwrap();
        });

        let shipment_id = Uuid::new_v4();
        let created = Event::new(
            EventKind::ShipmentCreated,
            shipment_id,
            json!({"items": [{"sku": "widget", "qty": 2}]}),
            None,
        );
        queue.publish_event(&created, &[topics::SHIPMENT_EVENTS]).await.unwrap();

        let command = tokio::time::timeout(Duration::from_millis(500), commands.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(command.command_type, CommandKind::ReserveInventory.as_str());

        let active = store.get_active_by_shipment(shipment_id).await.unwrap();
        assert!(active.is_some());
    }

    #[tokio::test]
    async fn inventory_insufficient_fails_the_saga_and_cancels_the_shipment() {
        let (orchestrator, queue, store) = harness().await;
        let shipment_id = Uuid::new_v4();
        let saga_id = Uuid::new_v4();
        let saga = SagaInstance::start(shipment_id, saga_id, SHIPMENT_FULFILLMENT, "reserve_inventory");
        store.insert(&saga).await.unwrap();

        let mut shipment_events = queue.consume_event(&[topics::SHIPMENT_EVENTS]).await.unwrap();

        let event = Event::new(
            EventKind::InventoryInsufficient,
            shipment_id,
            json!({"shipment_id": shipment_id}),
            Some(saga_id),
        );
        orchestrator.on_inventory_insufficient(&event).await.unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(200), shipment_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cancelled.event_type, EventKind::ShipmentCancelled.as_str());

        let saga = store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, super::super::SagaStatus::Failed);
    }

    #[tokio::test]
    async fn delivery_failed_is_ignored_by_the_orchestrator() {
        // CompensationWorker is the sole owner of delivery.failed handling;
        // the orchestrator's delivery consumer must leave the saga untouched
        // and emit no commands for it.
        let (orchestrator, queue, store) = harness().await;
        let shipment_id = Uuid::new_v4();
        let saga_id = Uuid::new_v4();
        let saga = SagaInstance::start(shipment_id, saga_id, SHIPMENT_FULFILLMENT, "assign_courier");
        store.insert(&saga).await.unwrap();

        let mut inventory_commands = queue.consume_command(&[topics::INVENTORY_COMMANDS]).await.unwrap();

        tokio::spawn(async move {
            orchestrator.consume_delivery_events().await.unwrap();
        });

        let event = Event::new(EventKind::DeliveryFailed, shipment_id, json!({}), Some(saga_id));
        queue.publish_event(&event, &[topics::DELIVERY_EVENTS]).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(200), inventory_commands.recv()).await;
        assert!(outcome.is_err(), "orchestrator must not react to delivery.failed");

        let saga = store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, super::super::SagaStatus::Started);
    }
}
