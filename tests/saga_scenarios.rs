//! End-to-end scenarios for the saga orchestrator, run against the
//! in-memory channel bus and an in-memory SQLite store — no external
//! broker or database required.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use shipment_saga::domain::catalog::topics;
use shipment_saga::domain::{Command, CommandKind, Event, EventKind};
use shipment_saga::messaging::{ChannelMessagingPort, MessagingPort};
use shipment_saga::saga::{CompensationWorker, SagaInstance, SagaOrchestrator, SagaStatus, SHIPMENT_FULFILLMENT};
use shipment_saga::store::{SagaStore, SqliteSagaStore};

async fn harness() -> (Arc<ChannelMessagingPort>, Arc<SqliteSagaStore>) {
    let queue = Arc::new(ChannelMessagingPort::new());
    let store = Arc::new(SqliteSagaStore::connect("sqlite::memory:").await.unwrap());
    (queue, store)
}

async fn recv_command(commands: &mut shipment_saga::messaging::CommandStream) -> Command {
    tokio::time::timeout(Duration::from_millis(200), commands.recv())
        .await
        .expect("command received within timeout")
        .expect("command channel open")
}

#[tokio::test]
async fn s1_happy_path_runs_a_saga_to_completion() {
    let (queue, store) = harness().await;
    let orchestrator = Arc::new(SagaOrchestrator::new(queue.clone(), store.clone()));
    let handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run().await }
    });

    let mut inventory_commands = queue.consume_command(&[topics::INVENTORY_COMMANDS]).await.unwrap();
    let mut delivery_commands = queue.consume_command(&[topics::DELIVERY_COMMANDS]).await.unwrap();
    let mut saga_events = queue.consume_event(&[topics::SAGA_EVENTS]).await.unwrap();

    let shipment_id = Uuid::new_v4();
    let warehouse_id = Uuid::new_v4();
    let created = Event::new(
        EventKind::ShipmentCreated,
        shipment_id,
        json!({"warehouse_id": warehouse_id, "items": [{"sku": "widget", "qty": 1}]}),
        None,
    );
    queue.publish_event(&created, &[topics::SHIPMENT_EVENTS]).await.unwrap();

    let reserve = recv_command(&mut inventory_commands).await;
    assert_eq!(reserve.command_type, "inventory.reserve");
    let saga_id = reserve.correlation_id.expect("reserve command carries saga id");

    let reserved = Event::new(
        EventKind::InventoryReserved,
        shipment_id,
        json!({"warehouse_id": warehouse_id}),
        Some(saga_id),
    );
    queue.publish_event(&reserved, &[topics::INVENTORY_EVENTS]).await.unwrap();

    let assign = recv_command(&mut delivery_commands).await;
    assert_eq!(assign.command_type, "courier.assign");

    let delivery_id = Uuid::new_v4();
    let assigned = Event::new(
        EventKind::CourierAssigned,
        shipment_id,
        json!({"delivery_id": delivery_id}),
        Some(saga_id),
    );
    queue.publish_event(&assigned, &[topics::DELIVERY_EVENTS]).await.unwrap();

    let completed = tokio::time::timeout(Duration::from_millis(200), saga_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.event_type, "saga.completed");

    let saga = store.get(saga_id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Completed);

    handle.abort();
}

#[tokio::test]
async fn s4_redelivered_shipment_created_does_not_duplicate_the_saga() {
    let (queue, store) = harness().await;
    let orchestrator = Arc::new(SagaOrchestrator::new(queue.clone(), store.clone()));
    let handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run().await }
    });

    let mut inventory_commands = queue.consume_command(&[topics::INVENTORY_COMMANDS]).await.unwrap();

    let shipment_id = Uuid::new_v4();
    let created = Event::new(
        EventKind::ShipmentCreated,
        shipment_id,
        json!({"warehouse_id": Uuid::new_v4(), "items": []}),
        None,
    );

    // at-least-once delivery: publish the same logical event twice
    queue.publish_event(&created, &[topics::SHIPMENT_EVENTS]).await.unwrap();
    queue.publish_event(&created, &[topics::SHIPMENT_EVENTS]).await.unwrap();

    let _first = recv_command(&mut inventory_commands).await;

    // give the second delivery a chance to be (re)processed before asserting
    tokio::time::sleep(Duration::from_millis(100)).await;

    let active = store.list_active(10).await.unwrap();
    let for_shipment: Vec<_> = active.iter().filter(|s| s.shipment_id == shipment_id).collect();
    assert_eq!(for_shipment.len(), 1, "exactly one saga row per shipment, even under redelivery");

    handle.abort();
}

#[tokio::test]
async fn i2_at_most_one_active_saga_per_shipment_is_enforced_by_the_store() {
    let (_queue, store) = harness().await;
    let shipment_id = Uuid::new_v4();

    let first = SagaInstance::start(shipment_id, Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
    store.insert(&first).await.unwrap();

    let second = SagaInstance::start(shipment_id, Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
    let result = store.insert(&second).await;
    assert!(result.is_err(), "a second active saga for the same shipment must be rejected");

    // completing the first saga frees the shipment up for a new active saga
    let mut completed = first.clone();
    completed.mark_completed().unwrap();
    store.upsert(&completed).await.unwrap();

    let third = SagaInstance::start(shipment_id, Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
    store.insert(&third).await.unwrap();
}

#[tokio::test]
async fn s3_delivery_failure_triggers_exactly_one_compensation_pass() {
    // Both the orchestrator and the compensation worker run concurrently
    // against the same bus and store, as they do in the real binary. Only
    // the compensation worker owns delivery.failed, so exactly one
    // Unassign/Release/Cancel triple is emitted, never two.
    let (queue, store) = harness().await;
    let orchestrator = Arc::new(SagaOrchestrator::new(queue.clone(), store.clone()));
    let compensation = Arc::new(CompensationWorker::new(queue.clone(), store.clone()));

    let orchestrator_handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run().await }
    });
    let compensation_handle = tokio::spawn({
        let compensation = compensation.clone();
        async move { compensation.run().await }
    });

    let shipment_id = Uuid::new_v4();
    let saga_id = Uuid::new_v4();
    let mut saga = SagaInstance::start(shipment_id, saga_id, SHIPMENT_FULFILLMENT, "assign_courier");
    saga.warehouse_id = Some(Uuid::new_v4());
    saga.delivery_id = Some(Uuid::new_v4());
    store.insert(&saga).await.unwrap();

    let mut delivery_commands = queue.consume_command(&[topics::DELIVERY_COMMANDS]).await.unwrap();
    let mut inventory_commands = queue.consume_command(&[topics::INVENTORY_COMMANDS]).await.unwrap();
    let mut shipment_commands = queue.consume_command(&[topics::SHIPMENT_COMMANDS]).await.unwrap();

    let failed = Event::new(EventKind::DeliveryFailed, shipment_id, json!({}), Some(saga_id));
    queue.publish_event(&failed, &[topics::DELIVERY_EVENTS]).await.unwrap();

    let unassign = recv_command(&mut delivery_commands).await;
    assert_eq!(unassign.command_type, CommandKind::UnassignCourier.as_str());

    let release = recv_command(&mut inventory_commands).await;
    assert_eq!(release.command_type, CommandKind::ReleaseInventory.as_str());

    let cancel = recv_command(&mut shipment_commands).await;
    assert_eq!(cancel.command_type, CommandKind::CancelShipment.as_str());

    // give a hypothetical duplicate compensation pass a chance to arrive
    let duplicate = tokio::time::timeout(Duration::from_millis(200), delivery_commands.recv()).await;
    assert!(duplicate.is_err(), "delivery.failed must be compensated exactly once, not twice");

    let saga = store.get(saga_id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);

    orchestrator_handle.abort();
    compensation_handle.abort();
}
