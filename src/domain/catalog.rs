//! Closed sum type of event/command kinds, replacing the source's runtime
//! `_EVENT_TYPE_MAP` dictionary dispatch with a compile-time exhaustive match.

/// Logical topic names (configurable in a real deployment; the strings here
/// are the defaults the orchestrator and workers bind to).
pub mod topics {
    pub const SHIPMENT_EVENTS: &str = "shipment-events";
    pub const INVENTORY_EVENTS: &str = "inventory-events";
    pub const DELIVERY_EVENTS: &str = "delivery-events";
    pub const BLOCKCHAIN_EVENTS: &str = "blockchain-events";
    pub const SAGA_EVENTS: &str = "saga-events";
    pub const INVENTORY_COMMANDS: &str = "inventory-commands";
    pub const DELIVERY_COMMANDS: &str = "delivery-commands";
    pub const SHIPMENT_COMMANDS: &str = "shipment-commands";
    pub const BLOCKCHAIN_COMMANDS: &str = "blockchain-commands";
}

/// Every event kind this system emits or consumes, tagged with its
/// `event_type` string and the `aggregate_type` it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ShipmentCreated,
    ShipmentCancelled,
    InventoryReserved,
    InventoryInsufficient,
    InventoryReleased,
    CourierAssigned,
    CourierUnassigned,
    DeliveryFailed,
    BlockchainVerified,
    SagaStarted,
    SagaCompleted,
    SagaFailed,
    SagaCompensating,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ShipmentCreated => "shipment.created",
            EventKind::ShipmentCancelled => "shipment.cancelled",
            EventKind::InventoryReserved => "inventory.reserved",
            EventKind::InventoryInsufficient => "inventory.insufficient",
            EventKind::InventoryReleased => "inventory.released",
            EventKind::CourierAssigned => "courier.assigned",
            EventKind::CourierUnassigned => "courier.unassigned",
            EventKind::DeliveryFailed => "delivery.failed",
            EventKind::BlockchainVerified => "blockchain.verified",
            EventKind::SagaStarted => "saga.started",
            EventKind::SagaCompleted => "saga.completed",
            EventKind::SagaFailed => "saga.failed",
            EventKind::SagaCompensating => "saga.compensating",
        }
    }

    pub fn aggregate_type(&self) -> &'static str {
        match self {
            EventKind::ShipmentCreated | EventKind::ShipmentCancelled => "shipment",
            EventKind::InventoryReserved
            | EventKind::InventoryInsufficient
            | EventKind::InventoryReleased => "warehouse",
            EventKind::CourierAssigned | EventKind::CourierUnassigned | EventKind::DeliveryFailed => {
                "delivery"
            }
            EventKind::BlockchainVerified => "blockchain_record",
            EventKind::SagaStarted
            | EventKind::SagaCompleted
            | EventKind::SagaFailed
            | EventKind::SagaCompensating => "saga",
        }
    }

    pub fn from_str(event_type: &str) -> Option<Self> {
        Some(match event_type {
            "shipment.created" => EventKind::ShipmentCreated,
            "shipment.cancelled" => EventKind::ShipmentCancelled,
            "inventory.reserved" => EventKind::InventoryReserved,
            "inventory.insufficient" => EventKind::InventoryInsufficient,
            "inventory.released" => EventKind::InventoryReleased,
            "courier.assigned" => EventKind::CourierAssigned,
            "courier.unassigned" => EventKind::CourierUnassigned,
            "delivery.failed" => EventKind::DeliveryFailed,
            "blockchain.verified" => EventKind::BlockchainVerified,
            "saga.started" => EventKind::SagaStarted,
            "saga.completed" => EventKind::SagaCompleted,
            "saga.failed" => EventKind::SagaFailed,
            "saga.compensating" => EventKind::SagaCompensating,
            _ => return None,
        })
    }
}

/// Every command kind this system issues, tagged with its `command_type`
/// string and the `aggregate_type` of the participant it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    ReserveInventory,
    ReleaseInventory,
    AssignCourier,
    UnassignCourier,
    CreateShipment,
    CancelShipment,
    RecordBlockchain,
    InvalidateBlockchain,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::ReserveInventory => "inventory.reserve",
            CommandKind::ReleaseInventory => "inventory.release",
            CommandKind::AssignCourier => "courier.assign",
            CommandKind::UnassignCourier => "courier.unassign",
            CommandKind::CreateShipment => "shipment.create",
            CommandKind::CancelShipment => "shipment.cancel",
            CommandKind::RecordBlockchain => "blockchain.record",
            CommandKind::InvalidateBlockchain => "blockchain.invalidate",
        }
    }

    pub fn aggregate_type(&self) -> &'static str {
        match self {
            CommandKind::ReserveInventory | CommandKind::ReleaseInventory => "warehouse",
            CommandKind::AssignCourier | CommandKind::UnassignCourier => "delivery",
            CommandKind::CreateShipment | CommandKind::CancelShipment => "shipment",
            CommandKind::RecordBlockchain | CommandKind::InvalidateBlockchain => "blockchain_record",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_round_trips_through_its_wire_string() {
        let kinds = [
            EventKind::ShipmentCreated,
            EventKind::ShipmentCancelled,
            EventKind::InventoryReserved,
            EventKind::InventoryInsufficient,
            EventKind::InventoryReleased,
            EventKind::CourierAssigned,
            EventKind::CourierUnassigned,
            EventKind::DeliveryFailed,
            EventKind::BlockchainVerified,
            EventKind::SagaStarted,
            EventKind::SagaCompleted,
            EventKind::SagaFailed,
            EventKind::SagaCompensating,
        ];
        for kind in kinds {
            assert_eq!(EventKind::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn unknown_event_type_is_none() {
        assert_eq!(EventKind::from_str("unknown.thing"), None);
    }
}
