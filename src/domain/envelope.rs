//! Event/Command wire envelopes, serialized as the plain JSON shape of the
//! external interface: UUIDs as strings, timestamps as RFC-3339.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::catalog::{CommandKind, EventKind};

/// Immutable domain event. `aggregate_id` is the bus partition key: all events
/// for one aggregate are totally ordered relative to each other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
}

impl Event {
    /// Build a new event of `kind`, stamped with a fresh id and the current time.
    pub fn new(
        kind: EventKind,
        aggregate_id: Uuid,
        payload: Value,
        correlation_id: Option<Uuid>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: kind.as_str().to_string(),
            aggregate_id,
            aggregate_type: kind.aggregate_type().to_string(),
            payload,
            timestamp: Utc::now(),
            correlation_id,
        }
    }

    /// Serialize to the wire JSON representation.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserialize from the wire JSON representation.
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Command envelope: same shape as `Event` minus `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub command_id: Uuid,
    pub command_type: String,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub payload: Value,
    pub correlation_id: Option<Uuid>,
}

impl Command {
    pub fn new(
        kind: CommandKind,
        aggregate_id: Uuid,
        payload: Value,
        correlation_id: Option<Uuid>,
    ) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            command_type: kind.as_str().to_string(),
            aggregate_id,
            aggregate_type: kind.aggregate_type().to_string(),
            payload,
            correlation_id,
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_round_trips_through_bytes() {
        let event = Event::new(
            EventKind::ShipmentCreated,
            Uuid::new_v4(),
            json!({"shipment_id": Uuid::new_v4(), "items": []}),
            Some(Uuid::new_v4()),
        );
        let bytes = event.to_bytes().unwrap();
        let decoded = Event::from_bytes(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn command_round_trips_through_bytes() {
        let command = Command::new(
            CommandKind::ReserveInventory,
            Uuid::new_v4(),
            json!({"items": []}),
            Some(Uuid::new_v4()),
        );
        let bytes = command.to_bytes().unwrap();
        let decoded = Command::from_bytes(&bytes).unwrap();
        assert_eq!(command, decoded);
    }

    #[test]
    fn command_envelope_has_no_timestamp_field() {
        let command = Command::new(CommandKind::AssignCourier, Uuid::new_v4(), json!({}), None);
        let value = serde_json::to_value(&command).unwrap();
        assert!(value.get("timestamp").is_none());
    }
}
