//! Saga orchestration: the `SagaInstance` state machine plus the
//! orchestrator and compensation workers that drive it forward.
//!
//! Grounded in the system this was distilled from, where a saga instance is
//! a plain dataclass with `mark_completed`/`mark_failed`/`mark_compensating`
//! mutators guarding the same transitions enforced here by `advance_to`.

pub mod compensation;
pub mod orchestrator;
pub mod reaper;

pub use compensation::CompensationWorker;
pub use orchestrator::SagaOrchestrator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, SagaError>;

#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error("saga {0} not found")]
    NotFound(Uuid),

    #[error("saga {saga_id} is already terminal ({status:?}), cannot {action}")]
    AlreadyTerminal {
        saga_id: Uuid,
        status: SagaStatus,
        action: &'static str,
    },

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("messaging error: {0}")]
    Messaging(#[from] crate::messaging::MessagingError),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),
}

/// Lifecycle status of a saga instance. Transitions are monotone: once
/// `Completed` or `Failed`, a saga never moves again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Started,
    Compensating,
    Completed,
    Failed,
}

impl SagaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SagaStatus::Started | SagaStatus::Compensating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "started",
            SagaStatus::Compensating => "compensating",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
        }
    }
}

/// The saga type this coordinator currently runs. Only one exists today, but
/// `saga_type` is kept as a real field (not inferred) since the original
/// dataclass and the admin API both key off it.
pub const SHIPMENT_FULFILLMENT: &str = "ShipmentFulfillment";

/// A shipment saga's durable state: which step it's on, the aggregate ids it
/// has learned along the way, and whether compensation has begun.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SagaInstance {
    pub saga_id: Uuid,
    pub saga_type: String,
    pub shipment_id: Uuid,
    pub warehouse_id: Option<Uuid>,
    pub delivery_id: Option<Uuid>,
    pub status: SagaStatus,
    pub current_step: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failed_step: Option<String>,
    pub error_message: Option<String>,
}

impl SagaInstance {
    pub fn start(shipment_id: Uuid, correlation_id: Uuid, saga_type: &str, initial_step: &str) -> Self {
        let now = Utc::now();
        Self {
            saga_id: correlation_id,
            saga_type: saga_type.to_string(),
            shipment_id,
            warehouse_id: None,
            delivery_id: None,
            status: SagaStatus::Started,
            current_step: initial_step.to_string(),
            started_at: now,
            updated_at: now,
            failed_step: None,
            error_message: None,
        }
    }

    /// Advance to a new step without changing status. No-op on a terminal saga.
    pub fn advance_step(&mut self, step: &str) {
        if self.status.is_terminal() {
            return;
        }
        self.current_step = step.to_string();
        self.updated_at = Utc::now();
    }

    /// Marks compensation as under way for `step` — the name of the event
    /// that triggered the rollback, not a free-form message.
    pub fn mark_compensating(&mut self, step: &str) -> Result<()> {
        self.guard_not_terminal("mark_compensating")?;
        self.status = SagaStatus::Compensating;
        self.failed_step = Some(step.to_string());
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<()> {
        self.guard_not_terminal("mark_completed")?;
        self.status = SagaStatus::Completed;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_failed(&mut self, step: &str, error: &str) -> Result<()> {
        self.guard_not_terminal("mark_failed")?;
        self.status = SagaStatus::Failed;
        self.failed_step = Some(step.to_string());
        self.error_message = Some(error.to_string());
        self.updated_at = Utc::now();
        Ok(())
    }

    fn guard_not_terminal(&self, action: &'static str) -> Result<()> {
        if self.status.is_terminal() {
            return Err(SagaError::AlreadyTerminal {
                saga_id: self.saga_id,
                status: self.status,
                action,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_instance() -> SagaInstance {
        SagaInstance::start(Uuid::new_v4(), Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory")
    }

    #[test]
    fn new_saga_starts_in_started_status() {
        let saga = new_instance();
        assert_eq!(saga.status, SagaStatus::Started);
        assert!(saga.status.is_active());
        assert!(saga.warehouse_id.is_none());
        assert!(saga.delivery_id.is_none());
    }

    #[test]
    fn advance_step_touches_current_step_and_updated_at() {
        let mut saga = new_instance();
        let before = saga.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        saga.delivery_id = Some(Uuid::new_v4());
        saga.advance_step("assign_courier");
        assert_eq!(saga.current_step, "assign_courier");
        assert!(saga.delivery_id.is_some());
        assert!(saga.updated_at > before);
    }

    #[test]
    fn mark_completed_sets_terminal_status() {
        let mut saga = new_instance();
        saga.mark_completed().unwrap();
        assert_eq!(saga.status, SagaStatus::Completed);
        assert!(saga.status.is_terminal());
    }

    #[test]
    fn cannot_transition_out_of_a_terminal_status() {
        let mut saga = new_instance();
        saga.mark_failed("inventory.reserve", "inventory unavailable").unwrap();
        let err = saga.mark_completed().unwrap_err();
        assert!(matches!(err, SagaError::AlreadyTerminal { .. }));
    }

    #[test]
    fn mark_failed_records_distinct_step_and_error() {
        let mut saga = new_instance();
        saga.mark_failed("inventory.reserve", "inventory_insufficient").unwrap();
        assert_eq!(saga.status, SagaStatus::Failed);
        assert_eq!(saga.failed_step.as_deref(), Some("inventory.reserve"));
        assert_eq!(saga.error_message.as_deref(), Some("inventory_insufficient"));
    }

    #[test]
    fn mark_compensating_records_the_triggering_step() {
        let mut saga = new_instance();
        saga.mark_compensating("delivery.failed").unwrap();
        assert_eq!(saga.status, SagaStatus::Compensating);
        assert_eq!(saga.failed_step.as_deref(), Some("delivery.failed"));
        assert!(saga.error_message.is_none());
    }
}
