//! Outbox event records and the published envelope.
//!
//! Events are staged durably next to the business write and published later
//! by the outbox processor. The record is mutated only by the processor and
//! never deleted by it; `delete_event` is caller-invoked housekeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a staged event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxEventStatus {
    /// Staged, waiting for a sweep
    Pending,

    /// Delivered to the broker
    Published,

    /// Retry cap exhausted; requires operator attention
    Failed,
}

/// A durably staged event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// Saga execution the event belongs to
    pub saga_id: String,

    /// Step that produced the event
    pub step_id: String,

    /// Event type in camel case, e.g. "PaymentProcessed"
    pub event_type: String,

    /// Opaque payload
    pub payload: Value,

    /// Current status
    pub status: OutboxEventStatus,

    /// When the event was staged
    pub created_at: DateTime<Utc>,

    /// When the event was delivered (if it was)
    pub published_at: Option<DateTime<Utc>>,

    /// Number of failed publish attempts
    pub retry_count: u32,

    /// Last publish error, kept for inspection
    pub last_error: Option<String>,
}

impl OutboxEvent {
    /// Stage a new event in `Pending`
    pub fn new(
        saga_id: impl Into<String>,
        step_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            saga_id: saga_id.into(),
            step_id: step_id.into(),
            event_type: event_type.into(),
            payload,
            status: OutboxEventStatus::Pending,
            created_at: Utc::now(),
            published_at: None,
            retry_count: 0,
            last_error: None,
        }
    }

    /// Build the envelope published to the broker
    pub fn envelope(&self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.id,
            saga_id: self.saga_id.clone(),
            step_id: self.step_id.clone(),
            event_type: self.event_type.clone(),
            payload: self.payload.clone(),
            timestamp: self.created_at,
        }
    }
}

/// The message shape delivered to the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Id of the staged event
    pub event_id: Uuid,

    /// Saga execution the event belongs to
    pub saga_id: String,

    /// Step that produced the event
    pub step_id: String,

    /// Event type in camel case
    pub event_type: String,

    /// Opaque payload
    pub payload: Value,

    /// Staging time of the event
    pub timestamp: DateTime<Utc>,
}
