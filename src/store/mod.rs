//! Collaborator interfaces for persistence and messaging.
//!
//! The engine owns no storage or transport of its own: executions, outbox
//! events, and broker delivery all go through these traits. Implementations
//! must provide their own concurrency control (e.g. optimistic versioning)
//! if multiple engine instances can race on the same record.

pub mod file;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{EventEnvelope, OutboxEvent, OutboxEventStatus, SagaExecution, SagaStatus};

// Re-export the shipped implementations
pub use file::{FileExecutionStore, FileOutboxStore};
pub use memory::{InMemoryBroker, InMemoryExecutionStore, InMemoryOutboxStore};

/// Persistence for saga execution records
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a newly created execution
    async fn save_execution(&self, exec: &SagaExecution) -> Result<()>;

    /// Fetch an execution by id
    async fn get_execution(&self, id: Uuid) -> Result<Option<SagaExecution>>;

    /// Persist the current state of an existing execution
    async fn update_execution(&self, exec: &SagaExecution) -> Result<()>;

    /// List executions, optionally filtered by saga id and/or status
    async fn list_executions(
        &self,
        saga_id: Option<&str>,
        status: Option<SagaStatus>,
    ) -> Result<Vec<SagaExecution>>;
}

/// Persistence for staged outbox events
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a newly staged event
    async fn save_event(&self, event: &OutboxEvent) -> Result<()>;

    /// Fetch all events currently `Pending`, oldest first
    async fn get_pending_events(&self) -> Result<Vec<OutboxEvent>>;

    /// Mark an event delivered and stamp `published_at`
    async fn mark_event_published(&self, id: Uuid) -> Result<()>;

    /// Mark an event permanently `Failed`
    async fn mark_event_failed(&self, id: Uuid, reason: &str) -> Result<()>;

    /// Record a transient publish failure: increment `retry_count`, keep
    /// the event `Pending` so a later sweep retries it
    async fn record_failure(&self, id: Uuid, reason: &str) -> Result<()>;

    /// Remove an event. Never called by the engine; housekeeping for callers
    async fn delete_event(&self, id: Uuid) -> Result<()>;

    /// List events, optionally filtered by status
    async fn list_events(&self, status: Option<OutboxEventStatus>) -> Result<Vec<OutboxEvent>>;
}

/// Handler invoked for messages arriving on a subscribed topic
pub type MessageHandler = std::sync::Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

/// Message transport the outbox publishes through
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Deliver an envelope to a topic
    async fn publish(&self, topic: &str, message: &EventEnvelope) -> Result<()>;

    /// Register a handler for a topic
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<()>;

    /// Remove all handlers for a topic
    async fn unsubscribe(&self, topic: &str) -> Result<()>;
}
