//! In-memory collaborator implementations.
//!
//! Used by the test suites and for embedding the engine without external
//! infrastructure. All state lives behind plain mutexes; none of the
//! operations hold a lock across an await point.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::{EventEnvelope, OutboxEvent, OutboxEventStatus, SagaExecution, SagaStatus};

use super::{ExecutionStore, MessageBroker, MessageHandler, OutboxStore};

/// Map-backed execution store
#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: Mutex<HashMap<Uuid, SagaExecution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save_execution(&self, exec: &SagaExecution) -> Result<()> {
        self.executions
            .lock()
            .unwrap()
            .insert(exec.id, exec.clone());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<SagaExecution>> {
        Ok(self.executions.lock().unwrap().get(&id).cloned())
    }

    async fn update_execution(&self, exec: &SagaExecution) -> Result<()> {
        let mut executions = self.executions.lock().unwrap();
        if !executions.contains_key(&exec.id) {
            return Err(anyhow!("Execution not found: {}", exec.id));
        }

        executions.insert(exec.id, exec.clone());
        Ok(())
    }

    async fn list_executions(
        &self,
        saga_id: Option<&str>,
        status: Option<SagaStatus>,
    ) -> Result<Vec<SagaExecution>> {
        let executions = self.executions.lock().unwrap();

        let mut matching: Vec<SagaExecution> = executions
            .values()
            .filter(|e| saga_id.map_or(true, |id| e.saga_id == id))
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();

        matching.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(matching)
    }
}

/// Map-backed outbox store
#[derive(Default)]
pub struct InMemoryOutboxStore {
    events: Mutex<HashMap<Uuid, OutboxEvent>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a single event by id (test inspection helper)
    pub fn get_event(&self, id: Uuid) -> Option<OutboxEvent> {
        self.events.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn save_event(&self, event: &OutboxEvent) -> Result<()> {
        self.events.lock().unwrap().insert(event.id, event.clone());
        Ok(())
    }

    async fn get_pending_events(&self) -> Result<Vec<OutboxEvent>> {
        let events = self.events.lock().unwrap();

        let mut pending: Vec<OutboxEvent> = events
            .values()
            .filter(|e| e.status == OutboxEventStatus::Pending)
            .cloned()
            .collect();

        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn mark_event_published(&self, id: Uuid) -> Result<()> {
        let mut events = self.events.lock().unwrap();
        let event = events
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Outbox event not found: {}", id))?;

        event.status = OutboxEventStatus::Published;
        event.published_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_event_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        let mut events = self.events.lock().unwrap();
        let event = events
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Outbox event not found: {}", id))?;

        event.status = OutboxEventStatus::Failed;
        event.last_error = Some(reason.to_string());
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, reason: &str) -> Result<()> {
        let mut events = self.events.lock().unwrap();
        let event = events
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Outbox event not found: {}", id))?;

        event.retry_count += 1;
        event.last_error = Some(reason.to_string());
        Ok(())
    }

    async fn delete_event(&self, id: Uuid) -> Result<()> {
        self.events.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn list_events(&self, status: Option<OutboxEventStatus>) -> Result<Vec<OutboxEvent>> {
        let events = self.events.lock().unwrap();

        let mut matching: Vec<OutboxEvent> = events
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();

        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }
}

/// In-process broker recording published messages per topic.
///
/// Can be told to fail publishes for specific topics, which the outbox tests
/// use to drive retry accounting.
#[derive(Default)]
pub struct InMemoryBroker {
    published: Mutex<Vec<(String, EventEnvelope)>>,
    handlers: Mutex<HashMap<String, Vec<MessageHandler>>>,
    failing_topics: Mutex<Vec<String>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish to `topic` fail until cleared
    pub fn fail_topic(&self, topic: impl Into<String>) {
        self.failing_topics.lock().unwrap().push(topic.into());
    }

    /// Clear all injected failures
    pub fn clear_failures(&self) {
        self.failing_topics.lock().unwrap().clear();
    }

    /// All messages published so far, in order
    pub fn published(&self) -> Vec<(String, EventEnvelope)> {
        self.published.lock().unwrap().clone()
    }

    /// Messages published to one topic
    pub fn published_to(&self, topic: &str) -> Vec<EventEnvelope> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, message: &EventEnvelope) -> Result<()> {
        if self
            .failing_topics
            .lock()
            .unwrap()
            .iter()
            .any(|t| t == topic)
        {
            return Err(anyhow!("Broker unavailable for topic '{}'", topic));
        }

        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), message.clone()));

        let handlers = self.handlers.lock().unwrap();
        if let Some(subscribed) = handlers.get(topic) {
            for handler in subscribed {
                handler(message);
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<()> {
        self.handlers
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.handlers.lock().unwrap().remove(topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_execution_save_and_get() {
        let store = InMemoryExecutionStore::new();
        let exec = SagaExecution::new("order-saga", json!({}));

        store.save_execution(&exec).await.unwrap();

        let loaded = store.get_execution(exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, exec.id);
        assert_eq!(loaded.status, SagaStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_missing_execution_fails() {
        let store = InMemoryExecutionStore::new();
        let exec = SagaExecution::new("order-saga", json!({}));

        assert!(store.update_execution(&exec).await.is_err());
    }

    #[tokio::test]
    async fn test_list_executions_filters() {
        let store = InMemoryExecutionStore::new();

        let mut a = SagaExecution::new("saga-a", json!({}));
        a.status = SagaStatus::Completed;
        let b = SagaExecution::new("saga-b", json!({}));

        store.save_execution(&a).await.unwrap();
        store.save_execution(&b).await.unwrap();

        let by_saga = store.list_executions(Some("saga-a"), None).await.unwrap();
        assert_eq!(by_saga.len(), 1);
        assert_eq!(by_saga[0].saga_id, "saga-a");

        let by_status = store
            .list_executions(None, Some(SagaStatus::Pending))
            .await
            .unwrap();
        assert_eq!(by_status.len(), 1);
        assert_eq!(by_status[0].saga_id, "saga-b");

        let all = store.list_executions(None, None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_pending_events_oldest_first() {
        let store = InMemoryOutboxStore::new();

        let mut first = OutboxEvent::new("s", "a", "First", json!({}));
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = OutboxEvent::new("s", "b", "Second", json!({}));

        store.save_event(&second).await.unwrap();
        store.save_event(&first).await.unwrap();

        let pending = store.get_pending_events().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].event_type, "First");
        assert_eq!(pending[1].event_type, "Second");
    }

    #[tokio::test]
    async fn test_record_failure_keeps_event_pending() {
        let store = InMemoryOutboxStore::new();
        let event = OutboxEvent::new("s", "a", "PaymentProcessed", json!({}));
        store.save_event(&event).await.unwrap();

        store.record_failure(event.id, "broker down").await.unwrap();

        let loaded = store.get_event(event.id).unwrap();
        assert_eq!(loaded.status, OutboxEventStatus::Pending);
        assert_eq!(loaded.retry_count, 1);
        assert_eq!(loaded.last_error.as_deref(), Some("broker down"));

        // Still visible to the sweep
        assert_eq!(store.get_pending_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_event_failed_is_terminal() {
        let store = InMemoryOutboxStore::new();
        let event = OutboxEvent::new("s", "a", "PaymentProcessed", json!({}));
        store.save_event(&event).await.unwrap();

        store
            .mark_event_failed(event.id, "max retries exceeded")
            .await
            .unwrap();

        assert!(store.get_pending_events().await.unwrap().is_empty());
        let loaded = store.get_event(event.id).unwrap();
        assert_eq!(loaded.status, OutboxEventStatus::Failed);
    }

    #[tokio::test]
    async fn test_broker_records_and_dispatches() {
        let broker = InMemoryBroker::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        broker
            .subscribe(
                "payment.processed",
                Arc::new(move |envelope: &EventEnvelope| {
                    sink.lock().unwrap().push(envelope.event_type.clone());
                }),
            )
            .await
            .unwrap();

        let event = OutboxEvent::new("s", "a", "PaymentProcessed", json!({}));
        broker
            .publish("payment.processed", &event.envelope())
            .await
            .unwrap();

        assert_eq!(broker.published_to("payment.processed").len(), 1);
        assert_eq!(received.lock().unwrap().as_slice(), ["PaymentProcessed"]);
    }

    #[tokio::test]
    async fn test_broker_injected_failure() {
        let broker = InMemoryBroker::new();
        broker.fail_topic("payment.processed");

        let event = OutboxEvent::new("s", "a", "PaymentProcessed", json!({}));
        let result = broker.publish("payment.processed", &event.envelope()).await;

        assert!(result.is_err());
        assert!(broker.published().is_empty());

        broker.clear_failures();
        assert!(broker
            .publish("payment.processed", &event.envelope())
            .await
            .is_ok());
    }
}
