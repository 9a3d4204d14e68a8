//! Idempotency Guard Integration Tests
//!
//! The guard fronts saga submission: a repeated key is rejected before the
//! orchestrator ever sees the request.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use sagaflow::idempotency::{
    IdempotencyError, IdempotencyGuard, IdempotencyStore, InMemoryIdempotencyStore,
};
use sagaflow::store::{ExecutionStore, InMemoryExecutionStore};
use sagaflow::{SagaDefinition, SagaOrchestrator, TransactionStep};

fn one_step_saga() -> SagaDefinition<Value> {
    SagaDefinition::new("order-saga", "Order processing").step(TransactionStep::new(
        "reserve",
        "Reserve stock",
        |_ctx: Value| async { Ok::<_, anyhow::Error>(json!({})) },
    ))
}

#[tokio::test]
async fn test_duplicate_submission_runs_saga_once() {
    let exec_store = Arc::new(InMemoryExecutionStore::new());
    let orchestrator = SagaOrchestrator::new(exec_store.clone());
    let guard = IdempotencyGuard::new(
        Arc::new(InMemoryIdempotencyStore::new()),
        Duration::from_secs(60),
    );
    let saga = one_step_saga();

    // First submission passes the guard and runs
    guard.register("order-42").await.unwrap();
    orchestrator.execute_saga(&saga, json!({"orderId": 42})).await.unwrap();

    // The repeat is rejected before reaching the orchestrator
    let repeat = guard.register("order-42").await;
    assert!(matches!(repeat, Err(IdempotencyError::Duplicate(_))));

    let executions = exec_store.list_executions(None, None).await.unwrap();
    assert_eq!(executions.len(), 1);
}

#[tokio::test]
async fn test_distinct_keys_both_run() {
    let exec_store = Arc::new(InMemoryExecutionStore::new());
    let orchestrator = SagaOrchestrator::new(exec_store.clone());
    let guard = IdempotencyGuard::new(
        Arc::new(InMemoryIdempotencyStore::new()),
        Duration::from_secs(60),
    );
    let saga = one_step_saga();

    for key in ["order-1", "order-2"] {
        guard.register(key).await.unwrap();
        orchestrator.execute_saga(&saga, json!({"key": key})).await.unwrap();
    }

    let executions = exec_store.list_executions(None, None).await.unwrap();
    assert_eq!(executions.len(), 2);
}

#[tokio::test]
async fn test_expired_key_admits_resubmission() {
    let idem_store = Arc::new(InMemoryIdempotencyStore::new());
    let guard = IdempotencyGuard::new(idem_store.clone(), Duration::from_secs(60));

    // Plant a record that expired a moment ago
    idem_store
        .set("order-9", Utc::now() - chrono::Duration::seconds(5))
        .await
        .unwrap();

    // Lazy eviction lets the key through and refreshes its TTL
    guard.register("order-9").await.unwrap();

    let record = idem_store.get("order-9").await.unwrap().unwrap();
    assert!(record.expires_at > Utc::now());

    // And the refreshed key now blocks repeats again
    assert!(matches!(
        guard.register("order-9").await,
        Err(IdempotencyError::Duplicate(_))
    ));
}
