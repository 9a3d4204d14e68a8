//! sagaflow - Saga execution engine with a transactional outbox
//!
//! Coordinates multi-step business transactions that span independent
//! services: a transaction either completes every step or semantically
//! undoes (compensates) every step that already succeeded.
//!
//! # Architecture
//!
//! - Steps run strictly in definition order, each under its own retry
//!   policy and timeout
//! - A step that exhausts its retry budget triggers a compensation sweep
//!   over the completed steps, in reverse order
//! - Execution state is persisted through a caller-supplied store after
//!   every change
//! - Events staged in the outbox are published to a message broker by a
//!   background sweep, at-least-once, bounded by a retry cap
//!
//! # Modules
//!
//! - `core`: Engine logic (Orchestrator, StepRunner, Retry, Outbox)
//! - `domain`: Data structures (SagaDefinition, SagaExecution, OutboxEvent)
//! - `store`: Collaborator interfaces and shipped implementations
//! - `idempotency`: Request-level duplicate rejection
//! - `config`: Engine configuration
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::{json, Value};
//! use sagaflow::store::InMemoryExecutionStore;
//! use sagaflow::{SagaDefinition, SagaOrchestrator, TransactionStep};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let saga = SagaDefinition::new("order-saga", "Order processing").step(
//!     TransactionStep::new("reserve", "Reserve stock", |_ctx: Value| async move {
//!         Ok::<_, anyhow::Error>(json!({"reserved": true}))
//!     })
//!     .with_compensation(|_ctx: Value, _output: Value| async move {
//!         Ok::<_, anyhow::Error>(())
//!     }),
//! );
//!
//! let orchestrator = SagaOrchestrator::new(Arc::new(InMemoryExecutionStore::new()));
//! let execution = orchestrator.execute_saga(&saga, json!({"orderId": 42})).await?;
//!
//! // Completed and Compensated both come back as Ok; read the status
//! println!("{:?}", execution.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod domain;
pub mod idempotency;
pub mod store;

// Re-export main types at crate root for convenience
pub use config::{Config, OrchestratorSettings, OutboxSettings};
pub use core::{
    derive_topic, OutboxProcessor, OutboxStats, RetryPolicy, SagaError, SagaOrchestrator,
    StepRunner, SweepReport,
};
pub use domain::{
    EventEnvelope, OutboxEvent, OutboxEventStatus, SagaDefinition, SagaExecution, SagaStatus,
    StepResult, StepStatus, TransactionStep,
};
pub use idempotency::{IdempotencyError, IdempotencyGuard, IdempotencyRecord, IdempotencyStore};
