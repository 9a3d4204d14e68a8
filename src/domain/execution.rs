//! Execution state for a single saga run.
//!
//! A `SagaExecution` is the mutable run record: it is created when a saga is
//! submitted, persisted after every status or step change, and retired
//! (read-only) once it reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a saga execution
///
/// Transitions: `Pending → Running → Completed` on the happy path,
/// `Running → Compensating → Compensated` when a step exhausts its retries,
/// and any machinery failure forces `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    /// Created, not yet running
    Pending,

    /// Steps are executing
    Running,

    /// Every step succeeded
    Completed,

    /// A step failed; compensations are running
    Compensating,

    /// Compensation sweep finished
    Compensated,

    /// Orchestration machinery failed (store, hook)
    Failed,
}

impl SagaStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Compensated | Self::Failed)
    }
}

/// Status of a single step result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The action succeeded
    Success,

    /// The action exhausted its retry budget
    Failed,

    /// The compensation ran after a later step failed
    Compensated,
}

/// Record of one executed step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Id of the step definition
    pub step_id: String,

    /// Name of the step definition
    pub step_name: String,

    /// Outcome of the step
    pub status: StepStatus,

    /// Snapshot of the context the action received
    pub input: Value,

    /// Output captured from a successful action
    pub output: Option<Value>,

    /// Error captured from a failed action
    pub error: Option<String>,

    /// When the first attempt started
    pub started_at: DateTime<Utc>,

    /// When the final attempt settled
    pub completed_at: DateTime<Utc>,

    /// Number of attempts spent (1-based)
    pub attempts: u32,
}

/// A single saga run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaExecution {
    /// Unique identifier for this execution
    pub id: Uuid,

    /// Id of the saga definition being executed
    pub saga_id: String,

    /// Current status
    pub status: SagaStatus,

    /// Index of the step currently (or next) being executed
    pub current_step_index: usize,

    /// Caller context, serialized once at submission and never mutated
    pub context: Value,

    /// When the execution was created
    pub started_at: DateTime<Utc>,

    /// When the execution reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    /// Error that drove the execution to Compensated or Failed
    pub error: Option<String>,

    /// One result per step that has begun execution, in order
    pub step_results: Vec<StepResult>,
}

impl SagaExecution {
    /// Create a new execution in `Pending`
    pub fn new(saga_id: impl Into<String>, context: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            saga_id: saga_id.into(),
            status: SagaStatus::Pending,
            current_step_index: 0,
            context,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            step_results: Vec::new(),
        }
    }

    /// Check whether the execution reached a terminal status
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Indices of results currently marked `Success`, in execution order
    pub fn successful_indices(&self) -> Vec<usize> {
        self.step_results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == StepStatus::Success)
            .map(|(i, _)| i)
            .collect()
    }
}
