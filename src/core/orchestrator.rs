//! Saga orchestrator: drives a definition end to end.
//!
//! Coordinates step execution, execution-state persistence, and the
//! compensation sweep when a step exhausts its retry budget.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{SagaDefinition, SagaExecution, SagaStatus, StepStatus};
use crate::store::ExecutionStore;

use super::step_runner::StepRunner;

/// Orchestration-level failures.
///
/// Step failures never surface here; they drive compensation and are read
/// from the returned execution's `status`. This error means the machinery
/// itself broke: the execution is marked `Failed` and the error re-raised.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("Invalid saga definition: {0}")]
    InvalidDefinition(String),

    #[error("Execution store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Context serialization error: {0}")]
    Context(#[from] serde_json::Error),

    #[error("Saga hook failed: {0}")]
    Hook(#[source] anyhow::Error),
}

/// Main saga orchestrator
pub struct SagaOrchestrator<S> {
    /// Store the execution record is persisted through
    store: Arc<S>,

    /// Per-step executor carrying the default retry policy and timeout
    runner: StepRunner,
}

impl<S: ExecutionStore> SagaOrchestrator<S> {
    /// Create an orchestrator with default retry/timeout settings
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            runner: StepRunner::default(),
        }
    }

    /// Create an orchestrator with an explicit step runner
    pub fn with_runner(store: Arc<S>, runner: StepRunner) -> Self {
        Self { store, runner }
    }

    /// Execute a saga definition with the given context.
    ///
    /// Returns the terminal execution record: `Completed` when every step
    /// succeeded, `Compensated` when a step failed and the sweep ran. Both
    /// are returned as `Ok`; callers distinguish them by reading `status`.
    /// An `Err` means the orchestration machinery itself failed; the
    /// execution is marked `Failed` before the error is re-raised.
    ///
    /// Every call allocates a fresh execution id. Deduplicating repeat
    /// submissions is the idempotency guard's job, not the orchestrator's.
    #[instrument(skip(self, definition, ctx), fields(saga = %definition.id))]
    pub async fn execute_saga<C>(
        &self,
        definition: &SagaDefinition<C>,
        ctx: C,
    ) -> Result<SagaExecution, SagaError>
    where
        C: Serialize + DeserializeOwned,
    {
        definition
            .validate()
            .map_err(|e| SagaError::InvalidDefinition(e.to_string()))?;

        let snapshot = serde_json::to_value(&ctx)?;
        let mut exec = SagaExecution::new(definition.id.clone(), snapshot);
        info!(execution_id = %exec.id, "Starting saga execution");

        match self.drive(definition, &ctx, &mut exec).await {
            Ok(()) => Ok(exec),
            Err(e) => {
                exec.status = SagaStatus::Failed;
                exec.error = Some(e.to_string());
                exec.completed_at = Some(Utc::now());

                // Best effort: the store may be the thing that failed
                if let Err(persist) = self.store.update_execution(&exec).await {
                    warn!(
                        execution_id = %exec.id,
                        error = %persist,
                        "Could not persist failed execution"
                    );
                }

                error!(execution_id = %exec.id, error = %e, "Saga execution failed");
                Err(e)
            }
        }
    }

    /// Run the state machine to a terminal status
    async fn drive<C>(
        &self,
        definition: &SagaDefinition<C>,
        ctx: &C,
        exec: &mut SagaExecution,
    ) -> Result<(), SagaError>
    where
        C: DeserializeOwned,
    {
        self.store
            .save_execution(exec)
            .await
            .map_err(SagaError::Store)?;

        exec.status = SagaStatus::Running;
        self.store
            .update_execution(exec)
            .await
            .map_err(SagaError::Store)?;

        for (idx, step) in definition.steps.iter().enumerate() {
            exec.current_step_index = idx;

            let result = self.runner.execute_step(step, ctx, &exec.context).await;
            let failed = result.status == StepStatus::Failed;
            let step_error = result.error.clone();

            exec.step_results.push(result);
            exec.current_step_index = idx + 1;
            self.store
                .update_execution(exec)
                .await
                .map_err(SagaError::Store)?;

            // Steps after the failing one never run
            if failed {
                let original = step_error.unwrap_or_else(|| "step failed".to_string());
                return self.compensate(definition, ctx, exec, &original).await;
            }
        }

        exec.status = SagaStatus::Completed;
        exec.completed_at = Some(Utc::now());

        // Runs outside the compensation envelope: a failure here escalates
        // to the Failed path instead of triggering a sweep
        if let Some(hook) = &definition.on_success {
            hook.run(ctx).await.map_err(SagaError::Hook)?;
        }

        self.store
            .update_execution(exec)
            .await
            .map_err(SagaError::Store)?;

        info!(execution_id = %exec.id, "Saga completed");
        Ok(())
    }

    /// Walk successful steps in reverse order and run their compensations.
    ///
    /// Individual compensation failures are logged and tolerated: the result
    /// keeps its pre-compensation status as the operator signal, and the
    /// sweep continues. The execution always ends `Compensated`.
    async fn compensate<C>(
        &self,
        definition: &SagaDefinition<C>,
        ctx: &C,
        exec: &mut SagaExecution,
        original_error: &str,
    ) -> Result<(), SagaError>
    where
        C: DeserializeOwned,
    {
        warn!(
            execution_id = %exec.id,
            error = %original_error,
            "Step failed, compensating completed steps"
        );

        exec.status = SagaStatus::Compensating;
        exec.error = Some(original_error.to_string());
        self.store
            .update_execution(exec)
            .await
            .map_err(SagaError::Store)?;

        // Last-succeeded compensated first
        let successful = exec.successful_indices();
        for &idx in successful.iter().rev() {
            let (step_id, saved_input, saved_output) = {
                let result = &exec.step_results[idx];
                (
                    result.step_id.clone(),
                    result.input.clone(),
                    result.output.clone().unwrap_or(serde_json::Value::Null),
                )
            };

            let Some(step) = definition.get_step(&step_id) else {
                warn!(step = %step_id, "No definition for completed step, skipping compensation");
                continue;
            };

            let Some(compensation) = &step.compensation else {
                debug!(step = %step_id, "Step has no compensation, skipping");
                continue;
            };

            // Compensations see exactly what was recorded when the step ran
            let saved_ctx: C = match serde_json::from_value(saved_input) {
                Ok(c) => c,
                Err(e) => {
                    error!(
                        step = %step_id,
                        error = %e,
                        "Saved input no longer deserializes, compensation skipped"
                    );
                    continue;
                }
            };

            match compensation.run(&saved_ctx, &saved_output).await {
                Ok(()) => {
                    exec.step_results[idx].status = StepStatus::Compensated;
                    self.store
                        .update_execution(exec)
                        .await
                        .map_err(SagaError::Store)?;
                    info!(step = %step_id, "Step compensated");
                }
                Err(e) => {
                    error!(
                        step = %step_id,
                        error = %e,
                        "Compensation failed, continuing sweep"
                    );
                }
            }
        }

        exec.status = SagaStatus::Compensated;
        exec.completed_at = Some(Utc::now());

        if let Some(hook) = &definition.on_failure {
            hook.run(ctx, original_error).await.map_err(SagaError::Hook)?;
        }

        self.store
            .update_execution(exec)
            .await
            .map_err(SagaError::Store)?;

        info!(execution_id = %exec.id, "Saga compensated");
        Ok(())
    }
}
