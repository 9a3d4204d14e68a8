//! Per-step execution: one action run under retry and timeout.
//!
//! The runner never raises; whatever happens to the action ends up as data on
//! the returned `StepResult`.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::domain::{StepResult, StepStatus, TransactionStep};

use super::retry::{execute_with_retry, RetryPolicy};

/// Executes individual saga steps with the orchestrator defaults
#[derive(Debug, Clone)]
pub struct StepRunner {
    /// Policy used when a step has no override
    pub default_retry: RetryPolicy,

    /// Timeout used when a step has no override
    pub default_timeout: Duration,
}

impl Default for StepRunner {
    fn default() -> Self {
        Self {
            default_retry: RetryPolicy::default(),
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl StepRunner {
    /// Create a runner with explicit defaults
    pub fn new(default_retry: RetryPolicy, default_timeout: Duration) -> Self {
        Self {
            default_retry,
            default_timeout,
        }
    }

    /// Execute one step and record the outcome.
    ///
    /// `input` is the context snapshot saved on the result; the live context
    /// is what the action actually receives.
    pub async fn execute_step<C>(
        &self,
        step: &TransactionStep<C>,
        ctx: &C,
        input: &Value,
    ) -> StepResult {
        let policy = step
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.default_retry.clone());
        let timeout = step.effective_timeout(self.default_timeout);

        debug!(
            step = %step.id,
            max_attempts = policy.max_attempts,
            timeout_ms = timeout.as_millis() as u64,
            "Executing step"
        );

        let started_at = Utc::now();
        let (outcome, attempts) =
            execute_with_retry(&policy, timeout, || step.action.run(ctx)).await;
        let completed_at = Utc::now();

        match outcome {
            Ok(output) => {
                info!(step = %step.id, attempts, "Step succeeded");

                StepResult {
                    step_id: step.id.clone(),
                    step_name: step.name.clone(),
                    status: StepStatus::Success,
                    input: input.clone(),
                    output: Some(output),
                    error: None,
                    started_at,
                    completed_at,
                    attempts,
                }
            }
            Err(e) => {
                error!(step = %step.id, attempts, error = %e, "Step failed permanently");

                StepResult {
                    step_id: step.id.clone(),
                    step_name: step.name.clone(),
                    status: StepStatus::Failed,
                    input: input.clone(),
                    output: None,
                    error: Some(e.to_string()),
                    started_at,
                    completed_at,
                    attempts,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn runner() -> StepRunner {
        StepRunner::new(
            RetryPolicy {
                max_attempts: 3,
                backoff_ms: 5,
                backoff_multiplier: 1.0,
            },
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_successful_step_records_output() {
        let step = TransactionStep::new("reserve", "Reserve stock", |ctx: Value| async move {
            Ok::<_, anyhow::Error>(json!({"reserved": ctx["qty"]}))
        });

        let ctx = json!({"qty": 3});
        let result = runner().execute_step(&step, &ctx, &ctx).await;

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.output, Some(json!({"reserved": 3})));
        assert_eq!(result.input, ctx);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_failing_step_records_error_and_attempts() {
        let step = TransactionStep::new("charge", "Charge card", |_ctx: Value| async {
            Err::<Value, _>(anyhow::anyhow!("card declined"))
        });

        let ctx = json!({});
        let result = runner().execute_step(&step, &ctx, &ctx).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.attempts, 3);
        assert!(result.error.unwrap().contains("card declined"));
        assert!(result.output.is_none());
    }

    #[tokio::test]
    async fn test_step_retry_override() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let step = TransactionStep::new("flaky", "Flaky step", move |_ctx: Value| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("first attempt fails");
                }
                Ok(json!("ok"))
            }
        })
        .with_retry_policy(RetryPolicy {
            max_attempts: 2,
            backoff_ms: 5,
            backoff_multiplier: 1.0,
        });

        let ctx = json!({});
        let result = runner().execute_step(&step, &ctx, &ctx).await;

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_step_timeout_fails_attempt() {
        let step = TransactionStep::new("slow", "Slow step", |_ctx: Value| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, anyhow::Error>(json!("never"))
        })
        .with_retry_policy(RetryPolicy::no_retry())
        .with_timeout(Duration::from_millis(20));

        let ctx = json!({});
        let result = runner().execute_step(&step, &ctx, &ctx).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.attempts, 1);
        assert!(result.error.unwrap().contains("timed out"));
    }
}
