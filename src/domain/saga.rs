//! Saga definitions: ordered transaction steps with compensations.
//!
//! A `SagaDefinition` is an immutable template built once by the caller.
//! Steps run in definition order; compensations run in reverse order of
//! successful completion.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::core::retry::RetryPolicy;

/// The forward action of a transaction step.
///
/// Receives the saga context and produces an opaque JSON output that is
/// captured on the step result and handed back to the compensation.
#[async_trait]
pub trait StepAction<C>: Send + Sync {
    async fn run(&self, ctx: &C) -> Result<Value>;
}

/// Semantically reverses a previously successful step.
///
/// Receives the context snapshot saved when the step ran and the output the
/// action produced.
#[async_trait]
pub trait Compensation<C>: Send + Sync {
    async fn run(&self, ctx: &C, output: &Value) -> Result<()>;
}

/// Hook invoked after every step completed successfully.
#[async_trait]
pub trait SuccessHook<C>: Send + Sync {
    async fn run(&self, ctx: &C) -> Result<()>;
}

/// Hook invoked after the compensation sweep finished.
#[async_trait]
pub trait FailureHook<C>: Send + Sync {
    async fn run(&self, ctx: &C, error: &str) -> Result<()>;
}

// Closures are accepted anywhere a trait object is expected. The context is
// handed to the closure by value, so `C` must be `Clone`.

#[async_trait]
impl<C, F, Fut> StepAction<C> for F
where
    C: Clone + Send + Sync + 'static,
    F: Fn(C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn run(&self, ctx: &C) -> Result<Value> {
        (self)(ctx.clone()).await
    }
}

#[async_trait]
impl<C, F, Fut> Compensation<C> for F
where
    C: Clone + Send + Sync + 'static,
    F: Fn(C, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: &C, output: &Value) -> Result<()> {
        (self)(ctx.clone(), output.clone()).await
    }
}

#[async_trait]
impl<C, F, Fut> SuccessHook<C> for F
where
    C: Clone + Send + Sync + 'static,
    F: Fn(C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: &C) -> Result<()> {
        (self)(ctx.clone()).await
    }
}

#[async_trait]
impl<C, F, Fut> FailureHook<C> for F
where
    C: Clone + Send + Sync + 'static,
    F: Fn(C, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: &C, error: &str) -> Result<()> {
        (self)(ctx.clone(), error.to_string()).await
    }
}

/// A single step in a saga
pub struct TransactionStep<C> {
    /// Step id (unique within the saga)
    pub id: String,

    /// Human-readable step name
    pub name: String,

    /// Forward action
    pub action: Arc<dyn StepAction<C>>,

    /// Optional compensation; steps without one are skipped during a sweep
    pub compensation: Option<Arc<dyn Compensation<C>>>,

    /// Override retry policy for this step (orchestrator default if not set)
    pub retry_policy: Option<RetryPolicy>,

    /// Override timeout for this step (orchestrator default if not set)
    pub timeout: Option<Duration>,
}

impl<C> TransactionStep<C> {
    /// Create a step from an id, a name, and its forward action
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        action: impl StepAction<C> + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            action: Arc::new(action),
            compensation: None,
            retry_policy: None,
            timeout: None,
        }
    }

    /// Attach a compensation
    pub fn with_compensation(mut self, compensation: impl Compensation<C> + 'static) -> Self {
        self.compensation = Some(Arc::new(compensation));
        self
    }

    /// Override the retry policy for this step
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Override the timeout for this step
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Effective timeout for this step
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}

impl<C> Clone for TransactionStep<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            action: self.action.clone(),
            compensation: self.compensation.clone(),
            retry_policy: self.retry_policy.clone(),
            timeout: self.timeout,
        }
    }
}

/// A complete saga definition
pub struct SagaDefinition<C> {
    /// Saga id (caller-chosen, shared by all executions of this template)
    pub id: String,

    /// Human-readable description
    pub name: String,

    /// Ordered list of steps to execute
    pub steps: Vec<TransactionStep<C>>,

    /// Invoked once every step succeeded
    pub on_success: Option<Arc<dyn SuccessHook<C>>>,

    /// Invoked once the compensation sweep finished
    pub on_failure: Option<Arc<dyn FailureHook<C>>>,
}

impl<C> SagaDefinition<C> {
    /// Create an empty definition
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
            on_success: None,
            on_failure: None,
        }
    }

    /// Append a step
    pub fn step(mut self, step: TransactionStep<C>) -> Self {
        self.steps.push(step);
        self
    }

    /// Attach the success hook
    pub fn on_success(mut self, hook: impl SuccessHook<C> + 'static) -> Self {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Attach the failure hook
    pub fn on_failure(mut self, hook: impl FailureHook<C> + 'static) -> Self {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    /// Validate the definition
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            anyhow::bail!("Saga id cannot be empty");
        }

        if self.steps.is_empty() {
            anyhow::bail!("Saga must have at least one step");
        }

        for (i, step) in self.steps.iter().enumerate() {
            if step.id.is_empty() {
                anyhow::bail!("Step {} has an empty id", i);
            }

            let duplicate = self.steps[..i].iter().any(|s| s.id == step.id);
            if duplicate {
                anyhow::bail!("Duplicate step id '{}'", step.id);
            }
        }

        Ok(())
    }

    /// Get a step by id
    pub fn get_step(&self, id: &str) -> Option<&TransactionStep<C>> {
        self.steps.iter().find(|s| s.id == id)
    }
}

impl<C> Clone for SagaDefinition<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            steps: self.steps.clone(),
            on_success: self.on_success.clone(),
            on_failure: self.on_failure.clone(),
        }
    }
}
