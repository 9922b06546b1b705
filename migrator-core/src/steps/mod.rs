//! Workflow step executors
//!
//! Each workflow step is an external operation the coordinator treats as a
//! black box. External operations are not safe to repeat, so every executor
//! exposes two calls:
//!
//! - `check`: has the operation identified by the context's idempotency key
//!   already taken effect? Returns the receipt if so.
//! - `execute`: run the operation once.
//!
//! The state machine only calls `check` when it finds a write-ahead marker for
//! the step it is about to run, meaning an earlier attempt may have executed
//! it without the outcome being recorded.

pub mod remote;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::types::{MigrationStep, Mint, StepReceipt};

/// Failure reported by an external step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// Transient failure; the step may be attempted again later
    #[error("retryable step failure: {0}")]
    Retryable(String),

    /// The external system reports a condition that cannot resolve itself
    #[error("fatal step failure: {0}")]
    Fatal(String),
}

impl StepError {
    pub fn retryable(reason: impl Into<String>) -> Self {
        StepError::Retryable(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        StepError::Fatal(reason.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Retryable(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            StepError::Retryable(reason) | StepError::Fatal(reason) => reason,
        }
    }
}

impl From<reqwest::Error> for StepError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            StepError::Fatal(format!("invalid step request: {}", e))
        } else {
            StepError::Retryable(e.to_string())
        }
    }
}

/// Step result
pub type StepResult<T> = Result<T, StepError>;

/// Everything an executor gets to know about the step it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    pub mint: Mint,
    pub step: MigrationStep,
    /// `<mint>:<step>`, identical for every attempt of the step
    pub idempotency_key: String,
    /// 1-based execute attempt counter across the migration
    pub attempt: u32,
    /// Receipts of steps already completed, for resume data
    pub completed: BTreeMap<MigrationStep, StepReceipt>,
}

impl StepContext {
    pub fn receipt(&self, step: MigrationStep) -> Option<&StepReceipt> {
        self.completed.get(&step)
    }
}

/// External step executor
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Whether the step already took effect for this idempotency key
    async fn check(&self, ctx: &StepContext) -> StepResult<Option<StepReceipt>>;

    /// Run the step once
    async fn execute(&self, ctx: &StepContext) -> StepResult<StepReceipt>;
}

/// Dispatches each step to its own executor
#[derive(Clone, Default)]
pub struct StepRouter {
    executors: HashMap<MigrationStep, Arc<dyn StepExecutor>>,
    fallback: Option<Arc<dyn StepExecutor>>,
}

impl StepRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, step: MigrationStep, executor: Arc<dyn StepExecutor>) -> Self {
        self.executors.insert(step, executor);
        self
    }

    /// Executor for steps without a dedicated route
    pub fn fallback(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.fallback = Some(executor);
        self
    }

    fn executor_for(&self, step: MigrationStep) -> StepResult<&Arc<dyn StepExecutor>> {
        self.executors
            .get(&step)
            .or(self.fallback.as_ref())
            .ok_or_else(|| StepError::fatal(format!("no executor registered for step {}", step)))
    }
}

#[async_trait]
impl StepExecutor for StepRouter {
    async fn check(&self, ctx: &StepContext) -> StepResult<Option<StepReceipt>> {
        self.executor_for(ctx.step)?.check(ctx).await
    }

    async fn execute(&self, ctx: &StepContext) -> StepResult<StepReceipt> {
        self.executor_for(ctx.step)?.execute(ctx).await
    }
}

pub use remote::RemoteStepExecutor;
