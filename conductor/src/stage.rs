//! Stage definitions: the executable units of a pipeline.
//!
//! A stage is an opaque body of work plus scheduling metadata. The
//! orchestrator never inspects what a body does internally; it only
//! drives it through the retry executor and records the outcome.

use crate::cancellation::CancellationToken;
use crate::context::OrchestrationContext;
use crate::errors::OrchestratorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// The execution status of a stage within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet reached.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Condition evaluated false; never executed.
    Skipped,
    /// Exhausted its retries (or failed non-retriably).
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }
}

/// The opaque unit of work behind a stage.
///
/// Bodies receive the shared context and the run's cancellation token
/// and return either a result payload (recorded in the checkpoint) or a
/// classified failure.
#[async_trait]
pub trait StageBody: Send + Sync {
    /// Executes the stage's work.
    async fn execute(
        &self,
        ctx: Arc<OrchestrationContext>,
        cancel: Arc<CancellationToken>,
    ) -> Result<serde_json::Value, OrchestratorError>;
}

/// An async closure adapter for [`StageBody`].
pub struct FnStageBody<F, Fut>
where
    F: Fn(Arc<OrchestrationContext>, Arc<CancellationToken>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, OrchestratorError>> + Send,
{
    func: F,
    _phantom: std::marker::PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnStageBody<F, Fut>
where
    F: Fn(Arc<OrchestrationContext>, Arc<CancellationToken>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, OrchestratorError>> + Send,
{
    /// Wraps an async closure as a stage body.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _phantom: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> StageBody for FnStageBody<F, Fut>
where
    F: Fn(Arc<OrchestrationContext>, Arc<CancellationToken>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, OrchestratorError>> + Send,
{
    async fn execute(
        &self,
        ctx: Arc<OrchestrationContext>,
        cancel: Arc<CancellationToken>,
    ) -> Result<serde_json::Value, OrchestratorError> {
        (self.func)(ctx, cancel).await
    }
}

/// Predicate deciding whether a stage runs against the current context.
pub type StageCondition = Arc<dyn Fn(&OrchestrationContext) -> bool + Send + Sync>;

/// A single executable unit of a pipeline.
///
/// Created once at assembly time, immutable thereafter, and shared by
/// reference across runs.
pub struct StageDefinition {
    /// Unique identifier within one pipeline assembly.
    pub id: String,
    /// Display name, informational only.
    pub name: String,
    /// Execution rank; stages run in ascending order, ties broken by
    /// registration order.
    pub order: i32,
    /// Whether the run proceeds past this stage if it fails.
    pub continue_on_error: bool,
    /// Per-stage retry count override.
    pub max_retries: Option<u32>,
    /// Per-stage retry base-delay override.
    pub retry_delay: Option<Duration>,
    condition: Option<StageCondition>,
    body: Arc<dyn StageBody>,
}

impl StageDefinition {
    /// Creates a stage definition around a body.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        order: i32,
        body: Arc<dyn StageBody>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            order,
            continue_on_error: false,
            max_retries: None,
            retry_delay: None,
            condition: None,
            body,
        }
    }

    /// Creates a stage definition from an async closure.
    #[must_use]
    pub fn from_fn<F, Fut>(
        id: impl Into<String>,
        name: impl Into<String>,
        order: i32,
        func: F,
    ) -> Self
    where
        F: Fn(Arc<OrchestrationContext>, Arc<CancellationToken>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, OrchestratorError>> + Send + 'static,
    {
        Self::new(id, name, order, Arc::new(FnStageBody::new(func)))
    }

    /// Sets the skip condition.
    #[must_use]
    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&OrchestrationContext) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Sets the continue-on-error policy.
    #[must_use]
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Overrides the retry count for this stage.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Overrides the retry base delay for this stage.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Evaluates the stage's condition against the current context.
    ///
    /// A stage without a condition always runs.
    #[must_use]
    pub fn condition_allows(&self, ctx: &OrchestrationContext) -> bool {
        self.condition.as_ref().map_or(true, |cond| cond(ctx))
    }

    /// Returns the stage body.
    #[must_use]
    pub fn body(&self) -> &Arc<dyn StageBody> {
        &self.body
    }
}

impl fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("order", &self.order)
            .field("continue_on_error", &self.continue_on_error)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("has_condition", &self.condition.is_some())
            .finish()
    }
}
