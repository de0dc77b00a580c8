//! The orchestration engine: drives an ordered list of stages through
//! the retry executor, persists progress via the checkpoint store, and
//! emits lifecycle events.
//!
//! Stages execute strictly sequentially within one run. The checkpoint
//! write for stage N is awaited before stage N+1 begins, and the
//! cancellation token is checked between stages so no new stage starts
//! after cancellation.

use crate::breaker::CircuitBreakerRegistry;
use crate::cancellation::CancellationToken;
use crate::checkpoint::CheckpointStore;
use crate::context::OrchestrationContext;
use crate::events::{EventBus, PipelineEvent};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::stage::{StageDefinition, StageStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    /// Unique identifier for this run.
    pub run_id: String,
    /// Overall outcome. False when any stage failed, the run was
    /// aborted, or it was cancelled.
    pub success: bool,
    /// Stage ids executed during this run, in order.
    pub executed_stages: Vec<String>,
    /// Stage ids skipped by their condition, in order.
    pub skipped_stages: Vec<String>,
    /// Stage ids that exhausted their retries, in order.
    pub failed_stages: Vec<String>,
    /// Final status of every stage in the pipeline. Stages never
    /// reached (after an abort or cancellation) remain `Pending`.
    pub stage_statuses: HashMap<String, StageStatus>,
    /// Wall-clock time of the run.
    pub total_duration: Duration,
    /// Failure description; present only when `success` is false.
    pub error_message: Option<String>,
    /// The stage at which the run stopped, if it did not run to the end.
    pub halted_stage: Option<String>,
}

/// Coordinates stage execution for a pipeline.
#[derive(Debug)]
pub struct OrchestrationEngine {
    stages: Vec<Arc<StageDefinition>>,
    retry: RetryExecutor,
    checkpoints: CheckpointStore,
    events: EventBus,
    default_retry: RetryPolicy,
}

impl OrchestrationEngine {
    /// Creates an engine over an ordered stage list and checkpoint store.
    ///
    /// Stages are sorted by ascending `order`; ties keep their supplied
    /// order. A fresh circuit-breaker registry is used unless one is
    /// provided via [`with_breaker`](Self::with_breaker).
    #[must_use]
    pub fn new(stages: Vec<StageDefinition>, checkpoints: CheckpointStore) -> Self {
        let mut stages: Vec<Arc<StageDefinition>> = stages.into_iter().map(Arc::new).collect();
        stages.sort_by_key(|s| s.order);

        Self {
            stages,
            retry: RetryExecutor::new(Arc::new(CircuitBreakerRegistry::new())),
            checkpoints,
            events: EventBus::new(),
            default_retry: RetryPolicy::default(),
        }
    }

    /// Uses a shared circuit-breaker registry instead of a private one.
    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreakerRegistry>) -> Self {
        self.retry = RetryExecutor::new(breaker);
        self
    }

    /// Sets the retry policy used when a stage has no override.
    #[must_use]
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    /// Returns the lifecycle event bus for subscription.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Returns the number of stages in the pipeline.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Executes the pipeline.
    ///
    /// Loads the checkpoint (if resumption is enabled on the store) and
    /// skips any stage already recorded complete, re-injecting its saved
    /// result data into the context. Remaining stages run in order
    /// through the retry executor; each completion is durably
    /// checkpointed before the next stage begins. On full success the
    /// checkpoint is deleted so a later run starts fresh.
    pub async fn execute(
        &self,
        ctx: Arc<OrchestrationContext>,
        cancel: Arc<CancellationToken>,
    ) -> OrchestrationResult {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let mut checkpoint = self.checkpoints.load();
        if !checkpoint.is_empty() {
            info!(
                run_id = %run_id,
                completed = checkpoint.completed_steps.len(),
                "Resuming from checkpoint"
            );
        }

        let mut stage_statuses: HashMap<String, StageStatus> = self
            .stages
            .iter()
            .map(|s| (s.id.clone(), StageStatus::Pending))
            .collect();
        let mut executed_stages = Vec::new();
        let mut skipped_stages = Vec::new();
        let mut failed_stages = Vec::new();
        let mut error_message = None;
        let mut halted_stage = None;
        let mut aborted = false;

        info!(run_id = %run_id, stages = self.stages.len(), "Run started");

        for stage in &self.stages {
            if cancel.is_cancelled() {
                let reason = cancel.reason().unwrap_or_else(|| "unspecified".to_string());
                warn!(run_id = %run_id, stage = %stage.id, reason = %reason, "Run cancelled");
                error_message = Some(format!("Run cancelled: {reason}"));
                halted_stage = Some(stage.id.clone());
                aborted = true;
                break;
            }

            if checkpoint.is_step_complete(&stage.id) {
                debug!(run_id = %run_id, stage = %stage.id, "Already complete, restoring saved data");
                if let Some(data) = checkpoint.step_data(&stage.id) {
                    ctx.set(&stage.id, data.clone());
                }
                stage_statuses.insert(stage.id.clone(), StageStatus::Completed);
                continue;
            }

            if !stage.condition_allows(&ctx) {
                info!(run_id = %run_id, stage = %stage.id, "Condition not met, skipping");
                skipped_stages.push(stage.id.clone());
                stage_statuses.insert(stage.id.clone(), StageStatus::Skipped);
                continue;
            }

            stage_statuses.insert(stage.id.clone(), StageStatus::Running);

            self.events.emit_stage_start(&PipelineEvent::started(&stage.name));
            let stage_started = Instant::now();

            let policy = RetryPolicy {
                max_retries: stage.max_retries.unwrap_or(self.default_retry.max_retries),
                base_delay: stage.retry_delay.unwrap_or(self.default_retry.base_delay),
            };
            let operation = format!("stage:{}", stage.id);

            let body = stage.body().clone();
            let result = self
                .retry
                .execute_with_retry(&operation, &policy, || {
                    let body = body.clone();
                    let ctx = ctx.clone();
                    let cancel = cancel.clone();
                    async move { body.execute(ctx, cancel).await }
                })
                .await;

            match result {
                Ok(value) => {
                    let elapsed_ms = stage_started.elapsed().as_secs_f64() * 1000.0;
                    executed_stages.push(stage.id.clone());
                    stage_statuses.insert(stage.id.clone(), StageStatus::Completed);

                    let data = if value.is_null() {
                        None
                    } else {
                        ctx.set(&stage.id, value.clone());
                        Some(value)
                    };
                    checkpoint.mark_complete(&stage.id, data);
                    if let Err(e) = self.checkpoints.save(&checkpoint) {
                        warn!(run_id = %run_id, stage = %stage.id, error = %e, "Failed to persist checkpoint");
                    }

                    info!(run_id = %run_id, stage = %stage.id, elapsed_ms, "Stage completed");
                    self.events
                        .emit_stage_complete(&PipelineEvent::completed(&stage.name, elapsed_ms));
                }
                Err(error) => {
                    self.events.emit_stage_error(&PipelineEvent::failed(
                        &stage.name,
                        &error.to_string(),
                        false,
                    ));
                    failed_stages.push(stage.id.clone());
                    stage_statuses.insert(stage.id.clone(), StageStatus::Failed);

                    if stage.continue_on_error {
                        warn!(run_id = %run_id, stage = %stage.id, error = %error, "Stage failed, continuing");
                    } else {
                        warn!(run_id = %run_id, stage = %stage.id, error = %error, "Stage failed, aborting run");
                        error_message = Some(error.to_string());
                        halted_stage = Some(stage.id.clone());
                        aborted = true;
                        break;
                    }
                }
            }
        }

        let success = !aborted && failed_stages.is_empty();

        if success {
            if let Err(e) = self.checkpoints.delete() {
                warn!(run_id = %run_id, error = %e, "Failed to delete checkpoint after success");
            }
        } else if error_message.is_none() {
            error_message = Some(format!(
                "{} stage(s) failed: {}",
                failed_stages.len(),
                failed_stages.join(", ")
            ));
        }

        let total_duration = started.elapsed();
        info!(
            run_id = %run_id,
            success,
            executed = executed_stages.len(),
            skipped = skipped_stages.len(),
            failed = failed_stages.len(),
            elapsed_ms = total_duration.as_secs_f64() * 1000.0,
            "Run finished"
        );

        OrchestrationResult {
            run_id,
            success,
            executed_stages,
            skipped_stages,
            failed_stages,
            stage_statuses,
            total_duration,
            error_message,
            halted_stage,
        }
    }
}
