//! # Conductor
//!
//! A pipeline orchestration core: executes an ordered set of named
//! processing stages with retry, failure isolation, resumability, and
//! observability.
//!
//! Conductor never inspects what a stage does internally. Stages are
//! opaque units of work plugged in behind the [`stage::StageBody`]
//! seam; the engine drives them through a retry executor backed by a
//! circuit breaker, persists progress in an atomic checkpoint store,
//! and emits lifecycle events to registered observers.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conductor::prelude::*;
//!
//! let stages = vec![
//!     StageDefinition::from_fn("fetch", "Fetch", 1, |ctx, _cancel| async move {
//!         ctx.set("payload", serde_json::json!("data"));
//!         Ok(serde_json::Value::Null)
//!     }),
//! ];
//!
//! let engine = OrchestrationEngine::new(stages, CheckpointStore::new("checkpoint.json"));
//! let result = engine
//!     .execute(Arc::new(OrchestrationContext::new()), Arc::new(CancellationToken::new()))
//!     .await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod breaker;
pub mod cancellation;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod events;
pub mod registry;
pub mod retry;
pub mod stage;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::breaker::{BreakerPolicy, CircuitBreakerRegistry};
    pub use crate::cancellation::CancellationToken;
    pub use crate::checkpoint::{CheckpointStore, PipelineCheckpoint};
    pub use crate::config::{PipelineConfig, StageConfig};
    pub use crate::context::OrchestrationContext;
    pub use crate::engine::{OrchestrationEngine, OrchestrationResult};
    pub use crate::errors::{classify, ConfigValidationError, ErrorClass, OrchestratorError};
    pub use crate::events::{EventBus, PipelineEvent};
    pub use crate::registry::{StageFactory, StageMetadata, StageRegistry};
    pub use crate::retry::{RetryExecutor, RetryPolicy};
    pub use crate::stage::{FnStageBody, StageBody, StageCondition, StageDefinition, StageStatus};
}
