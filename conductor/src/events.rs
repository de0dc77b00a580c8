//! Lifecycle events and observer registration.
//!
//! The engine exposes three subscribable channels: stage-start,
//! stage-complete, and stage-error. Firing an event is a synchronous
//! iteration over the registered handlers; a panicking handler is
//! logged and suppressed so observability never takes down a run.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A lifecycle event payload.
#[derive(Debug, Clone)]
pub struct PipelineEvent {
    /// The stage this event concerns.
    pub stage: String,
    /// When the event occurred (ISO 8601).
    pub timestamp: String,
    /// Additional event data.
    pub data: HashMap<String, serde_json::Value>,
}

impl PipelineEvent {
    /// Creates an event for a stage, stamped now.
    #[must_use]
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            timestamp: Utc::now().to_rfc3339(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Creates a stage-start event.
    #[must_use]
    pub fn started(stage: &str) -> Self {
        Self::new(stage)
    }

    /// Creates a stage-complete event carrying the elapsed time.
    #[must_use]
    pub fn completed(stage: &str, duration_ms: f64) -> Self {
        Self::new(stage).add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a stage-error event.
    ///
    /// `will_retry` says whether another attempt follows this failure.
    #[must_use]
    pub fn failed(stage: &str, error: &str, will_retry: bool) -> Self {
        Self::new(stage)
            .add_data("error", serde_json::json!(error))
            .add_data("will_retry", serde_json::json!(will_retry))
    }
}

/// A registered event callback.
pub type EventHandler = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Observer registration for the three lifecycle channels.
#[derive(Default)]
pub struct EventBus {
    on_start: RwLock<Vec<EventHandler>>,
    on_complete: RwLock<Vec<EventHandler>>,
    on_error: RwLock<Vec<EventHandler>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to stage-start events.
    pub fn on_stage_start<F>(&self, handler: F)
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        self.on_start.write().push(Arc::new(handler));
    }

    /// Subscribes to stage-complete events.
    pub fn on_stage_complete<F>(&self, handler: F)
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        self.on_complete.write().push(Arc::new(handler));
    }

    /// Subscribes to stage-error events.
    pub fn on_stage_error<F>(&self, handler: F)
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        self.on_error.write().push(Arc::new(handler));
    }

    /// Fires a stage-start event.
    pub fn emit_stage_start(&self, event: &PipelineEvent) {
        Self::fire(&self.on_start.read(), event);
    }

    /// Fires a stage-complete event.
    pub fn emit_stage_complete(&self, event: &PipelineEvent) {
        Self::fire(&self.on_complete.read(), event);
    }

    /// Fires a stage-error event.
    pub fn emit_stage_error(&self, event: &PipelineEvent) {
        Self::fire(&self.on_error.read(), event);
    }

    fn fire(handlers: &[EventHandler], event: &PipelineEvent) {
        for handler in handlers {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(event);
            })) {
                warn!(stage = %event.stage, "Event handler panicked: {:?}", e);
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("on_start", &self.on_start.read().len())
            .field("on_complete", &self.on_complete.read().len())
            .field("on_error", &self.on_error.read().len())
            .finish()
    }
}
