//! Error types for the conductor orchestration core.
//!
//! Failures are classified by a pure function rather than by type
//! hierarchy: every error is either `Retriable` (eligible for the
//! backoff loop) or `NonRetriable` (propagated on first occurrence).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A transient I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation exceeded its time budget.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A network-level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// A stage body reported a failure.
    ///
    /// The optional source preserves the underlying cause so that
    /// classification can look through the wrapper.
    #[error("Stage '{stage}' failed: {message}")]
    Stage {
        /// The stage identifier.
        stage: String,
        /// The failure description.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<OrchestratorError>>,
    },

    /// A retriable operation failed through all allowed attempts.
    #[error("Operation '{operation}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// The operation name.
        operation: String,
        /// Total invocations made, including the first.
        attempts: u32,
        /// The last underlying failure.
        #[source]
        source: Box<OrchestratorError>,
    },

    /// The circuit breaker rejected the call before any attempt.
    #[error("Operation '{operation}' is unavailable: circuit breaker is open")]
    CircuitOpen {
        /// The operation name.
        operation: String,
    },

    /// The run was cancelled.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// A stage id was registered twice.
    #[error("Stage '{id}' is already registered")]
    AlreadyRegistered {
        /// The conflicting stage id.
        id: String,
    },

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Pipeline configuration failed validation.
    #[error("{0}")]
    Validation(#[from] ConfigValidationError),
}

impl OrchestratorError {
    /// Creates a stage failure without an underlying cause.
    #[must_use]
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a stage failure wrapping an underlying cause.
    #[must_use]
    pub fn stage_with_source(
        stage: impl Into<String>,
        message: impl Into<String>,
        source: OrchestratorError,
    ) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Returns true if this error is eligible for retry.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        classify(self) == ErrorClass::Retriable
    }
}

/// The retry eligibility of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient failure, eligible for the backoff loop.
    Retriable,
    /// Permanent failure, propagated on first occurrence.
    NonRetriable,
}

/// Classifies an error as retriable or not.
///
/// Timeouts, network failures, and I/O errors are transient. A stage
/// wrapper is classified by its nested cause, recursively, so a
/// retriable error does not lose its eligibility by being wrapped.
#[must_use]
pub fn classify(error: &OrchestratorError) -> ErrorClass {
    match error {
        OrchestratorError::Io(_)
        | OrchestratorError::Timeout(_)
        | OrchestratorError::Network(_) => ErrorClass::Retriable,
        OrchestratorError::Stage {
            source: Some(inner),
            ..
        } => classify(inner),
        _ => ErrorClass::NonRetriable,
    }
}

/// Error raised when pipeline configuration fails validation.
///
/// Carries every distinct problem found, not just the first one.
#[derive(Debug, Clone, Error)]
#[error("Invalid pipeline configuration: {}", messages.join("; "))]
pub struct ConfigValidationError {
    /// The distinct validation messages.
    pub messages: Vec<String>,
}

impl ConfigValidationError {
    /// Creates a new validation error from a list of messages.
    #[must_use]
    pub fn new(messages: Vec<String>) -> Self {
        Self { messages }
    }
}
