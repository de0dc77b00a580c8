//! Per-operation circuit breaker registry.
//!
//! Tracks consecutive failures for each operation name and quarantines
//! a persistently failing operation until a cooldown window passes.
//! The state machine is Closed -> Open -> HalfOpen -> Closed: once open,
//! checking the breaker after the cooldown has elapsed is itself the
//! recovery trigger, letting exactly one trial call through.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Policy knobs for the circuit breaker.
#[derive(Debug, Clone, Copy)]
pub struct BreakerPolicy {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before probing recovery.
    pub cooldown: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

impl BreakerPolicy {
    /// Creates a new policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the cooldown window.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Per-operation breaker state.
#[derive(Debug, Default)]
struct BreakerEntry {
    /// Consecutive failures since the last success.
    failure_count: u32,
    /// When the most recent failure occurred.
    last_failure: Option<Instant>,
    /// Whether calls are currently rejected.
    is_open: bool,
    /// Whether the breaker is in its one-trial-call recovery state.
    half_open: bool,
}

/// Process-wide failure tracking keyed by operation name.
///
/// Entries are created lazily on first failure and live for the process
/// lifetime; a recorded success resets them. The dashmap shards give
/// per-key mutual exclusion without a global lock.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    entries: DashMap<String, BreakerEntry>,
    policy: BreakerPolicy,
}

impl CircuitBreakerRegistry {
    /// Creates a registry with the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with a custom policy.
    #[must_use]
    pub fn with_policy(policy: BreakerPolicy) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
        }
    }

    /// Returns true if calls for this operation should be rejected.
    ///
    /// If the breaker is open but the cooldown has elapsed since the
    /// last failure, this call transitions it to half-open (clearing
    /// the open flag and failure count) and returns false, so the next
    /// attempt is the recovery probe.
    pub fn is_open(&self, operation: &str) -> bool {
        let Some(mut entry) = self.entries.get_mut(operation) else {
            return false;
        };

        if !entry.is_open {
            return false;
        }

        let cooled_down = entry
            .last_failure
            .is_some_and(|at| at.elapsed() >= self.policy.cooldown);

        if cooled_down {
            info!(operation, "Circuit breaker cooldown elapsed, entering half-open");
            entry.is_open = false;
            entry.half_open = true;
            entry.failure_count = 0;
            return false;
        }

        true
    }

    /// Records a successful call, closing the breaker for this operation.
    pub fn record_success(&self, operation: &str) {
        if let Some(mut entry) = self.entries.get_mut(operation) {
            if entry.is_open || entry.half_open {
                info!(operation, "Circuit breaker closed after success");
            }
            entry.failure_count = 0;
            entry.last_failure = None;
            entry.is_open = false;
            entry.half_open = false;
        }
    }

    /// Records a failed call, opening the breaker once the threshold is hit.
    ///
    /// A failure during the half-open trial reopens the breaker
    /// immediately with a refreshed failure time.
    pub fn record_failure(&self, operation: &str) {
        let mut entry = self.entries.entry(operation.to_string()).or_default();
        entry.last_failure = Some(Instant::now());

        if entry.half_open {
            warn!(operation, "Recovery probe failed, circuit breaker reopened");
            entry.half_open = false;
            entry.is_open = true;
            entry.failure_count = self.policy.failure_threshold;
            return;
        }

        entry.failure_count += 1;
        debug!(
            operation,
            failure_count = entry.failure_count,
            "Circuit breaker recorded failure"
        );

        if entry.failure_count >= self.policy.failure_threshold && !entry.is_open {
            warn!(
                operation,
                failure_count = entry.failure_count,
                "Circuit breaker opened"
            );
            entry.is_open = true;
        }
    }

    /// Returns the consecutive failure count for an operation.
    #[must_use]
    pub fn failure_count(&self, operation: &str) -> u32 {
        self.entries
            .get(operation)
            .map_or(0, |entry| entry.failure_count)
    }
}
