//! Per-operation circuit breakers.
//!
//! Stops invoking a chronically failing page operation until a cooldown
//! elapses.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN (consecutive failures >= threshold)
//! OPEN → HALF_OPEN (cooldown elapsed; exactly one trial permitted)
//! HALF_OPEN → CLOSED (trial succeeds)
//! HALF_OPEN → OPEN (trial fails)
//! ```
//!
//! Breaker entries are created lazily on first failure and any success
//! resets the entry to `CLOSED` with a zero failure count. Cooldown expiry
//! is evaluated against wall-clock time at the moment of the check, so a
//! late check self-corrects rather than drifts.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// ============================================================================
// State / configuration
// ============================================================================

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// One trial call is in flight.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration, shared by every operation name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time to stay `OPEN` before permitting a trial.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Decision for one prospective call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDecision {
    /// Circuit closed (or never tripped); proceed.
    Allow,
    /// Cooldown elapsed; this call is the single `HALF_OPEN` trial.
    Trial,
    /// Circuit open; fail fast without invoking the operation.
    Reject {
        /// Remaining cooldown. Zero when a trial is already in flight.
        retry_after: Duration,
    },
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    total_failures: u64,
    total_trips: u64,
}

impl BreakerEntry {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            total_failures: 0,
            total_trips: 0,
        }
    }
}

/// Point-in-time metrics for one breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerMetrics {
    /// Operation name.
    pub operation: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// Failures recorded over the registry lifetime.
    pub total_failures: u64,
    /// Times the circuit opened.
    pub total_trips: u64,
}

/// Owned collection of circuit breakers keyed by operation name.
///
/// Injected into the resilience controller at construction so independent
/// controllers never share breaker state.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    entries: Mutex<HashMap<String, BreakerEntry>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a call to `operation` may proceed.
    #[must_use]
    pub fn check(&self, operation: &str) -> CallDecision {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let Some(entry) = entries.get_mut(operation) else {
            return CallDecision::Allow;
        };

        match entry.state {
            CircuitState::Closed => CallDecision::Allow,
            CircuitState::HalfOpen => CallDecision::Reject {
                retry_after: Duration::ZERO,
            },
            CircuitState::Open => {
                let elapsed = entry.opened_at.map_or(Duration::ZERO, |at| at.elapsed());
                if elapsed >= self.config.cooldown {
                    entry.state = CircuitState::HalfOpen;
                    tracing::info!(operation, "circuit breaker trial permitted");
                    CallDecision::Trial
                } else {
                    CallDecision::Reject {
                        retry_after: self.config.cooldown - elapsed,
                    }
                }
            }
        }
    }

    /// Record a successful call: reset to `CLOSED`, failure count zero.
    pub fn record_success(&self, operation: &str) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(entry) = entries.get_mut(operation) {
            if entry.state != CircuitState::Closed {
                tracing::info!(operation, from = %entry.state, "circuit breaker closed");
            }
            entry.state = CircuitState::Closed;
            entry.consecutive_failures = 0;
            entry.opened_at = None;
        }
    }

    /// Record a failed call, opening the circuit at the threshold.
    ///
    /// The entry is created lazily on the first failure. Returns the state
    /// after the failure was recorded.
    pub fn record_failure(&self, operation: &str) -> CircuitState {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let entry = entries
            .entry(operation.to_string())
            .or_insert_with(BreakerEntry::new);

        entry.consecutive_failures += 1;
        entry.total_failures += 1;

        let should_open = match entry.state {
            // A failed trial reopens immediately.
            CircuitState::HalfOpen => true,
            CircuitState::Closed => entry.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            entry.state = CircuitState::Open;
            entry.opened_at = Some(Instant::now());
            entry.total_trips += 1;
            metrics::counter!("circuit_breaker_trips_total").increment(1);
            tracing::warn!(
                operation,
                consecutive_failures = entry.consecutive_failures,
                "circuit breaker opened"
            );
        }

        entry.state
    }

    /// Current state for an operation (`CLOSED` when never tripped).
    #[must_use]
    pub fn state(&self, operation: &str) -> CircuitState {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(operation)
            .map_or(CircuitState::Closed, |e| e.state)
    }

    /// Consecutive failure count for an operation.
    #[must_use]
    pub fn consecutive_failures(&self, operation: &str) -> u32 {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(operation)
            .map_or(0, |e| e.consecutive_failures)
    }

    /// Metrics for every tracked operation.
    #[must_use]
    pub fn metrics(&self) -> Vec<BreakerMetrics> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(operation, e)| BreakerMetrics {
                operation: operation.clone(),
                state: e.state,
                consecutive_failures: e.consecutive_failures,
                total_failures: e.total_failures,
                total_trips: e.total_trips,
            })
            .collect()
    }
}
