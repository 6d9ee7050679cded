// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Automation Engine - Rust Core Library
//!
//! Resilience layer for browser-driven order automation. The engine sits
//! between a page-driving host and a third-party trading application's
//! rendered UI, and makes an inherently unreliable, latency-sensitive
//! pipeline behave predictably.
//!
//! # Architecture
//!
//! - **`classification`**: maps raw failure text to a taxonomy entry
//!   (category, severity, suggested recovery). Total and deterministic.
//! - **`resilience`**: executes page operations under retry, exponential
//!   backoff, and per-operation circuit breaking, with pluggable recovery
//!   strategies keyed by classification.
//! - **`governor`**: observes validation latency and degrades/upgrades a
//!   discrete feature level to keep overhead under a hard budget.
//! - **`tracker`**: owns order records, drives pre-submission, submission,
//!   and post-submission validation, and runs the status-poll loops.
//! - **`analyzer`**: compares intended vs. observed order state and scores
//!   bracket coordination. A derived, stateless view.
//! - **`ports`**: driven ports for the UI-query and sizing collaborators.
//! - **`persistence`**: best-effort local snapshot caching.
//!
//! # Concurrency
//!
//! One cooperative control flow on the tokio runtime: operations interleave
//! at explicit suspension points (element polling, confirmation waits, poll
//! loops, backoff sleeps) and never run simultaneously against the order
//! store. Poll loops are explicit tasks guarded by an owned active flag.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Reconciliation analyzer - derived views over order snapshots.
pub mod analyzer;

/// Failure classification engine.
pub mod classification;

/// Configuration loading and validation.
pub mod config;

/// Shared error types.
pub mod error;

/// Lifecycle event surface.
pub mod events;

/// Adaptive performance governor.
pub mod governor;

/// Best-effort snapshot persistence.
pub mod persistence;

/// Driven ports for external collaborators.
pub mod ports;

/// Circuit breaking and retry/recovery orchestration.
pub mod resilience;

/// Tracing and metrics setup.
pub mod telemetry;

/// Order lifecycle tracking.
pub mod tracker;

// =============================================================================
// Re-exports
// =============================================================================

pub use analyzer::{ObservedOrder, ReconciliationAnalyzer, ReconciliationReport};
pub use classification::{Classification, ErrorCategory, ErrorSeverity, ErrorTaxonomy, RecoveryKey};
pub use config::{Config, load_config, load_config_from_string};
pub use error::AutomationError;
pub use events::{EventBus, EventEnvelope, Subscription};
pub use governor::{FeatureFlags, GovernorReport, PerformanceGovernor, PerformanceLevel};
pub use persistence::{EngineSnapshot, SnapshotStore};
pub use ports::{AccountMetrics, SizingPort, SizingVerdict, UiQueryPort};
pub use resilience::{
    CircuitBreakerRegistry, CircuitState, RecoveryPolicy, RecoveryStrategy, ResilienceController,
};
pub use tracker::{
    OrderIntent, OrderLifecycleTracker, OrderRecord, OrderStatus, TrackerConfig, ValidationReport,
};
