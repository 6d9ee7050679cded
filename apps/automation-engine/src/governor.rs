//! Adaptive performance governor.
//!
//! The automation's only hard constraint is staying invisible in cost to
//! the human-speed UI it drives. The governor watches validation latency
//! against a fixed budget and trades validation completeness for latency
//! under sustained load: it maintains a discrete feature level and
//! publishes a feature-flag set the tracker reads before each validation
//! phase. The governor never decides which validations run; publishing
//! flags is its only side effect.
//!
//! # Rules
//!
//! - A sample above the budget is a violation; violations inside a rolling
//!   30 s window are counted at check time. Three or more recent violations
//!   force a two-step downgrade; exactly one downgrades a single step, and
//!   only from `FULL`.
//! - A rolling average (last 5+ samples) above 80% of the budget downgrades
//!   one step proactively, even without a hard violation.
//! - At most one downgrade is applied per evaluation cycle.
//! - A periodic check (every 60 s) recovers one step when the rolling
//!   average falls below 50% of the budget. Recovery is one step at a time,
//!   never a jump back to `FULL`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ============================================================================
// Levels, modes, flags
// ============================================================================

/// Feature-reduction tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceLevel {
    /// Every validation feature enabled.
    Full,
    /// Advisory checks shed; polling widened.
    Reduced,
    /// Bare-minimum validation only.
    Minimal,
}

impl PerformanceLevel {
    /// Step down `steps` levels, saturating at `Minimal`.
    #[must_use]
    pub const fn downgraded(self, steps: u32) -> Self {
        match (self, steps) {
            (level, 0) => level,
            (Self::Full, 1) => Self::Reduced,
            _ => Self::Minimal,
        }
    }

    /// Step up one level, saturating at `Full`.
    #[must_use]
    pub const fn upgraded(self) -> Self {
        match self {
            Self::Minimal => Self::Reduced,
            Self::Reduced | Self::Full => Self::Full,
        }
    }

    /// Reporting mode derived from the level.
    #[must_use]
    pub const fn mode(self) -> PerformanceMode {
        match self {
            Self::Full => PerformanceMode::Optimal,
            Self::Reduced => PerformanceMode::Degraded,
            Self::Minimal => PerformanceMode::Critical,
        }
    }
}

impl std::fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "FULL"),
            Self::Reduced => write!(f, "REDUCED"),
            Self::Minimal => write!(f, "MINIMAL"),
        }
    }
}

/// Reporting-only mode derived from the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceMode {
    /// Operating within budget.
    Optimal,
    /// Shedding advisory work.
    Degraded,
    /// Minimal validation only.
    Critical,
}

/// Feature flags published by the governor and read by the tracker.
///
/// `MINIMAL` enables every reduction, `REDUCED` a strict subset, `FULL`
/// none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Skip UI-readiness checks during pre-submission validation.
    pub skip_ui_readiness: bool,
    /// Skip the market-hours advisory check.
    pub skip_market_hours: bool,
    /// Widen the status-poll interval.
    pub widen_poll_interval: bool,
    /// Scan only the primary error surface, not every banner region.
    pub minimal_error_scan: bool,
    /// Suppress verbose (debug-level) validation logging.
    pub suppress_verbose_logging: bool,
}

impl FeatureFlags {
    /// Deterministic flag set for a level.
    #[must_use]
    pub const fn for_level(level: PerformanceLevel) -> Self {
        match level {
            PerformanceLevel::Full => Self {
                skip_ui_readiness: false,
                skip_market_hours: false,
                widen_poll_interval: false,
                minimal_error_scan: false,
                suppress_verbose_logging: false,
            },
            PerformanceLevel::Reduced => Self {
                skip_ui_readiness: false,
                skip_market_hours: true,
                widen_poll_interval: true,
                minimal_error_scan: false,
                suppress_verbose_logging: true,
            },
            PerformanceLevel::Minimal => Self {
                skip_ui_readiness: true,
                skip_market_hours: true,
                widen_poll_interval: true,
                minimal_error_scan: true,
                suppress_verbose_logging: true,
            },
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Governor tuning.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Hard per-validation latency budget.
    pub budget: Duration,
    /// Window over which violations count as "recent".
    pub violation_window: Duration,
    /// Minimum time between recovery evaluations.
    pub recovery_interval: Duration,
    /// Ring buffer capacity for latency samples.
    pub max_samples: usize,
    /// Samples required before the rolling average is trusted.
    pub min_samples_for_average: usize,
    /// Fraction of the budget that triggers a proactive downgrade.
    pub proactive_threshold: f64,
    /// Fraction of the budget the average must fall below to recover.
    pub recovery_threshold: f64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_millis(10),
            violation_window: Duration::from_secs(30),
            recovery_interval: Duration::from_secs(60),
            max_samples: 100,
            min_samples_for_average: 5,
            proactive_threshold: 0.8,
            recovery_threshold: 0.5,
        }
    }
}

// ============================================================================
// Governor
// ============================================================================

#[derive(Debug)]
struct GovernorState {
    level: PerformanceLevel,
    samples: VecDeque<Duration>,
    violations: VecDeque<Instant>,
    recent_context: VecDeque<(String, f64)>,
    total_samples: u64,
    total_violations: u64,
    last_recovery_check: Instant,
}

/// Point-in-time governor report.
#[derive(Debug, Clone, Serialize)]
pub struct GovernorReport {
    /// Current level.
    pub level: PerformanceLevel,
    /// Derived reporting mode.
    pub mode: PerformanceMode,
    /// Budget in milliseconds.
    pub budget_ms: f64,
    /// Samples recorded over the governor lifetime.
    pub total_samples: u64,
    /// Budget violations over the governor lifetime.
    pub total_violations: u64,
    /// Violations inside the rolling window right now.
    pub recent_violations: usize,
    /// Rolling average latency in milliseconds.
    pub rolling_average_ms: f64,
    /// Currently published flags.
    pub flags: FeatureFlags,
}

/// Observes validation latency and governs the feature level.
#[derive(Debug)]
pub struct PerformanceGovernor {
    config: GovernorConfig,
    state: RwLock<GovernorState>,
}

impl PerformanceGovernor {
    /// Create a governor at `FULL`.
    #[must_use]
    pub fn new(config: GovernorConfig) -> Self {
        let state = GovernorState {
            level: PerformanceLevel::Full,
            samples: VecDeque::with_capacity(config.max_samples),
            violations: VecDeque::new(),
            recent_context: VecDeque::new(),
            total_samples: 0,
            total_violations: 0,
            last_recovery_check: Instant::now(),
        };
        Self {
            config,
            state: RwLock::new(state),
        }
    }

    /// Record one validation duration and run an evaluation cycle.
    ///
    /// At most one downgrade is applied per call.
    pub fn record_validation(&self, phase: &str, duration: Duration) {
        metrics::histogram!("validation_duration_seconds").record(duration.as_secs_f64());

        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        state.samples.push_back(duration);
        while state.samples.len() > self.config.max_samples {
            state.samples.pop_front();
        }
        state.total_samples += 1;

        state
            .recent_context
            .push_back((phase.to_string(), duration_ms(duration)));
        while state.recent_context.len() > 5 {
            state.recent_context.pop_front();
        }

        let violated = duration > self.config.budget;
        if violated {
            state.violations.push_back(Instant::now());
            state.total_violations += 1;
            metrics::counter!("validation_budget_violations_total").increment(1);
            warn!(
                phase,
                duration_ms = duration_ms(duration),
                budget_ms = duration_ms(self.config.budget),
                recent = ?state.recent_context,
                "validation exceeded latency budget"
            );
        }

        // Recent violations are evaluated against wall-clock time at the
        // moment of the check.
        let window = self.config.violation_window;
        while state
            .violations
            .front()
            .is_some_and(|at| at.elapsed() > window)
        {
            state.violations.pop_front();
        }
        let recent = state.violations.len();

        let mut downgraded = false;
        if violated {
            if recent >= 3 {
                downgraded = self.apply_downgrade(&mut state, 2, "repeated violations");
            } else if recent == 1 && state.level == PerformanceLevel::Full {
                downgraded = self.apply_downgrade(&mut state, 1, "first violation");
            }
        }

        // Leading indicator: degrade before violations accumulate.
        if !downgraded
            && state.samples.len() >= self.config.min_samples_for_average
            && rolling_average(&state.samples)
                > self.config.budget.as_secs_f64() * self.config.proactive_threshold
        {
            self.apply_downgrade(&mut state, 1, "rolling average above threshold");
        }
    }

    /// Periodic recovery check; a no-op until the recovery interval has
    /// elapsed since the last evaluation.
    pub fn maybe_recover(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if state.last_recovery_check.elapsed() < self.config.recovery_interval {
            return;
        }
        state.last_recovery_check = Instant::now();

        if state.level == PerformanceLevel::Full {
            return;
        }

        let average = rolling_average(&state.samples);
        if average < self.config.budget.as_secs_f64() * self.config.recovery_threshold {
            let from = state.level;
            state.level = state.level.upgraded();
            info!(
                from = %from,
                to = %state.level,
                average_ms = average * 1000.0,
                "performance level recovered one step"
            );
        }
    }

    /// Currently published feature flags.
    #[must_use]
    pub fn flags(&self) -> FeatureFlags {
        FeatureFlags::for_level(self.level())
    }

    /// Current level.
    #[must_use]
    pub fn level(&self) -> PerformanceLevel {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .level
    }

    /// Current reporting mode.
    #[must_use]
    pub fn mode(&self) -> PerformanceMode {
        self.level().mode()
    }

    /// Full report for reconciliation and dashboards.
    #[must_use]
    pub fn report(&self) -> GovernorReport {
        let state = self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let window = self.config.violation_window;
        let recent = state
            .violations
            .iter()
            .filter(|at| at.elapsed() <= window)
            .count();

        GovernorReport {
            level: state.level,
            mode: state.level.mode(),
            budget_ms: duration_ms(self.config.budget),
            total_samples: state.total_samples,
            total_violations: state.total_violations,
            recent_violations: recent,
            rolling_average_ms: rolling_average(&state.samples) * 1000.0,
            flags: FeatureFlags::for_level(state.level),
        }
    }

    /// Spawn the periodic recovery task.
    ///
    /// The returned handle owns the task's active flag; the loop exits at
    /// its next tick after [`GovernorTask::stop`].
    #[must_use]
    pub fn spawn_recovery_task(self: &Arc<Self>) -> GovernorTask {
        let governor = Arc::clone(self);
        let active = Arc::new(AtomicBool::new(true));
        let task_active = Arc::clone(&active);
        let interval = governor.config.recovery_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !task_active.load(Ordering::Relaxed) {
                    break;
                }
                governor.maybe_recover();
            }
        });

        GovernorTask { active, handle }
    }

    fn apply_downgrade(
        &self,
        state: &mut GovernorState,
        steps: u32,
        reason: &'static str,
    ) -> bool {
        let from = state.level;
        state.level = state.level.downgraded(steps);
        if state.level != from {
            metrics::counter!("governor_downgrades_total").increment(1);
            warn!(from = %from, to = %state.level, reason, "performance level downgraded");
        } else if !FeatureFlags::for_level(state.level).suppress_verbose_logging {
            debug!(level = %state.level, reason, "downgrade requested at floor");
        }
        true
    }
}

impl Default for PerformanceGovernor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

/// Handle for the spawned recovery loop.
#[derive(Debug)]
pub struct GovernorTask {
    active: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl GovernorTask {
    /// Ask the loop to exit at its next tick.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    /// Abort the underlying task immediately.
    pub fn abort(self) {
        self.handle.abort();
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Average sample duration in seconds; zero for an empty ring.
fn rolling_average(samples: &VecDeque<Duration>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(Duration::as_secs_f64).sum::<f64>() / samples.len() as f64
}
