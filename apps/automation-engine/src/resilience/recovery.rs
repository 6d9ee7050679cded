//! Retry and recovery orchestration.
//!
//! [`ResilienceController::execute_with_recovery`] wraps a page operation
//! with the full recovery discipline: circuit-breaker gating, failure
//! classification, first-match strategy dispatch, and exponential backoff.
//! Exhausting every attempt re-raises the last error; the controller never
//! swallows a terminal failure silently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::classification::{Classification, ErrorTaxonomy, RecoveryKey};
use crate::error::AutomationError;
use crate::ports::UiQueryPort;

use super::circuit_breaker::{CallDecision, CircuitBreakerRegistry};

// ============================================================================
// Policy / context
// ============================================================================

/// Retry policy for the controller.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Retries after the first attempt (`max_retries + 1` attempts total).
    pub max_retries: u32,
    /// Base backoff delay; attempt `n` waits `base * 2^(n-1)`, capped.
    pub backoff_base: Duration,
    /// Upper bound on a single backoff delay.
    pub backoff_cap: Duration,
    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(250),
            backoff_cap: Duration::from_secs(5),
            jitter: true,
        }
    }
}

/// Context handed to recovery strategies.
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    /// Operation name (also the circuit-breaker key).
    pub operation: String,
    /// Order the operation concerns, when known.
    pub order_id: Option<String>,
    /// 1-based attempt number that just failed.
    pub attempt: u32,
    /// Classification of the failure.
    pub classification: Classification,
}

/// What a strategy did about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDirective {
    /// The strategy fully resolved the condition; retry immediately and
    /// count a successful recovery.
    Resolved,
    /// Mitigation was applied; fall through to the controller's backoff
    /// before the next attempt.
    Mitigated,
    /// Do not retry this class of failure; re-raise now.
    Halt,
}

/// A pluggable recovery strategy.
///
/// Strategies are registered in order and the first whose predicate accepts
/// the classification wins.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Stable identifier for logs and reports.
    fn id(&self) -> &'static str;

    /// Whether this strategy handles the classified failure.
    fn applies(&self, classification: &Classification) -> bool;

    /// Attempt recovery.
    async fn run(&self, ctx: &RecoveryContext) -> RecoveryDirective;
}

// ============================================================================
// Built-in strategies
// ============================================================================

/// Halts retries for high and critical severity classifications
/// (account locked, daily loss limit, ...) instead of retrying blindly.
#[derive(Debug, Clone, Default)]
pub struct HaltSevereFailures;

#[async_trait]
impl RecoveryStrategy for HaltSevereFailures {
    fn id(&self) -> &'static str {
        "halt-severe"
    }

    fn applies(&self, classification: &Classification) -> bool {
        classification.severity.halts_retries()
    }

    async fn run(&self, ctx: &RecoveryContext) -> RecoveryDirective {
        warn!(
            operation = %ctx.operation,
            severity = %ctx.classification.severity,
            rule = ctx.classification.rule.unwrap_or("unknown"),
            "severe failure, halting retries"
        );
        RecoveryDirective::Halt
    }
}

/// Waits for the host application to become reachable again by polling a
/// configured readiness element.
pub struct AwaitConnectivity {
    ui: Arc<dyn UiQueryPort>,
    ready_selector: String,
    wait: Duration,
}

impl AwaitConnectivity {
    /// Create the strategy around a readiness selector.
    #[must_use]
    pub fn new(ui: Arc<dyn UiQueryPort>, ready_selector: String, wait: Duration) -> Self {
        Self {
            ui,
            ready_selector,
            wait,
        }
    }
}

#[async_trait]
impl RecoveryStrategy for AwaitConnectivity {
    fn id(&self) -> &'static str {
        "await-connectivity"
    }

    fn applies(&self, classification: &Classification) -> bool {
        classification.recovery == RecoveryKey::AwaitConnectivity
    }

    async fn run(&self, ctx: &RecoveryContext) -> RecoveryDirective {
        let restored = self.ui.wait_for_element(&self.ready_selector, self.wait).await;
        if restored {
            debug!(operation = %ctx.operation, "connectivity restored");
            RecoveryDirective::Resolved
        } else {
            RecoveryDirective::Mitigated
        }
    }
}

/// Sleeps through host throttling before falling back to normal backoff.
#[derive(Debug, Clone)]
pub struct ThrottleBackoff {
    delay: Duration,
}

impl ThrottleBackoff {
    /// Create the strategy with a fixed throttle delay.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for ThrottleBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl RecoveryStrategy for ThrottleBackoff {
    fn id(&self) -> &'static str {
        "throttle-backoff"
    }

    fn applies(&self, classification: &Classification) -> bool {
        classification.recovery == RecoveryKey::ThrottleRequests
    }

    async fn run(&self, ctx: &RecoveryContext) -> RecoveryDirective {
        debug!(operation = %ctx.operation, "throttled by host, slowing down");
        tokio::time::sleep(self.delay).await;
        RecoveryDirective::Mitigated
    }
}

/// The default strategy stack: severity halt first, then connectivity and
/// throttle mitigation.
#[must_use]
pub fn default_strategies(
    ui: Arc<dyn UiQueryPort>,
    ready_selector: String,
) -> Vec<Arc<dyn RecoveryStrategy>> {
    vec![
        Arc::new(HaltSevereFailures),
        Arc::new(AwaitConnectivity::new(
            ui,
            ready_selector,
            Duration::from_secs(10),
        )),
        Arc::new(ThrottleBackoff::default()),
    ]
}

// ============================================================================
// Controller
// ============================================================================

/// Executes page operations under retry, backoff, and circuit breaking.
pub struct ResilienceController {
    taxonomy: Arc<ErrorTaxonomy>,
    breakers: CircuitBreakerRegistry,
    strategies: Vec<Arc<dyn RecoveryStrategy>>,
    policy: RecoveryPolicy,
}

impl ResilienceController {
    /// Create a controller with explicit collaborators.
    #[must_use]
    pub fn new(
        taxonomy: Arc<ErrorTaxonomy>,
        breakers: CircuitBreakerRegistry,
        strategies: Vec<Arc<dyn RecoveryStrategy>>,
        policy: RecoveryPolicy,
    ) -> Self {
        Self {
            taxonomy,
            breakers,
            strategies,
            policy,
        }
    }

    /// Execute `operation` with the full recovery discipline.
    ///
    /// The named circuit breaker is consulted first: an open circuit fails
    /// immediately without invoking the operation. Otherwise the operation
    /// runs up to `max_retries + 1` times; each failure is classified,
    /// offered to the first matching strategy, and retried after backoff
    /// unless the strategy resolved or halted it.
    ///
    /// # Errors
    ///
    /// Returns [`AutomationError::CircuitOpen`] when the breaker rejects the
    /// call, or the last operation error once every attempt is exhausted.
    pub async fn execute_with_recovery<T, F, Fut>(
        &self,
        operation: &str,
        order_id: Option<&str>,
        mut op: F,
    ) -> Result<T, AutomationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AutomationError>>,
    {
        match self.breakers.check(operation) {
            CallDecision::Reject { retry_after } => {
                metrics::counter!("operations_rejected_total").increment(1);
                return Err(AutomationError::CircuitOpen {
                    operation: operation.to_string(),
                    retry_after_ms: retry_after.as_millis() as u64,
                });
            }
            CallDecision::Trial => {
                debug!(operation, "executing half-open trial");
            }
            CallDecision::Allow => {}
        }

        let total_attempts = self.policy.max_retries + 1;
        let mut last_error: Option<AutomationError> = None;

        for attempt in 1..=total_attempts {
            match op().await {
                Ok(value) => {
                    self.breakers.record_success(operation);
                    if attempt > 1 {
                        metrics::counter!("operations_recovered_total").increment(1);
                        debug!(operation, attempt, "operation recovered");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    self.breakers.record_failure(operation);
                    metrics::counter!("operation_failures_total").increment(1);

                    let classification =
                        self.taxonomy.classify(Some(&err.classification_text()));
                    warn!(
                        operation,
                        attempt,
                        category = %classification.category,
                        severity = %classification.severity,
                        error = %err,
                        "operation failed"
                    );

                    if attempt == total_attempts {
                        last_error = Some(err);
                        break;
                    }

                    let ctx = RecoveryContext {
                        operation: operation.to_string(),
                        order_id: order_id.map(String::from),
                        attempt,
                        classification: classification.clone(),
                    };

                    match self.dispatch_strategy(&ctx).await {
                        Some(RecoveryDirective::Resolved) => continue,
                        Some(RecoveryDirective::Halt) => return Err(err),
                        Some(RecoveryDirective::Mitigated) | None => {
                            tokio::time::sleep(self.backoff_delay(attempt)).await;
                        }
                    }
                }
            }
        }

        // Exhausted: re-raise the last error.
        Err(last_error.unwrap_or_else(|| AutomationError::Page("operation failed".to_string())))
    }

    /// First-match dispatch over the ordered strategy registry.
    async fn dispatch_strategy(&self, ctx: &RecoveryContext) -> Option<RecoveryDirective> {
        let strategy = self
            .strategies
            .iter()
            .find(|s| s.applies(&ctx.classification))?;

        debug!(
            operation = %ctx.operation,
            strategy = strategy.id(),
            "dispatching recovery strategy"
        );
        let directive = strategy.run(ctx).await;
        metrics::counter!("recovery_strategy_runs_total").increment(1);
        Some(directive)
    }

    /// Exponential backoff with optional jitter: `base * 2^(attempt-1)`,
    /// capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self
            .policy
            .backoff_base
            .saturating_mul(2u32.saturating_pow(exp));
        let capped = raw.min(self.policy.backoff_cap);

        if self.policy.jitter && !capped.is_zero() {
            let jitter_ms = rand::rng().random_range(0..=capped.as_millis() as u64 / 10);
            capped + Duration::from_millis(jitter_ms)
        } else {
            capped
        }
    }

    /// Circuit breaker state access for reporting.
    #[must_use]
    pub const fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn controller(policy: RecoveryPolicy) -> ResilienceController {
        controller_with(policy, CircuitBreakerConfig::default(), Vec::new())
    }

    fn controller_with(
        policy: RecoveryPolicy,
        breaker_config: CircuitBreakerConfig,
        strategies: Vec<Arc<dyn RecoveryStrategy>>,
    ) -> ResilienceController {
        ResilienceController::new(
            Arc::new(ErrorTaxonomy::standard()),
            CircuitBreakerRegistry::new(breaker_config),
            strategies,
            policy,
        )
    }

    fn fast_policy(max_retries: u32) -> RecoveryPolicy {
        RecoveryPolicy {
            max_retries,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(2),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let c = controller(fast_policy(3));
        let result: Result<u32, _> = c
            .execute_with_recovery("op", None, || async { Ok(7) })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn fails_then_succeeds_resets_breaker() {
        let c = controller(fast_policy(3));
        let calls = AtomicU32::new(0);

        let result = c
            .execute_with_recovery("op", None, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(AutomationError::Page("network error".to_string()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(c.breakers().state("op"), CircuitState::Closed);
        assert_eq!(c.breakers().consecutive_failures("op"), 0);
    }

    #[tokio::test]
    async fn exhaustion_reraises_last_error() {
        let c = controller(fast_policy(2));
        let result: Result<(), _> = c
            .execute_with_recovery("op", None, || async {
                Err(AutomationError::Page("network error".to_string()))
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, AutomationError::Page(_)));
        assert_eq!(c.breakers().consecutive_failures("op"), 3);
    }

    #[tokio::test]
    async fn open_circuit_rejects_without_invoking() {
        let c = controller_with(
            fast_policy(0),
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_secs(60),
            },
            Vec::new(),
        );

        // Trip the breaker.
        let _ = c
            .execute_with_recovery::<(), _, _>("op", None, || async {
                Err(AutomationError::Page("network error".to_string()))
            })
            .await;

        let calls = AtomicU32::new(0);
        let result: Result<(), _> = c
            .execute_with_recovery("op", None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            AutomationError::CircuitOpen { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn half_open_trial_after_cooldown() {
        let c = controller_with(
            fast_policy(0),
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(20),
            },
            Vec::new(),
        );

        let _ = c
            .execute_with_recovery::<(), _, _>("op", None, || async {
                Err(AutomationError::Page("network error".to_string()))
            })
            .await;
        assert_eq!(c.breakers().state("op"), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        // Cooldown elapsed: exactly one trial runs and closes the breaker.
        let result = c
            .execute_with_recovery("op", None, || async { Ok(1) })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(c.breakers().state("op"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn severe_classification_halts_retries() {
        let c = controller_with(
            fast_policy(5),
            CircuitBreakerConfig::default(),
            vec![Arc::new(HaltSevereFailures)],
        );
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = c
            .execute_with_recovery("op", None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AutomationError::Page("Account locked".to_string())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolved_strategy_retries_immediately() {
        struct AlwaysResolve;

        #[async_trait]
        impl RecoveryStrategy for AlwaysResolve {
            fn id(&self) -> &'static str {
                "always-resolve"
            }
            fn applies(&self, _c: &Classification) -> bool {
                true
            }
            async fn run(&self, _ctx: &RecoveryContext) -> RecoveryDirective {
                RecoveryDirective::Resolved
            }
        }

        let c = controller_with(
            fast_policy(1),
            CircuitBreakerConfig::default(),
            vec![Arc::new(AlwaysResolve)],
        );
        let calls = AtomicU32::new(0);

        let result = c
            .execute_with_recovery("op", None, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(AutomationError::Page("no liquidity".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn first_matching_strategy_wins() {
        struct Tagged(&'static str, RecoveryDirective);

        #[async_trait]
        impl RecoveryStrategy for Tagged {
            fn id(&self) -> &'static str {
                self.0
            }
            fn applies(&self, _c: &Classification) -> bool {
                true
            }
            async fn run(&self, _ctx: &RecoveryContext) -> RecoveryDirective {
                self.1
            }
        }

        // The first (Halt) wins over the later (Resolved).
        let c = controller_with(
            fast_policy(3),
            CircuitBreakerConfig::default(),
            vec![
                Arc::new(Tagged("first", RecoveryDirective::Halt)),
                Arc::new(Tagged("second", RecoveryDirective::Resolved)),
            ],
        );
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = c
            .execute_with_recovery("op", None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AutomationError::Page("no liquidity".to_string())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_stack_dispatch_order() {
        let taxonomy = ErrorTaxonomy::standard();
        let strategies =
            default_strategies(Arc::new(crate::ports::NullUi), "#workspace".to_string());

        // Severity halt shadows everything it applies to.
        let locked = taxonomy.classify(Some("account locked"));
        let first = strategies.iter().find(|s| s.applies(&locked)).unwrap();
        assert_eq!(first.id(), "halt-severe");

        // Connectivity failures route to the connectivity waiter.
        let dropped = taxonomy.classify(Some("connection lost"));
        let first = strategies.iter().find(|s| s.applies(&dropped)).unwrap();
        assert_eq!(first.id(), "await-connectivity");

        // Throttling routes to the throttle strategy.
        let throttled = taxonomy.classify(Some("too many requests"));
        let first = strategies.iter().find(|s| s.applies(&throttled)).unwrap();
        assert_eq!(first.id(), "throttle-backoff");

        // Plain transient failures match nothing and fall back to backoff.
        let transient = taxonomy.classify(Some("no liquidity"));
        assert!(strategies.iter().all(|s| !s.applies(&transient)));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let c = controller(RecoveryPolicy {
            max_retries: 5,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_millis(500),
            jitter: false,
        });

        assert_eq!(c.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(c.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(c.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(c.backoff_delay(4), Duration::from_millis(500));
        assert_eq!(c.backoff_delay(10), Duration::from_millis(500));
    }
}
