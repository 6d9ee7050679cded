//! Resilience layer: circuit breaking and retry/recovery orchestration.

pub mod circuit_breaker;
pub mod recovery;

pub use circuit_breaker::{
    BreakerMetrics, CallDecision, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};
pub use recovery::{
    AwaitConnectivity, HaltSevereFailures, RecoveryContext, RecoveryDirective, RecoveryPolicy,
    RecoveryStrategy, ResilienceController, ThrottleBackoff, default_strategies,
};
