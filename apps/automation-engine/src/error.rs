//! Error types shared across the automation engine.
//!
//! Operational failures are represented as [`AutomationError`] and flow
//! through the resilience controller, which classifies them and decides
//! whether to retry, recover, or re-raise. Validation-phase problems are
//! never raised as errors: validation always returns a well-formed report.

use thiserror::Error;

/// Failure raised by an automated page operation.
#[derive(Debug, Clone, Error)]
pub enum AutomationError {
    /// The circuit breaker for this operation is open.
    #[error("circuit open for operation '{operation}', retry after {retry_after_ms} ms")]
    CircuitOpen {
        /// Operation name the breaker guards.
        operation: String,
        /// Remaining cooldown in milliseconds.
        retry_after_ms: u64,
    },

    /// The operation did not complete within its deadline.
    #[error("operation '{operation}' timed out after {timeout_ms} ms")]
    Timeout {
        /// Operation name.
        operation: String,
        /// Configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Raw failure text observed on the page or reported by a collaborator.
    #[error("{0}")]
    Page(String),

    /// A tracked order was not found in the store.
    #[error("order {0} not found")]
    OrderNotFound(String),

    /// An order status transition outside the allowed lifecycle path.
    #[error("invalid status transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        /// Order identifier.
        order_id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },
}

impl AutomationError {
    /// Failure text used for classification.
    ///
    /// For page-sourced failures this is the raw scraped message; for
    /// engine-raised failures it is the rendered error.
    #[must_use]
    pub fn classification_text(&self) -> String {
        match self {
            Self::Page(text) => text.clone(),
            other => other.to_string(),
        }
    }
}
