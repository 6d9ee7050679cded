//! Order records, statuses, and lifecycle events.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AutomationError;

// ============================================================================
// Side / Kind
// ============================================================================

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy / long entry.
    Buy,
    /// Sell / short entry or exit.
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order kind as entered on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// Market order.
    Market,
    /// Limit order.
    Limit,
    /// Stop order.
    Stop,
    /// Stop-limit order.
    StopLimit,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
            Self::Stop => write!(f, "STOP"),
            Self::StopLimit => write!(f, "STOP_LIMIT"),
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Order status along the tracked lifecycle.
///
/// The submission machine is `VALIDATED -> SUBMITTING -> {SUBMITTED, FAILED}`.
/// Once submitted, the poll loop advances through observed statuses until a
/// terminal one is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Pre-submission validation passed; record registered.
    Validated,
    /// Submission in flight, awaiting confirmation.
    Submitting,
    /// Confirmation observed; status polling active.
    Submitted,
    /// Working at the host (observed).
    Working,
    /// Partially filled (observed).
    PartiallyFilled,
    /// Completely filled (terminal).
    Filled,
    /// Cancelled (terminal).
    Cancelled,
    /// Rejected (terminal).
    Rejected,
    /// Expired (terminal).
    Expired,
    /// Submission failed before the order reached the host.
    Failed,
}

impl OrderStatus {
    /// Terminal set: no further transitions occur after reaching one.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    /// Whether the order is still moving through its lifecycle.
    ///
    /// `Failed` orders are not active: they never reached the host and are
    /// swept like terminal orders.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.is_terminal() && !matches!(self, Self::Failed)
    }

    /// Statuses the poll loop can observe and keep polling from.
    #[must_use]
    pub const fn is_pollable(&self) -> bool {
        matches!(self, Self::Submitted | Self::Working | Self::PartiallyFilled)
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Validated => matches!(next, Self::Submitting),
            Self::Submitting => matches!(next, Self::Submitted | Self::Failed),
            Self::Submitted => matches!(
                next,
                Self::Working
                    | Self::PartiallyFilled
                    | Self::Filled
                    | Self::Cancelled
                    | Self::Rejected
                    | Self::Expired
            ),
            Self::Working => matches!(
                next,
                Self::PartiallyFilled
                    | Self::Filled
                    | Self::Cancelled
                    | Self::Rejected
                    | Self::Expired
            ),
            Self::PartiallyFilled => matches!(
                next,
                Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
            ),
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired | Self::Failed => {
                false
            }
        }
    }

    /// Map a status string observed in the host's order table.
    ///
    /// Returns `None` for unrecognized text; the poll loop treats that as
    /// "unchanged" rather than failing.
    #[must_use]
    pub fn from_observed(text: &str) -> Option<Self> {
        let normalized = text.trim().to_lowercase();
        match normalized.as_str() {
            "working" | "accepted" | "open" | "pending" => Some(Self::Working),
            "partially filled" | "partial" | "part filled" => Some(Self::PartiallyFilled),
            "filled" | "complete" | "completed" => Some(Self::Filled),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validated => "VALIDATED",
            Self::Submitting => "SUBMITTING",
            Self::Submitted => "SUBMITTED",
            Self::Working => "WORKING",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
            Self::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Intent
// ============================================================================

/// An order as the caller intends to place it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Instrument symbol as shown on the page.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Quantity (contracts/shares).
    pub quantity: Decimal,
    /// Kind.
    pub kind: OrderKind,
    /// Entry price (limit/stop-limit orders).
    pub entry_price: Option<Decimal>,
    /// Protective stop price.
    pub stop_price: Option<Decimal>,
    /// Profit target price.
    pub target_price: Option<Decimal>,
    /// Bracket group this order belongs to, if any.
    pub bracket_group_id: Option<String>,
    /// Parent order id; present marks this as a child exit leg.
    pub parent_order_id: Option<String>,
    /// Caller-supplied client identifier.
    pub client_id: Option<String>,
}

impl OrderIntent {
    /// Minimal intent for a plain market order.
    #[must_use]
    pub const fn market(symbol: String, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol,
            side,
            quantity,
            kind: OrderKind::Market,
            entry_price: None,
            stop_price: None,
            target_price: None,
            bracket_group_id: None,
            parent_order_id: None,
            client_id: None,
        }
    }

    /// Whether this intent is a child exit leg of a bracket.
    #[must_use]
    pub const fn is_child(&self) -> bool {
        self.parent_order_id.is_some()
    }
}

// ============================================================================
// Lifecycle events
// ============================================================================

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEventKind {
    /// Submission began for the order.
    SubmissionStarted,
    /// Submission confirmed or failed; duration stamped.
    SubmissionCompleted,
    /// Observed status changed.
    StatusChange,
    /// Terminal status reached; polling stopped.
    OrderComplete,
    /// A failure was detected and classified.
    ErrorDetected,
    /// Every member of a bracket group reached a terminal status.
    BracketGroupComplete,
}

impl LifecycleEventKind {
    /// Stable event-type string used on the event bus.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SubmissionStarted => "SUBMISSION_STARTED",
            Self::SubmissionCompleted => "SUBMISSION_COMPLETED",
            Self::StatusChange => "STATUS_CHANGE",
            Self::OrderComplete => "ORDER_COMPLETE",
            Self::ErrorDetected => "ERROR_DETECTED",
            Self::BracketGroupComplete => "BRACKET_GROUP_COMPLETE",
        }
    }
}

impl std::fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable lifecycle event. Append-only per order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Event kind.
    pub kind: LifecycleEventKind,
    /// Wall-clock time the event was appended.
    pub at: DateTime<Utc>,
    /// Free-form payload.
    pub payload: serde_json::Value,
}

impl LifecycleEvent {
    /// Create an event stamped now.
    #[must_use]
    pub fn now(kind: LifecycleEventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            at: Utc::now(),
            payload,
        }
    }
}

// ============================================================================
// Status tracking sub-record
// ============================================================================

/// Poll-loop bookkeeping, present only once submission succeeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusTracking {
    /// Whether the poll loop should keep running. Clearing this flag is the
    /// only cancellation mechanism; the scheduled continuation is allowed to
    /// run once more as a no-op.
    pub active: bool,
    /// Number of polls performed.
    pub poll_count: u32,
    /// Last time the observed status was checked.
    pub last_check: Option<DateTime<Utc>>,
}

// ============================================================================
// Order record
// ============================================================================

/// A tracked order, created when pre-submission validation succeeds and
/// mutated by the tracker throughout its life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Opaque identifier (time + random derived).
    pub id: String,
    /// Client identifier.
    pub client_id: String,
    /// Identifier of the validation run that admitted this order.
    pub validation_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Quantity.
    pub quantity: Decimal,
    /// Kind.
    pub kind: OrderKind,
    /// Entry price, if priced.
    pub entry_price: Option<Decimal>,
    /// Stop price, if bracketed.
    pub stop_price: Option<Decimal>,
    /// Target price, if bracketed.
    pub target_price: Option<Decimal>,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Completion time, stamped when a terminal status is reached.
    pub completed_at: Option<DateTime<Utc>>,
    /// Bracket group membership.
    pub bracket_group_id: Option<String>,
    /// Parent order id; present marks this record as a child leg.
    pub parent_order_id: Option<String>,
    /// Append-only lifecycle events in real-time order.
    pub events: Vec<LifecycleEvent>,
    /// Past validation outcomes.
    pub validations: Vec<ValidationOutcome>,
    /// Poll-loop bookkeeping, present once submitted.
    pub tracking: Option<StatusTracking>,
}

impl OrderRecord {
    /// Build a record from an admitted intent.
    #[must_use]
    pub fn from_intent(id: String, client_id: String, validation_id: String, intent: &OrderIntent) -> Self {
        Self {
            id,
            client_id,
            validation_id,
            symbol: intent.symbol.clone(),
            side: intent.side,
            quantity: intent.quantity,
            kind: intent.kind,
            entry_price: intent.entry_price,
            stop_price: intent.stop_price,
            target_price: intent.target_price,
            status: OrderStatus::Validated,
            created_at: Utc::now(),
            completed_at: None,
            bracket_group_id: intent.bracket_group_id.clone(),
            parent_order_id: intent.parent_order_id.clone(),
            events: Vec::new(),
            validations: Vec::new(),
            tracking: None,
        }
    }

    /// Whether this record is a child exit leg.
    #[must_use]
    pub const fn is_child(&self) -> bool {
        self.parent_order_id.is_some()
    }

    /// Advance the status along the lifecycle path.
    ///
    /// # Errors
    ///
    /// Returns [`AutomationError::InvalidTransition`] when `next` is not a
    /// legal successor of the current status.
    pub fn transition(&mut self, next: OrderStatus) -> Result<(), AutomationError> {
        if !self.status.can_transition_to(next) {
            return Err(AutomationError::InvalidTransition {
                order_id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Append a lifecycle event stamped now.
    pub fn push_event(&mut self, kind: LifecycleEventKind, payload: serde_json::Value) {
        self.events.push(LifecycleEvent::now(kind, payload));
    }

    /// Age of the record relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

// ============================================================================
// Validation outcome (stored on the record)
// ============================================================================

/// Validation phase that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationPhase {
    /// Checks run before touching the page.
    PreSubmission,
    /// Submission monitoring.
    Submission,
    /// Checks run after submission confirmed.
    PostSubmission,
}

impl std::fmt::Display for ValidationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreSubmission => write!(f, "PRE_SUBMISSION"),
            Self::Submission => write!(f, "SUBMISSION"),
            Self::PostSubmission => write!(f, "POST_SUBMISSION"),
        }
    }
}

/// Outcome of one validation run, kept on the order record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Phase that ran.
    pub phase: ValidationPhase,
    /// Whether the phase passed.
    pub valid: bool,
    /// Blocking errors.
    pub errors: Vec<String>,
    /// Non-blocking warnings.
    pub warnings: Vec<String>,
    /// When the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record() -> OrderRecord {
        let intent = OrderIntent::market("NQ".to_string(), OrderSide::Buy, dec!(1));
        OrderRecord::from_intent(
            "ord-1".to_string(),
            "cli-1".to_string(),
            "val-1".to_string(),
            &intent,
        )
    }

    #[test]
    fn status_terminal_set() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
    }

    #[test]
    fn failed_is_not_active() {
        assert!(!OrderStatus::Failed.is_active());
        assert!(OrderStatus::Validated.is_active());
        assert!(OrderStatus::PartiallyFilled.is_active());
        assert!(!OrderStatus::Filled.is_active());
    }

    #[test]
    fn transition_follows_directed_path() {
        let mut r = record();
        assert_eq!(r.status, OrderStatus::Validated);
        r.transition(OrderStatus::Submitting).unwrap();
        r.transition(OrderStatus::Submitted).unwrap();
        r.transition(OrderStatus::Working).unwrap();
        r.transition(OrderStatus::Filled).unwrap();
        assert!(r.completed_at.is_some());
    }

    #[test]
    fn no_terminal_without_submitting() {
        // VALIDATED cannot jump to a terminal status.
        let mut r = record();
        assert!(r.transition(OrderStatus::Filled).is_err());
        assert!(r.transition(OrderStatus::Submitted).is_err());
    }

    #[test]
    fn terminal_is_absorbing() {
        let mut r = record();
        r.transition(OrderStatus::Submitting).unwrap();
        r.transition(OrderStatus::Submitted).unwrap();
        r.transition(OrderStatus::Cancelled).unwrap();
        assert!(r.transition(OrderStatus::Working).is_err());
        assert!(r.transition(OrderStatus::Filled).is_err());
    }

    #[test]
    fn failed_is_absorbing() {
        let mut r = record();
        r.transition(OrderStatus::Submitting).unwrap();
        r.transition(OrderStatus::Failed).unwrap();
        assert!(r.transition(OrderStatus::Submitted).is_err());
    }

    #[test]
    fn observed_status_parsing() {
        assert_eq!(
            OrderStatus::from_observed("Filled"),
            Some(OrderStatus::Filled)
        );
        assert_eq!(
            OrderStatus::from_observed("  working "),
            Some(OrderStatus::Working)
        );
        assert_eq!(
            OrderStatus::from_observed("Canceled"),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(OrderStatus::from_observed("???"), None);
    }

    #[test]
    fn events_append_in_order() {
        let mut r = record();
        r.push_event(LifecycleEventKind::StatusChange, serde_json::json!({"to": "WORKING"}));
        r.push_event(LifecycleEventKind::OrderComplete, serde_json::json!({}));
        assert_eq!(r.events.len(), 2);
        assert_eq!(r.events[0].kind, LifecycleEventKind::StatusChange);
        assert!(r.events[0].at <= r.events[1].at);
    }

    #[test]
    fn event_kind_strings() {
        assert_eq!(LifecycleEventKind::StatusChange.as_str(), "STATUS_CHANGE");
        assert_eq!(
            LifecycleEventKind::BracketGroupComplete.as_str(),
            "BRACKET_GROUP_COMPLETE"
        );
    }
}
