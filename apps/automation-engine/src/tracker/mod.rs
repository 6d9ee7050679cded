//! Order lifecycle tracking.

pub mod engine;
pub mod order;
pub mod store;

pub use engine::{
    MarketHoursConfig, OrderLifecycleTracker, PageSelectors, SubmissionResult, TrackerConfig,
    ValidationIssue, ValidationIssueKind, ValidationReport,
};
pub use order::{
    LifecycleEvent, LifecycleEventKind, OrderIntent, OrderKind, OrderRecord, OrderSide,
    OrderStatus, StatusTracking, ValidationOutcome, ValidationPhase,
};
pub use store::{OrderStore, new_client_id, new_order_id};
