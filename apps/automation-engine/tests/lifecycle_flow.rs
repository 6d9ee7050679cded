//! End-to-end lifecycle scenario against a scripted page.
//!
//! Drives the full path: pre-submission validation, registration,
//! submission monitoring, status polling to a terminal state, and
//! snapshot restore.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;

use automation_engine::classification::ErrorTaxonomy;
use automation_engine::events::EventBus;
use automation_engine::governor::{GovernorConfig, PerformanceGovernor};
use automation_engine::persistence::{EngineSnapshot, SnapshotStore};
use automation_engine::ports::{PermissiveSizing, UiQueryPort};
use automation_engine::resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, RecoveryPolicy, ResilienceController,
};
use automation_engine::tracker::{
    MarketHoursConfig, OrderIntent, OrderKind, OrderLifecycleTracker, OrderSide, OrderStatus,
    PageSelectors, TrackerConfig,
};

// ============================================================================
// Scripted page
// ============================================================================

/// Mutable page state the test scripts while the engine runs.
#[derive(Default)]
struct FakePage {
    ready: AtomicBool,
    confirmation: AtomicBool,
    error_message: Mutex<Option<String>>,
    order_table: Mutex<Vec<HashMap<String, String>>>,
}

impl FakePage {
    fn set_order_row(&self, client_id: &str, status: &str) {
        let mut row = HashMap::new();
        row.insert("id".to_string(), client_id.to_string());
        row.insert("symbol".to_string(), "NQ".to_string());
        row.insert("side".to_string(), "BUY".to_string());
        row.insert("quantity".to_string(), "1".to_string());
        row.insert("price".to_string(), "19000".to_string());
        row.insert("status".to_string(), status.to_string());

        let mut table = self.order_table.lock().unwrap();
        table.retain(|r| r.get("id").map(String::as_str) != Some(client_id));
        table.push(row);
    }
}

struct FakeUi {
    page: Arc<FakePage>,
    selectors: PageSelectors,
}

#[async_trait]
impl UiQueryPort for FakeUi {
    async fn element_exists(&self, selector: &str) -> bool {
        if selector == self.selectors.confirmation_banner {
            return self.page.confirmation.load(Ordering::Relaxed);
        }
        if selector == self.selectors.error_banner
            || self.selectors.extra_error_regions.iter().any(|r| r == selector)
        {
            return self.page.error_message.lock().unwrap().is_some();
        }
        self.page.ready.load(Ordering::Relaxed)
    }

    async fn element_visible(&self, selector: &str) -> bool {
        self.element_exists(selector).await
    }

    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if self.element_exists(selector).await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    async fn read_table(&self, selector: &str) -> Vec<HashMap<String, String>> {
        if selector == self.selectors.order_table {
            return self.page.order_table.lock().unwrap().clone();
        }
        if selector == self.selectors.error_banner {
            return self
                .page
                .error_message
                .lock()
                .unwrap()
                .clone()
                .map(|message| {
                    let mut row = HashMap::new();
                    row.insert("message".to_string(), message);
                    vec![row]
                })
                .unwrap_or_default();
        }
        Vec::new()
    }
}

// ============================================================================
// Harness
// ============================================================================

fn fast_tracker_config() -> TrackerConfig {
    TrackerConfig {
        submission_timeout: Duration::from_secs(2),
        confirmation_poll: Duration::from_millis(20),
        poll_interval: Duration::from_millis(30),
        widened_poll_interval: Duration::from_millis(60),
        poll_error_backoff: 2,
        retention: Duration::from_secs(3600),
        table_id_field: "id".to_string(),
        table_status_field: "status".to_string(),
        market_hours: MarketHoursConfig {
            enabled: false,
            ..MarketHoursConfig::default()
        },
    }
}

fn build_tracker(
    page: &Arc<FakePage>,
    snapshots: Option<SnapshotStore>,
) -> OrderLifecycleTracker {
    let selectors = PageSelectors::default();
    let taxonomy = Arc::new(ErrorTaxonomy::standard());
    let governor = Arc::new(PerformanceGovernor::new(GovernorConfig::default()));
    let resilience = Arc::new(ResilienceController::new(
        Arc::clone(&taxonomy),
        CircuitBreakerRegistry::new(CircuitBreakerConfig::default()),
        Vec::new(),
        RecoveryPolicy {
            max_retries: 1,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(2),
            jitter: false,
        },
    ));
    let ui = Arc::new(FakeUi {
        page: Arc::clone(page),
        selectors: selectors.clone(),
    });

    OrderLifecycleTracker::new(
        fast_tracker_config(),
        selectors,
        governor,
        taxonomy,
        resilience,
        ui,
        Arc::new(PermissiveSizing),
        Arc::new(EventBus::new()),
        snapshots,
    )
}

fn nq_intent() -> OrderIntent {
    OrderIntent {
        kind: OrderKind::Limit,
        entry_price: Some(dec!(19000)),
        ..OrderIntent::market("NQ".to_string(), OrderSide::Buy, dec!(1))
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while std::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
    panic!("timed out waiting for {what}");
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn submit_monitor_fill_complete() {
    let page = Arc::new(FakePage::default());
    page.ready.store(true, Ordering::Relaxed);
    let tracker = build_tracker(&page, None);

    let seen_events = Arc::new(Mutex::new(Vec::<String>::new()));
    for kind in ["SUBMISSION_COMPLETED", "STATUS_CHANGE", "ORDER_COMPLETE"] {
        let seen = Arc::clone(&seen_events);
        tracker.events().subscribe(kind, move |event| {
            seen.lock().unwrap().push(event.kind.clone());
            Ok(())
        });
    }

    // Pre-submission validation passes and registers the order.
    let report = tracker.validate_pre_submission(&nq_intent()).await;
    assert!(report.valid, "unexpected errors: {:?}", report.errors);
    let order_id = report.order_id.expect("order id on success");

    let record = tracker.store().get(&order_id).expect("registered record");
    assert_eq!(record.status, OrderStatus::Validated);
    let client_id = record.client_id.clone();

    // The page confirms shortly after submission starts.
    {
        let page = Arc::clone(&page);
        let client_id = client_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            page.confirmation.store(true, Ordering::Relaxed);
            page.set_order_row(&client_id, "Working");
        });
    }

    let submission = tracker.monitor_submission(&order_id).await;
    assert!(submission.accepted, "submission failed: {:?}", submission.message);
    assert_eq!(
        tracker.store().get(&order_id).unwrap().status,
        OrderStatus::Submitted
    );

    // Post-submission verification sees a matching row.
    let post = tracker.validate_post_submission(&order_id).await;
    assert!(post.valid);
    assert!(
        post.warnings
            .iter()
            .all(|w| !w.starts_with("field mismatch")),
        "unexpected mismatches: {:?}",
        post.warnings
    );

    // Poll loop observes the fill and completes the order.
    page.set_order_row(&client_id, "Filled");
    wait_for("terminal status", || {
        tracker
            .store()
            .get(&order_id)
            .is_some_and(|o| o.status == OrderStatus::Filled)
    })
    .await;

    let record = tracker.store().get(&order_id).unwrap();
    assert!(record.completed_at.is_some());
    assert!(!record.tracking.as_ref().unwrap().active, "polling must stop");
    assert!(
        record
            .events
            .iter()
            .any(|e| e.kind.as_str() == "ORDER_COMPLETE")
    );

    // Bus saw the full sequence.
    wait_for("ORDER_COMPLETE on the bus", || {
        seen_events
            .lock()
            .unwrap()
            .iter()
            .any(|k| k == "ORDER_COMPLETE")
    })
    .await;
    let seen = seen_events.lock().unwrap().clone();
    assert!(seen.contains(&"SUBMISSION_COMPLETED".to_string()));
    assert!(seen.contains(&"STATUS_CHANGE".to_string()));
}

#[tokio::test]
async fn detected_error_fails_submission() {
    let page = Arc::new(FakePage::default());
    page.ready.store(true, Ordering::Relaxed);
    let tracker = build_tracker(&page, None);

    let report = tracker.validate_pre_submission(&nq_intent()).await;
    let order_id = report.order_id.expect("order id");

    *page.error_message.lock().unwrap() =
        Some("Order rejected: insufficient buying power".to_string());

    let submission = tracker.monitor_submission(&order_id).await;
    assert!(!submission.accepted);
    let classification = submission.classification.expect("classification");
    assert_eq!(classification.rule, Some("insufficient-funds"));
    assert_eq!(
        tracker.store().get(&order_id).unwrap().status,
        OrderStatus::Failed
    );
}

#[tokio::test]
async fn submission_times_out_without_confirmation() {
    let page = Arc::new(FakePage::default());
    page.ready.store(true, Ordering::Relaxed);
    let tracker = build_tracker(&page, None);

    let report = tracker.validate_pre_submission(&nq_intent()).await;
    let order_id = report.order_id.expect("order id");

    // Nothing ever appears on the page.
    let submission = tracker.monitor_submission(&order_id).await;
    assert!(!submission.accepted);
    assert!(submission.duration >= Duration::from_secs(2));
    assert_eq!(
        tracker.store().get(&order_id).unwrap().status,
        OrderStatus::Failed
    );
}

#[tokio::test]
async fn invalid_intent_is_rejected_without_registration() {
    let page = Arc::new(FakePage::default());
    page.ready.store(true, Ordering::Relaxed);
    let tracker = build_tracker(&page, None);

    let intent = OrderIntent::market("NQ".to_string(), OrderSide::Buy, dec!(0));
    let report = tracker.validate_pre_submission(&intent).await;
    assert!(!report.valid);
    assert!(report.order_id.is_none());
    assert_eq!(tracker.store().count(), 0);
}

#[tokio::test]
async fn snapshot_round_trip_preserves_recent_orders() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path(), "lifecycle-test");

    let page = Arc::new(FakePage::default());
    page.ready.store(true, Ordering::Relaxed);
    let tracker = build_tracker(&page, Some(store.clone()));

    let report = tracker.validate_pre_submission(&nq_intent()).await;
    let order_id = report.order_id.expect("order id");

    // Age one persisted order past the retention window by hand.
    let mut snapshot = store.load().await;
    assert_eq!(snapshot.orders.len(), 1);
    let mut stale = snapshot.orders[0].clone();
    stale.id = "ord-stale".to_string();
    stale.client_id = "cli-stale".to_string();
    stale.created_at = chrono::Utc::now() - chrono::Duration::hours(2);
    snapshot.orders.push(stale);
    store.save(&snapshot).await.unwrap();

    // A fresh engine restores only the entries inside the window.
    let restored_tracker = build_tracker(&page, Some(store));
    let restored = restored_tracker.restore_from_snapshot().await;
    assert_eq!(restored, 1);
    assert!(restored_tracker.store().contains(&order_id));
    assert!(!restored_tracker.store().contains("ord-stale"));
}

#[tokio::test]
async fn corrupt_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path(), "corrupt-test");
    tokio::fs::write(store.path(), b"garbage").await.unwrap();

    let page = Arc::new(FakePage::default());
    let tracker = build_tracker(&page, Some(store));
    assert_eq!(tracker.restore_from_snapshot().await, 0);
    assert_eq!(tracker.store().count(), 0);
}

#[tokio::test]
async fn empty_snapshot_type_is_well_formed() {
    let snapshot = EngineSnapshot::empty();
    assert!(snapshot.orders.is_empty());
    assert_eq!(snapshot.performance.total_validations, 0);
}
