//! Order lifecycle tracker.
//!
//! Owns the order store and drives each order through pre-submission
//! validation, submission monitoring, post-submission verification, and the
//! status-poll loop. Every phase reads the governor's feature flags first
//! and reports its latency back, so validation overhead stays governed.
//!
//! Failure policy: validation phases never propagate faults. Any internal
//! error is captured into the returned report as a system-error issue and
//! the tracker keeps running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Datelike, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classification::{Classification, ErrorTaxonomy};
use crate::error::AutomationError;
use crate::events::{EventBus, EventEnvelope};
use crate::governor::PerformanceGovernor;
use crate::persistence::{EngineSnapshot, PerformanceCounters, SnapshotStore};
use crate::ports::{SizingPort, UiQueryPort};
use crate::resilience::ResilienceController;

use super::order::{
    LifecycleEventKind, OrderIntent, OrderKind, OrderRecord, OrderStatus, StatusTracking,
    ValidationOutcome, ValidationPhase,
};
use super::store::{OrderStore, new_client_id, new_order_id};

// ============================================================================
// Configuration
// ============================================================================

/// Page element selectors the tracker binds to.
///
/// The element-locating strategy for a given host page stays outside the
/// engine; hosts supply whatever selector syntax their [`UiQueryPort`]
/// understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSelectors {
    /// Order entry panel container.
    pub order_entry_panel: String,
    /// Submit button.
    pub submit_button: String,
    /// Quantity input.
    pub quantity_input: String,
    /// Submission confirmation banner.
    pub confirmation_banner: String,
    /// Primary error banner.
    pub error_banner: String,
    /// Additional error surfaces scanned when not in minimal-scan mode.
    pub extra_error_regions: Vec<String>,
    /// Order status table.
    pub order_table: String,
    /// Element whose presence indicates the host application is reachable.
    pub app_ready: String,
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self {
            order_entry_panel: "#order-entry".to_string(),
            submit_button: "#order-entry .submit".to_string(),
            quantity_input: "#order-entry .quantity".to_string(),
            confirmation_banner: ".order-confirmation".to_string(),
            error_banner: ".order-error".to_string(),
            extra_error_regions: vec![".notification-area .error".to_string()],
            order_table: "#orders-table".to_string(),
            app_ready: "#workspace".to_string(),
        }
    }
}

/// Market-hours advisory configuration (UTC session window).
#[derive(Debug, Clone)]
pub struct MarketHoursConfig {
    /// Whether the advisory runs at all.
    pub enabled: bool,
    /// Session open (UTC).
    pub open_utc: NaiveTime,
    /// Session close (UTC).
    pub close_utc: NaiveTime,
    /// Warn on weekends.
    pub weekdays_only: bool,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            open_utc: NaiveTime::from_hms_opt(13, 30, 0).unwrap_or(NaiveTime::MIN),
            close_utc: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or(NaiveTime::MIN),
            weekdays_only: true,
        }
    }
}

impl MarketHoursConfig {
    /// Advisory warning for the given instant, if any.
    #[must_use]
    pub fn advisory(&self, now: chrono::DateTime<Utc>) -> Option<String> {
        if !self.enabled {
            return None;
        }

        if self.weekdays_only {
            let weekday = now.weekday();
            if weekday == chrono::Weekday::Sat || weekday == chrono::Weekday::Sun {
                return Some("market closed: weekend".to_string());
            }
        }

        let time = now.time();
        let in_session = if self.open_utc <= self.close_utc {
            time >= self.open_utc && time < self.close_utc
        } else {
            // Session spans midnight.
            time >= self.open_utc || time < self.close_utc
        };

        if in_session {
            None
        } else {
            Some(format!(
                "outside regular trading hours ({} - {} UTC)",
                self.open_utc, self.close_utc
            ))
        }
    }
}

/// Tracker timing and retention configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Deadline for submission confirmation.
    pub submission_timeout: Duration,
    /// Confirmation/error scan cadence while waiting.
    pub confirmation_poll: Duration,
    /// Base status-poll interval.
    pub poll_interval: Duration,
    /// Poll interval when the governor widens polling.
    pub widened_poll_interval: Duration,
    /// Multiplier applied to the next sleep after a failed table read.
    pub poll_error_backoff: u32,
    /// Retention window for settled orders and restored snapshots.
    pub retention: Duration,
    /// Column carrying the client order id in the observed table.
    pub table_id_field: String,
    /// Column carrying the status text in the observed table.
    pub table_status_field: String,
    /// Market-hours advisory settings.
    pub market_hours: MarketHoursConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            submission_timeout: Duration::from_secs(10),
            confirmation_poll: Duration::from_millis(200),
            poll_interval: Duration::from_secs(2),
            widened_poll_interval: Duration::from_secs(6),
            poll_error_backoff: 2,
            retention: Duration::from_secs(3600),
            table_id_field: "id".to_string(),
            table_status_field: "status".to_string(),
            market_hours: MarketHoursConfig::default(),
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Kind of blocking validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationIssueKind {
    /// A required field is absent.
    MissingField,
    /// Quantity is not a positive number.
    InvalidQuantity,
    /// A price field is not a positive number.
    InvalidPrice,
    /// Bracket parent/group linkage is inconsistent.
    BracketLink,
    /// A page element the submission needs is missing or hidden.
    UiNotReady,
    /// The sizing collaborator rejected the intent.
    Risk,
    /// The referenced order is unknown.
    UnknownOrder,
    /// An internal fault was captured at the phase boundary.
    SystemError,
}

/// One blocking validation issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Issue kind.
    pub kind: ValidationIssueKind,
    /// Human-readable message.
    pub message: String,
}

/// Structured result of one validation phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Phase that produced the report.
    pub phase: ValidationPhase,
    /// Whether the phase passed.
    pub valid: bool,
    /// Blocking errors.
    pub errors: Vec<ValidationIssue>,
    /// Non-blocking warnings.
    pub warnings: Vec<String>,
    /// Registered order id, present on pre-submission success.
    pub order_id: Option<String>,
}

impl ValidationReport {
    fn passed(phase: ValidationPhase) -> Self {
        Self {
            phase,
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            order_id: None,
        }
    }

    fn push_error(&mut self, kind: ValidationIssueKind, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(ValidationIssue {
            kind,
            message: message.into(),
        });
    }

    fn unknown_order(phase: ValidationPhase, order_id: &str) -> Self {
        let mut report = Self::passed(phase);
        report.push_error(
            ValidationIssueKind::UnknownOrder,
            format!("order {order_id} not found"),
        );
        report
    }
}

/// Result of submission monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionResult {
    /// Order the submission concerned.
    pub order_id: String,
    /// Whether confirmation was observed before the deadline.
    pub accepted: bool,
    /// Time from `SUBMITTING` to the final outcome.
    pub duration: Duration,
    /// Classification of the detected failure, when rejected.
    pub classification: Option<Classification>,
    /// Raw failure message, when rejected.
    pub message: Option<String>,
}

// ============================================================================
// Tracker
// ============================================================================

/// Tracks orders through their full lifecycle.
pub struct OrderLifecycleTracker {
    config: TrackerConfig,
    selectors: PageSelectors,
    store: Arc<OrderStore>,
    governor: Arc<PerformanceGovernor>,
    taxonomy: Arc<ErrorTaxonomy>,
    resilience: Arc<ResilienceController>,
    ui: Arc<dyn UiQueryPort>,
    sizing: Arc<dyn SizingPort>,
    events: Arc<EventBus>,
    snapshots: Option<SnapshotStore>,
}

impl OrderLifecycleTracker {
    /// Create a tracker with explicit collaborators.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: TrackerConfig,
        selectors: PageSelectors,
        governor: Arc<PerformanceGovernor>,
        taxonomy: Arc<ErrorTaxonomy>,
        resilience: Arc<ResilienceController>,
        ui: Arc<dyn UiQueryPort>,
        sizing: Arc<dyn SizingPort>,
        events: Arc<EventBus>,
        snapshots: Option<SnapshotStore>,
    ) -> Self {
        Self {
            config,
            selectors,
            store: Arc::new(OrderStore::new()),
            governor,
            taxonomy,
            resilience,
            ui,
            sizing,
            events,
            snapshots,
        }
    }

    /// The tracker-owned order store (snapshot reads only for outsiders).
    #[must_use]
    pub const fn store(&self) -> &Arc<OrderStore> {
        &self.store
    }

    /// The event surface.
    #[must_use]
    pub const fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The governor feeding this tracker's feature flags.
    #[must_use]
    pub const fn governor(&self) -> &Arc<PerformanceGovernor> {
        &self.governor
    }

    // ------------------------------------------------------------------
    // Startup / housekeeping
    // ------------------------------------------------------------------

    /// Restore the order store from the persisted snapshot, dropping
    /// entries older than the retention window. Returns the count restored.
    pub async fn restore_from_snapshot(&self) -> usize {
        let Some(snapshots) = &self.snapshots else {
            return 0;
        };
        let snapshot = snapshots.load().await;
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let restored = self.store.restore(snapshot.orders, retention);
        if restored > 0 {
            info!(restored, "order store restored from snapshot");
        }
        restored
    }

    /// Sweep settled orders older than the retention window.
    pub fn sweep_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let removed = self.store.sweep_expired(retention);
        if removed > 0 {
            debug!(removed, "swept settled orders");
        }
        removed
    }

    // ------------------------------------------------------------------
    // Pre-submission
    // ------------------------------------------------------------------

    /// Validate an order intent and register it on success.
    ///
    /// Runs, in order: field and numeric-range checks, UI-readiness checks
    /// (skippable under degraded levels), the market-hours advisory
    /// (warnings only), and the sizing collaborator. Never propagates a
    /// fault: the result object is always well-formed.
    pub async fn validate_pre_submission(&self, intent: &OrderIntent) -> ValidationReport {
        let started = Instant::now();
        let flags = self.governor.flags();
        let mut report = ValidationReport::passed(ValidationPhase::PreSubmission);

        self.check_fields(intent, &mut report);

        if report.valid && !flags.skip_ui_readiness {
            self.check_ui_readiness(&mut report).await;
        }

        if !flags.skip_market_hours
            && let Some(warning) = self.config.market_hours.advisory(Utc::now())
        {
            report.warnings.push(warning);
        }

        if report.valid {
            let verdict = self.sizing.validate_sizing(intent, None).await;
            if !verdict.valid {
                for message in verdict.errors {
                    report.push_error(ValidationIssueKind::Risk, message);
                }
            }
            report.warnings.extend(verdict.warnings);
        }

        if report.valid {
            match self.register_order(intent, &report).await {
                Ok(order_id) => report.order_id = Some(order_id),
                Err(error) => {
                    // Internal faults surface as a system-error result, not
                    // a panic or propagated error.
                    report.push_error(ValidationIssueKind::SystemError, error.to_string());
                }
            }
        }

        if !flags.suppress_verbose_logging {
            debug!(
                valid = report.valid,
                errors = report.errors.len(),
                warnings = report.warnings.len(),
                order_id = report.order_id.as_deref().unwrap_or("-"),
                "pre-submission validation finished"
            );
        }

        self.governor
            .record_validation("pre_submission", started.elapsed());
        report
    }

    fn check_fields(&self, intent: &OrderIntent, report: &mut ValidationReport) {
        if intent.symbol.trim().is_empty() {
            report.push_error(ValidationIssueKind::MissingField, "symbol is required");
        }
        if intent.quantity <= Decimal::ZERO {
            report.push_error(
                ValidationIssueKind::InvalidQuantity,
                format!("quantity must be positive, got {}", intent.quantity),
            );
        }

        if matches!(intent.kind, OrderKind::Limit | OrderKind::StopLimit)
            && intent.entry_price.is_none()
        {
            report.push_error(
                ValidationIssueKind::MissingField,
                format!("{} orders require an entry price", intent.kind),
            );
        }
        for (label, price) in [
            ("entry", intent.entry_price),
            ("stop", intent.stop_price),
            ("target", intent.target_price),
        ] {
            if let Some(price) = price
                && price <= Decimal::ZERO
            {
                report.push_error(
                    ValidationIssueKind::InvalidPrice,
                    format!("{label} price must be positive, got {price}"),
                );
            }
        }

        // A child leg must name its bracket group, and its parent (when
        // already registered) must belong to the same group.
        if let Some(parent_id) = &intent.parent_order_id {
            match &intent.bracket_group_id {
                None => report.push_error(
                    ValidationIssueKind::BracketLink,
                    "child order must carry its bracket group id",
                ),
                Some(group) => {
                    if let Some(parent) = self.store.get(parent_id)
                        && parent.bracket_group_id.as_deref() != Some(group)
                    {
                        report.push_error(
                            ValidationIssueKind::BracketLink,
                            format!("parent {parent_id} is not in bracket group {group}"),
                        );
                    }
                }
            }
        }
    }

    async fn check_ui_readiness(&self, report: &mut ValidationReport) {
        for selector in [
            &self.selectors.order_entry_panel,
            &self.selectors.submit_button,
            &self.selectors.quantity_input,
        ] {
            if !self.ui.element_visible(selector).await {
                report.push_error(
                    ValidationIssueKind::UiNotReady,
                    format!("element not ready: {selector}"),
                );
            }
        }
    }

    async fn register_order(
        &self,
        intent: &OrderIntent,
        report: &ValidationReport,
    ) -> Result<String, AutomationError> {
        let order_id = new_order_id();
        let client_id = intent.client_id.clone().unwrap_or_else(new_client_id);
        let validation_id = uuid::Uuid::new_v4().to_string();

        let mut record = OrderRecord::from_intent(
            order_id.clone(),
            client_id,
            validation_id,
            intent,
        );
        record.validations.push(ValidationOutcome {
            phase: ValidationPhase::PreSubmission,
            valid: true,
            errors: Vec::new(),
            warnings: report.warnings.clone(),
            recorded_at: Utc::now(),
        });
        self.store.insert(record);

        info!(order_id = %order_id, symbol = %intent.symbol, "order registered");
        self.save_snapshot().await;
        Ok(order_id)
    }

    // ------------------------------------------------------------------
    // Submission monitoring
    // ------------------------------------------------------------------

    /// Monitor a submission until confirmation, a detected error, or the
    /// configured timeout. On success the order transitions to `SUBMITTED`
    /// and the status-poll loop starts.
    pub async fn monitor_submission(&self, order_id: &str) -> SubmissionResult {
        let started = Instant::now();

        match self
            .store
            .with_order_mut(order_id, |o| o.transition(OrderStatus::Submitting))
        {
            None => {
                return SubmissionResult {
                    order_id: order_id.to_string(),
                    accepted: false,
                    duration: started.elapsed(),
                    classification: None,
                    message: Some(format!("order {order_id} not found")),
                };
            }
            Some(Err(error)) => {
                return SubmissionResult {
                    order_id: order_id.to_string(),
                    accepted: false,
                    duration: started.elapsed(),
                    classification: None,
                    message: Some(error.to_string()),
                };
            }
            Some(Ok(())) => {}
        }

        self.store.with_order_mut(order_id, |o| {
            o.push_event(
                LifecycleEventKind::SubmissionStarted,
                serde_json::json!({ "timeout_ms": self.config.submission_timeout.as_millis() as u64 }),
            );
        });

        let client_id = self
            .store
            .get(order_id)
            .map(|o| o.client_id)
            .unwrap_or_default();
        let deadline = started + self.config.submission_timeout;
        let mut outcome: Option<Result<(), String>> = None;

        while Instant::now() < deadline {
            if self.ui.element_exists(&self.selectors.confirmation_banner).await
                || self.find_order_row(&client_id).await.is_some()
            {
                outcome = Some(Ok(()));
                break;
            }

            if let Some(message) = self.scan_error_surfaces().await {
                outcome = Some(Err(message));
                break;
            }

            tokio::time::sleep(self.config.confirmation_poll).await;
        }

        let duration = started.elapsed();
        match outcome {
            Some(Ok(())) => {
                self.store.with_order_mut(order_id, |o| {
                    let result = o.transition(OrderStatus::Submitted);
                    o.tracking = Some(StatusTracking {
                        active: true,
                        poll_count: 0,
                        last_check: None,
                    });
                    o.push_event(
                        LifecycleEventKind::SubmissionCompleted,
                        serde_json::json!({ "duration_ms": duration.as_millis() as u64 }),
                    );
                    result
                });
                self.events.publish(&EventEnvelope::new(
                    LifecycleEventKind::SubmissionCompleted.as_str(),
                    Some(order_id.to_string()),
                    serde_json::json!({ "duration_ms": duration.as_millis() as u64 }),
                ));
                info!(order_id, duration_ms = duration.as_millis() as u64, "submission confirmed");

                self.spawn_status_poll(order_id.to_string());
                self.save_snapshot().await;

                SubmissionResult {
                    order_id: order_id.to_string(),
                    accepted: true,
                    duration,
                    classification: None,
                    message: None,
                }
            }
            Some(Err(message)) => {
                let classification = self.taxonomy.classify(Some(&message));
                self.fail_submission(order_id, &message, &classification, duration);
                SubmissionResult {
                    order_id: order_id.to_string(),
                    accepted: false,
                    duration,
                    classification: Some(classification),
                    message: Some(message),
                }
            }
            None => {
                let message = format!(
                    "submission confirmation timed out after {} ms",
                    self.config.submission_timeout.as_millis()
                );
                let classification = self.taxonomy.classify(Some(&message));
                self.fail_submission(order_id, &message, &classification, duration);
                SubmissionResult {
                    order_id: order_id.to_string(),
                    accepted: false,
                    duration,
                    classification: Some(classification),
                    message: Some(message),
                }
            }
        }
    }

    fn fail_submission(
        &self,
        order_id: &str,
        message: &str,
        classification: &Classification,
        duration: Duration,
    ) {
        warn!(order_id, message, "submission failed");
        let payload = serde_json::json!({
            "message": message,
            "classification": classification,
            "duration_ms": duration.as_millis() as u64,
        });
        self.store.with_order_mut(order_id, |o| {
            let result = o.transition(OrderStatus::Failed);
            o.push_event(LifecycleEventKind::ErrorDetected, payload.clone());
            result
        });
        self.events.publish(&EventEnvelope::new(
            LifecycleEventKind::ErrorDetected.as_str(),
            Some(order_id.to_string()),
            payload,
        ));
    }

    /// Scan error surfaces, honoring the governor's minimal-scan flag.
    async fn scan_error_surfaces(&self) -> Option<String> {
        let flags = self.governor.flags();

        if self.ui.element_exists(&self.selectors.error_banner).await {
            return Some(self.read_error_message(&self.selectors.error_banner).await);
        }

        if !flags.minimal_error_scan {
            for region in &self.selectors.extra_error_regions {
                if self.ui.element_exists(region).await {
                    return Some(self.read_error_message(region).await);
                }
            }
        }

        None
    }

    async fn read_error_message(&self, selector: &str) -> String {
        let rows = self.ui.read_table(selector).await;
        rows.first()
            .and_then(|row| row.get("message").cloned())
            .unwrap_or_else(|| "unidentified page error".to_string())
    }

    async fn find_order_row(&self, client_id: &str) -> Option<HashMap<String, String>> {
        if client_id.is_empty() {
            return None;
        }
        let rows = self.ui.read_table(&self.selectors.order_table).await;
        rows.into_iter()
            .find(|row| row.get(&self.config.table_id_field).map(String::as_str) == Some(client_id))
    }

    // ------------------------------------------------------------------
    // Post-submission
    // ------------------------------------------------------------------

    /// Verify a submitted order against the page: confirmation UI, order
    /// table presence, error banners, and observed-vs-intended fields.
    /// Mismatches produce warnings, not hard failures.
    pub async fn validate_post_submission(&self, order_id: &str) -> ValidationReport {
        let started = Instant::now();
        let flags = self.governor.flags();
        let mut report = ValidationReport::passed(ValidationPhase::PostSubmission);
        report.order_id = Some(order_id.to_string());

        let Some(record) = self.store.get(order_id) else {
            self.governor
                .record_validation("post_submission", started.elapsed());
            return ValidationReport::unknown_order(ValidationPhase::PostSubmission, order_id);
        };

        if !self.ui.element_exists(&self.selectors.confirmation_banner).await {
            report
                .warnings
                .push("confirmation element not present".to_string());
        }

        // Locate the order in the observed table, retrying under the
        // resilience controller; a submitted order missing from the table
        // is suspicious but not fatal.
        let client_id = record.client_id.clone();
        let row = self
            .resilience
            .execute_with_recovery("read_order_table", Some(order_id), || {
                let client_id = client_id.clone();
                async move {
                    self.find_order_row(&client_id)
                        .await
                        .ok_or_else(|| {
                            AutomationError::Page(format!(
                                "order {client_id} not found in order table"
                            ))
                        })
                }
            })
            .await;

        match row {
            Ok(row) => self.compare_observed_fields(&record, &row, &mut report),
            Err(error) => report.warnings.push(error.to_string()),
        }

        if let Some(message) = self.scan_error_surfaces().await {
            let classification = self.taxonomy.classify(Some(&message));
            let payload = serde_json::json!({
                "message": message,
                "classification": classification,
            });
            self.store.with_order_mut(order_id, |o| {
                o.push_event(LifecycleEventKind::ErrorDetected, payload.clone());
            });
            self.events.publish(&EventEnvelope::new(
                LifecycleEventKind::ErrorDetected.as_str(),
                Some(order_id.to_string()),
                payload,
            ));
            report.warnings.push(format!("error surface active: {message}"));
        }

        self.store.with_order_mut(order_id, |o| {
            o.validations.push(ValidationOutcome {
                phase: ValidationPhase::PostSubmission,
                valid: report.valid,
                errors: report.errors.iter().map(|e| e.message.clone()).collect(),
                warnings: report.warnings.clone(),
                recorded_at: Utc::now(),
            });
        });

        if !flags.suppress_verbose_logging {
            debug!(
                order_id,
                warnings = report.warnings.len(),
                "post-submission validation finished"
            );
        }

        self.governor
            .record_validation("post_submission", started.elapsed());
        report
    }

    fn compare_observed_fields(
        &self,
        record: &OrderRecord,
        row: &HashMap<String, String>,
        report: &mut ValidationReport,
    ) {
        let expectations: [(&str, String); 3] = [
            ("symbol", record.symbol.clone()),
            ("side", record.side.to_string()),
            ("quantity", record.quantity.to_string()),
        ];
        for (field, expected) in expectations {
            if let Some(observed) = row.get(field)
                && !observed.eq_ignore_ascii_case(&expected)
            {
                report.warnings.push(format!(
                    "field mismatch: {field} expected {expected}, observed {observed}"
                ));
            }
        }

        if let (Some(expected), Some(observed)) = (record.entry_price, row.get("price"))
            && observed.parse::<Decimal>().is_ok_and(|p| p != expected)
        {
            report.warnings.push(format!(
                "field mismatch: price expected {expected}, observed {observed}"
            ));
        }
    }

    // ------------------------------------------------------------------
    // Status polling
    // ------------------------------------------------------------------

    /// Stop the poll loop for an order by clearing its active flag. The
    /// scheduled continuation runs once more as a no-op.
    pub fn stop_polling(&self, order_id: &str) {
        self.store.with_order_mut(order_id, |o| {
            if let Some(tracking) = o.tracking.as_mut() {
                tracking.active = false;
            }
        });
    }

    fn spawn_status_poll(&self, order_id: String) {
        let store = Arc::clone(&self.store);
        let ui = Arc::clone(&self.ui);
        let events = Arc::clone(&self.events);
        let governor = Arc::clone(&self.governor);
        let config = self.config.clone();
        let selectors = self.selectors.clone();

        tokio::spawn(async move {
            let mut error_streak: u32 = 0;
            loop {
                let base = if governor.flags().widen_poll_interval {
                    config.widened_poll_interval
                } else {
                    config.poll_interval
                };
                // Widen further while table reads come back empty.
                let interval = base.saturating_mul(config.poll_error_backoff.saturating_pow(
                    error_streak.min(3),
                ));
                tokio::time::sleep(interval).await;

                let Some(record) = store.get(&order_id) else {
                    break;
                };
                if !record.tracking.as_ref().is_some_and(|t| t.active) {
                    break;
                }

                store.with_order_mut(&order_id, |o| {
                    if let Some(tracking) = o.tracking.as_mut() {
                        tracking.poll_count += 1;
                        tracking.last_check = Some(Utc::now());
                    }
                });

                let rows = ui.read_table(&selectors.order_table).await;
                if rows.is_empty() {
                    error_streak += 1;
                    continue;
                }
                error_streak = 0;

                let observed = rows.iter().find(|row| {
                    row.get(&config.table_id_field).map(String::as_str)
                        == Some(record.client_id.as_str())
                });
                let Some(next) = observed
                    .and_then(|row| row.get(&config.table_status_field))
                    .and_then(|text| OrderStatus::from_observed(text))
                else {
                    continue;
                };

                if next == record.status || !record.status.can_transition_to(next) {
                    continue;
                }

                let payload = serde_json::json!({
                    "from": record.status,
                    "to": next,
                });
                store.with_order_mut(&order_id, |o| {
                    let result = o.transition(next);
                    o.push_event(LifecycleEventKind::StatusChange, payload.clone());
                    result
                });
                events.publish(&EventEnvelope::new(
                    LifecycleEventKind::StatusChange.as_str(),
                    Some(order_id.clone()),
                    payload,
                ));

                if next.is_terminal() {
                    store.with_order_mut(&order_id, |o| {
                        o.push_event(
                            LifecycleEventKind::OrderComplete,
                            serde_json::json!({ "status": next }),
                        );
                        if let Some(tracking) = o.tracking.as_mut() {
                            tracking.active = false;
                        }
                    });
                    events.publish(&EventEnvelope::new(
                        LifecycleEventKind::OrderComplete.as_str(),
                        Some(order_id.clone()),
                        serde_json::json!({ "status": next }),
                    ));
                    info!(order_id = %order_id, status = %next, "order reached terminal status");

                    if let Some(group) = record.bracket_group_id.as_deref()
                        && store.bracket_group_terminal(group)
                    {
                        store.with_order_mut(&order_id, |o| {
                            o.push_event(
                                LifecycleEventKind::BracketGroupComplete,
                                serde_json::json!({ "group": group }),
                            );
                        });
                        events.publish(&EventEnvelope::new(
                            LifecycleEventKind::BracketGroupComplete.as_str(),
                            Some(order_id.clone()),
                            serde_json::json!({ "group": group }),
                        ));
                    }
                    break;
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Best-effort snapshot write; failures are logged, never raised.
    async fn save_snapshot(&self) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let report = self.governor.report();
        let snapshot = EngineSnapshot {
            saved_at: Utc::now(),
            orders: self.store.snapshot(),
            performance: PerformanceCounters {
                total_validations: report.total_samples,
                total_violations: report.total_violations,
            },
        };
        if let Err(error) = snapshots.save(&snapshot).await {
            warn!(error = %error, "snapshot save failed");
        }
    }
}

impl std::fmt::Debug for OrderLifecycleTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderLifecycleTracker")
            .field("orders", &self.store.count())
            .finish_non_exhaustive()
    }
}
