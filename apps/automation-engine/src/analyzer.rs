//! Reconciliation analyzer.
//!
//! A derived, stateless view over an order-store snapshot: compares
//! intended order attributes against observed page state, scores bracket
//! coordination, and produces severity-ranked recommendations. It never
//! mutates the store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::classification::ErrorSeverity;
use crate::governor::GovernorReport;
use crate::tracker::order::{LifecycleEventKind, OrderRecord, OrderStatus};

// ============================================================================
// Inputs
// ============================================================================

/// Analyzer thresholds.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Success rate below which a recommendation is raised.
    pub min_success_rate: f64,
    /// Field discrepancies above which a recommendation is raised.
    pub max_discrepancies: usize,
    /// Error-category frequency at which a recommendation is raised.
    pub error_frequency_threshold: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_success_rate: 0.8,
            max_discrepancies: 5,
            error_frequency_threshold: 3,
        }
    }
}

/// One order as observed in the host's order table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservedOrder {
    /// Client order id as shown in the table.
    pub client_id: String,
    /// Observed symbol.
    pub symbol: Option<String>,
    /// Observed side text.
    pub side: Option<String>,
    /// Observed quantity.
    pub quantity: Option<Decimal>,
    /// Observed order type text.
    pub kind: Option<String>,
    /// Observed price.
    pub price: Option<Decimal>,
    /// Observed status text.
    pub status: Option<String>,
}

impl ObservedOrder {
    /// Build from a table row. Returns `None` when the id column is absent.
    #[must_use]
    pub fn from_row(row: &HashMap<String, String>, id_field: &str) -> Option<Self> {
        let client_id = row.get(id_field)?.clone();
        Some(Self {
            client_id,
            symbol: row.get("symbol").cloned(),
            side: row.get("side").cloned(),
            quantity: row.get("quantity").and_then(|q| q.parse().ok()),
            kind: row.get("type").cloned(),
            price: row.get("price").and_then(|p| p.parse().ok()),
            status: row.get("status").cloned(),
        })
    }
}

// ============================================================================
// Report types
// ============================================================================

/// Field compared between intent and observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderField {
    /// Instrument symbol.
    Symbol,
    /// Side.
    Side,
    /// Quantity.
    Quantity,
    /// Order type.
    Kind,
    /// Price.
    Price,
}

/// One field-level difference between intended and observed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDiscrepancy {
    /// Order the difference concerns.
    pub order_id: String,
    /// Field that differs.
    pub field: OrderField,
    /// Intended value.
    pub expected: String,
    /// Observed value.
    pub observed: String,
}

/// Coordination health of one bracket group.
///
/// A group is successful iff it has exactly one non-child order and at
/// least one child order; any other shape is a coordination failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketHealth {
    /// Group identifier.
    pub group_id: String,
    /// Members seen in the snapshot.
    pub member_count: usize,
    /// Non-child (parent) members.
    pub parent_count: usize,
    /// Child members.
    pub child_count: usize,
    /// Whether the group shape is correct.
    pub successful: bool,
    /// Description of the coordination issue, when not successful.
    pub issue: Option<String>,
}

/// Cancellation effectiveness over the snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CancellationStats {
    /// Orders that ended `CANCELLED`.
    pub cancelled: usize,
    /// Cancelled orders that completed cleanly (completion stamped and an
    /// `ORDER_COMPLETE` event recorded).
    pub clean: usize,
    /// `clean / cancelled`; 1.0 when nothing was cancelled.
    pub effectiveness: f64,
}

/// A severity-ranked recommendation.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Severity for ranking.
    pub severity: ErrorSeverity,
    /// Human-readable message.
    pub message: String,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    /// When the pass ran.
    pub generated_at: DateTime<Utc>,
    /// Orders in the snapshot.
    pub orders_analyzed: usize,
    /// Fraction of orders ending `FILLED`/`SUBMITTED`.
    pub success_rate: f64,
    /// Field-level differences.
    pub discrepancies: Vec<FieldDiscrepancy>,
    /// Per-group coordination health.
    pub bracket_groups: Vec<BracketHealth>,
    /// Child orders with no matching parent in the snapshot.
    pub orphaned_children: Vec<String>,
    /// Cancellation effectiveness.
    pub cancellation: CancellationStats,
    /// Recommendations, most severe first.
    pub recommendations: Vec<Recommendation>,
}

// ============================================================================
// Analyzer
// ============================================================================

/// Stateless reconciliation analyzer.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationAnalyzer {
    config: AnalyzerConfig,
}

impl ReconciliationAnalyzer {
    /// Create an analyzer with explicit thresholds.
    #[must_use]
    pub const fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Analyze a snapshot of the order store against observed page state.
    ///
    /// `observed` carries the host's order table as parsed rows; pass an
    /// empty slice when the table is unavailable. `governor` enriches the
    /// recommendations with overhead findings when provided.
    #[must_use]
    pub fn analyze(
        &self,
        orders: &[OrderRecord],
        observed: &[ObservedOrder],
        governor: Option<&GovernorReport>,
    ) -> ReconciliationReport {
        let success_rate = success_rate(orders);
        let discrepancies = self.compare_fields(orders, observed);
        let (bracket_groups, orphaned_children) = analyze_brackets(orders);
        let cancellation = cancellation_stats(orders);
        let recommendations = self.recommend(
            orders,
            success_rate,
            &discrepancies,
            &bracket_groups,
            governor,
        );

        ReconciliationReport {
            generated_at: Utc::now(),
            orders_analyzed: orders.len(),
            success_rate,
            discrepancies,
            bracket_groups,
            orphaned_children,
            cancellation,
            recommendations,
        }
    }

    /// Compare each order's intended fields against its observed row,
    /// field by field.
    fn compare_fields(
        &self,
        orders: &[OrderRecord],
        observed: &[ObservedOrder],
    ) -> Vec<FieldDiscrepancy> {
        let by_client: HashMap<&str, &ObservedOrder> = observed
            .iter()
            .map(|o| (o.client_id.as_str(), o))
            .collect();

        let mut discrepancies = Vec::new();
        for order in orders {
            let Some(row) = by_client.get(order.client_id.as_str()) else {
                continue;
            };

            let mut push = |field, expected: String, observed: String| {
                discrepancies.push(FieldDiscrepancy {
                    order_id: order.id.clone(),
                    field,
                    expected,
                    observed,
                });
            };

            if let Some(symbol) = &row.symbol
                && !symbol.eq_ignore_ascii_case(&order.symbol)
            {
                push(OrderField::Symbol, order.symbol.clone(), symbol.clone());
            }
            if let Some(side) = &row.side
                && !side.eq_ignore_ascii_case(&order.side.to_string())
            {
                push(OrderField::Side, order.side.to_string(), side.clone());
            }
            if let Some(quantity) = row.quantity
                && quantity != order.quantity
            {
                push(
                    OrderField::Quantity,
                    order.quantity.to_string(),
                    quantity.to_string(),
                );
            }
            if let Some(kind) = &row.kind
                && !kind
                    .replace([' ', '-', '_'], "")
                    .eq_ignore_ascii_case(&order.kind.to_string().replace('_', ""))
            {
                push(OrderField::Kind, order.kind.to_string(), kind.clone());
            }
            if let (Some(expected), Some(price)) = (order.entry_price, row.price)
                && price != expected
            {
                push(OrderField::Price, expected.to_string(), price.to_string());
            }
        }
        discrepancies
    }

    fn recommend(
        &self,
        orders: &[OrderRecord],
        success_rate_value: f64,
        discrepancies: &[FieldDiscrepancy],
        bracket_groups: &[BracketHealth],
        governor: Option<&GovernorReport>,
    ) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();

        if let Some(report) = governor {
            if report.rolling_average_ms > report.budget_ms {
                recommendations.push(Recommendation {
                    code: "validation-overhead",
                    severity: ErrorSeverity::High,
                    message: format!(
                        "validation overhead {:.2} ms exceeds the {:.2} ms budget",
                        report.rolling_average_ms, report.budget_ms
                    ),
                });
            } else if report.level != crate::governor::PerformanceLevel::Full {
                recommendations.push(Recommendation {
                    code: "degraded-validation",
                    severity: ErrorSeverity::Medium,
                    message: format!(
                        "governor holding level {} ({} recent violations)",
                        report.level, report.recent_violations
                    ),
                });
            }
        }

        if !orders.is_empty() && success_rate_value < self.config.min_success_rate {
            recommendations.push(Recommendation {
                code: "low-success-rate",
                severity: ErrorSeverity::High,
                message: format!(
                    "success rate {:.0}% below the {:.0}% threshold",
                    success_rate_value * 100.0,
                    self.config.min_success_rate * 100.0
                ),
            });
        }

        if discrepancies.len() > self.config.max_discrepancies {
            recommendations.push(Recommendation {
                code: "excessive-discrepancies",
                severity: ErrorSeverity::High,
                message: format!(
                    "{} field discrepancies between intended and observed orders",
                    discrepancies.len()
                ),
            });
        }

        for (category, count) in error_category_counts(orders) {
            if count >= self.config.error_frequency_threshold {
                recommendations.push(Recommendation {
                    code: "frequent-error-category",
                    severity: ErrorSeverity::High,
                    message: format!("{count} failures classified as {category}"),
                });
            }
        }

        let broken = bracket_groups.iter().filter(|g| !g.successful).count();
        if broken > 0 {
            recommendations.push(Recommendation {
                code: "bracket-coordination",
                severity: ErrorSeverity::Critical,
                message: format!("{broken} bracket group(s) with coordination issues"),
            });
        }

        recommendations.sort_by(|a, b| b.severity.cmp(&a.severity));
        recommendations
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

fn success_rate(orders: &[OrderRecord]) -> f64 {
    if orders.is_empty() {
        return 1.0;
    }
    let successful = orders
        .iter()
        .filter(|o| matches!(o.status, OrderStatus::Filled | OrderStatus::Submitted))
        .count();
    successful as f64 / orders.len() as f64
}

fn analyze_brackets(orders: &[OrderRecord]) -> (Vec<BracketHealth>, Vec<String>) {
    let mut groups: HashMap<&str, Vec<&OrderRecord>> = HashMap::new();
    for order in orders {
        if let Some(group) = order.bracket_group_id.as_deref() {
            groups.entry(group).or_default().push(order);
        }
    }

    let mut health: Vec<BracketHealth> = groups
        .iter()
        .map(|(group_id, members)| {
            let parent_count = members.iter().filter(|o| !o.is_child()).count();
            let child_count = members.len() - parent_count;
            let successful = parent_count == 1 && child_count >= 1;
            let issue = if successful {
                None
            } else if parent_count == 0 {
                Some("no parent order in group".to_string())
            } else if parent_count > 1 {
                Some(format!("{parent_count} parent orders in group"))
            } else {
                Some("no child orders in group".to_string())
            };
            BracketHealth {
                group_id: (*group_id).to_string(),
                member_count: members.len(),
                parent_count,
                child_count,
                successful,
                issue,
            }
        })
        .collect();
    health.sort_by(|a, b| a.group_id.cmp(&b.group_id));

    let known_ids: std::collections::HashSet<&str> =
        orders.iter().map(|o| o.id.as_str()).collect();
    let orphaned: Vec<String> = orders
        .iter()
        .filter(|o| {
            o.parent_order_id
                .as_deref()
                .is_some_and(|parent| !known_ids.contains(parent))
        })
        .map(|o| o.id.clone())
        .collect();

    (health, orphaned)
}

fn cancellation_stats(orders: &[OrderRecord]) -> CancellationStats {
    let cancelled: Vec<&OrderRecord> = orders
        .iter()
        .filter(|o| o.status == OrderStatus::Cancelled)
        .collect();
    let clean = cancelled
        .iter()
        .filter(|o| {
            o.completed_at.is_some()
                && o.events
                    .iter()
                    .any(|e| e.kind == LifecycleEventKind::OrderComplete)
        })
        .count();

    let effectiveness = if cancelled.is_empty() {
        1.0
    } else {
        clean as f64 / cancelled.len() as f64
    };

    CancellationStats {
        cancelled: cancelled.len(),
        clean,
        effectiveness,
    }
}

fn error_category_counts(orders: &[OrderRecord]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for order in orders {
        for event in &order.events {
            if event.kind != LifecycleEventKind::ErrorDetected {
                continue;
            }
            if let Some(category) = event
                .payload
                .get("classification")
                .and_then(|c| c.get("category"))
                .and_then(|c| c.as_str())
            {
                *counts.entry(category.to_string()).or_insert(0) += 1;
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::order::{OrderIntent, OrderSide};
    use rust_decimal_macros::dec;

    fn record(id: &str, group: Option<&str>, parent: Option<&str>) -> OrderRecord {
        let intent = OrderIntent {
            bracket_group_id: group.map(String::from),
            parent_order_id: parent.map(String::from),
            ..OrderIntent::market("NQ".to_string(), OrderSide::Buy, dec!(1))
        };
        OrderRecord::from_intent(
            id.to_string(),
            format!("cli-{id}"),
            "val-1".to_string(),
            &intent,
        )
    }

    fn with_status(mut record: OrderRecord, path: &[OrderStatus]) -> OrderRecord {
        for status in path {
            record.transition(*status).unwrap();
        }
        record
    }

    fn filled(id: &str) -> OrderRecord {
        with_status(
            record(id, None, None),
            &[
                OrderStatus::Submitting,
                OrderStatus::Submitted,
                OrderStatus::Filled,
            ],
        )
    }

    #[test]
    fn success_rate_counts_filled_and_submitted() {
        let orders = vec![
            filled("ord-1"),
            with_status(
                record("ord-2", None, None),
                &[OrderStatus::Submitting, OrderStatus::Submitted],
            ),
            with_status(
                record("ord-3", None, None),
                &[OrderStatus::Submitting, OrderStatus::Failed],
            ),
            record("ord-4", None, None),
        ];

        let report = ReconciliationAnalyzer::default().analyze(&orders, &[], None);
        assert_eq!(report.orders_analyzed, 4);
        assert!((report.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_snapshot_has_full_success_rate() {
        let report = ReconciliationAnalyzer::default().analyze(&[], &[], None);
        assert!((report.success_rate - 1.0).abs() < f64::EPSILON);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn bracket_with_one_parent_two_children_is_successful() {
        let orders = vec![
            record("ord-p", Some("grp-1"), None),
            record("ord-c1", Some("grp-1"), Some("ord-p")),
            record("ord-c2", Some("grp-1"), Some("ord-p")),
        ];
        let report = ReconciliationAnalyzer::default().analyze(&orders, &[], None);
        assert_eq!(report.bracket_groups.len(), 1);
        let group = &report.bracket_groups[0];
        assert!(group.successful);
        assert_eq!(group.parent_count, 1);
        assert_eq!(group.child_count, 2);
        assert!(report.orphaned_children.is_empty());
    }

    #[test]
    fn bracket_without_parent_is_a_coordination_issue() {
        let orders = vec![
            record("ord-c1", Some("grp-1"), Some("ord-gone")),
            record("ord-c2", Some("grp-1"), Some("ord-gone")),
        ];
        let report = ReconciliationAnalyzer::default().analyze(&orders, &[], None);
        let group = &report.bracket_groups[0];
        assert!(!group.successful);
        assert_eq!(group.issue.as_deref(), Some("no parent order in group"));
        assert_eq!(report.orphaned_children.len(), 2);

        // A broken bracket is a critical recommendation.
        assert!(
            report
                .recommendations
                .iter()
                .any(|r| r.code == "bracket-coordination"
                    && r.severity == ErrorSeverity::Critical)
        );
    }

    #[test]
    fn bracket_without_children_is_a_coordination_issue() {
        let orders = vec![record("ord-p", Some("grp-1"), None)];
        let report = ReconciliationAnalyzer::default().analyze(&orders, &[], None);
        let group = &report.bracket_groups[0];
        assert!(!group.successful);
        assert_eq!(group.issue.as_deref(), Some("no child orders in group"));
    }

    #[test]
    fn field_discrepancies_are_reported_per_field() {
        let order = filled("ord-1");
        let observed = ObservedOrder {
            client_id: order.client_id.clone(),
            symbol: Some("ES".to_string()),
            side: Some("SELL".to_string()),
            quantity: Some(dec!(2)),
            kind: Some("Market".to_string()),
            price: None,
            status: Some("Filled".to_string()),
        };

        let report = ReconciliationAnalyzer::default().analyze(&[order], &[observed], None);
        let fields: Vec<OrderField> = report.discrepancies.iter().map(|d| d.field).collect();
        assert!(fields.contains(&OrderField::Symbol));
        assert!(fields.contains(&OrderField::Side));
        assert!(fields.contains(&OrderField::Quantity));
        assert!(!fields.contains(&OrderField::Kind));
    }

    #[test]
    fn matching_observation_produces_no_discrepancies() {
        let order = filled("ord-1");
        let observed = ObservedOrder {
            client_id: order.client_id.clone(),
            symbol: Some("NQ".to_string()),
            side: Some("Buy".to_string()),
            quantity: Some(dec!(1)),
            kind: Some("MARKET".to_string()),
            price: None,
            status: Some("Filled".to_string()),
        };
        let report = ReconciliationAnalyzer::default().analyze(&[order], &[observed], None);
        assert!(report.discrepancies.is_empty());
    }

    #[test]
    fn cancellation_effectiveness() {
        let mut clean = with_status(
            record("ord-1", None, None),
            &[
                OrderStatus::Submitting,
                OrderStatus::Submitted,
                OrderStatus::Cancelled,
            ],
        );
        clean.push_event(LifecycleEventKind::OrderComplete, serde_json::json!({}));

        // Cancelled but never marked complete (restored order, lost poll).
        let mut stale = with_status(
            record("ord-2", None, None),
            &[
                OrderStatus::Submitting,
                OrderStatus::Submitted,
                OrderStatus::Cancelled,
            ],
        );
        stale.completed_at = None;

        let report = ReconciliationAnalyzer::default().analyze(&[clean, stale], &[], None);
        assert_eq!(report.cancellation.cancelled, 2);
        assert_eq!(report.cancellation.clean, 1);
        assert!((report.cancellation.effectiveness - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn frequent_error_category_is_flagged() {
        let mut order = record("ord-1", None, None);
        for _ in 0..3 {
            order.push_event(
                LifecycleEventKind::ErrorDetected,
                serde_json::json!({
                    "message": "connection lost",
                    "classification": { "category": "CONNECTIVITY", "severity": "MEDIUM" },
                }),
            );
        }

        let report = ReconciliationAnalyzer::default().analyze(&[order], &[], None);
        assert!(
            report
                .recommendations
                .iter()
                .any(|r| r.code == "frequent-error-category" && r.message.contains("CONNECTIVITY"))
        );
    }

    #[test]
    fn recommendations_are_ranked_most_severe_first() {
        // Low success rate (High) + broken bracket (Critical).
        let orders = vec![
            with_status(
                record("ord-1", Some("grp-1"), None),
                &[OrderStatus::Submitting, OrderStatus::Failed],
            ),
        ];
        let report = ReconciliationAnalyzer::default().analyze(&orders, &[], None);
        assert!(report.recommendations.len() >= 2);
        for pair in report.recommendations.windows(2) {
            assert!(pair[0].severity >= pair[1].severity);
        }
        assert_eq!(report.recommendations[0].severity, ErrorSeverity::Critical);
    }

    #[test]
    fn observed_order_from_row() {
        let mut row = HashMap::new();
        row.insert("id".to_string(), "cli-1".to_string());
        row.insert("symbol".to_string(), "NQ".to_string());
        row.insert("quantity".to_string(), "2".to_string());
        row.insert("price".to_string(), "19000.25".to_string());

        let observed = ObservedOrder::from_row(&row, "id").unwrap();
        assert_eq!(observed.client_id, "cli-1");
        assert_eq!(observed.quantity, Some(dec!(2)));
        assert_eq!(observed.price, Some(dec!(19000.25)));

        row.remove("id");
        assert!(ObservedOrder::from_row(&row, "id").is_none());
    }
}
