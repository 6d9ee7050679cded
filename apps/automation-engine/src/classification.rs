//! Failure classification engine.
//!
//! Maps raw failure text scraped from the page (or reported by a
//! collaborator) to a taxonomy entry: category, severity, and a suggested
//! recovery action. Classification is total and deterministic: empty,
//! missing, or unmatched input yields the [`Classification::unknown`]
//! sentinel and the function never panics.
//!
//! The taxonomy is an explicit owned value injected into each component at
//! construction, so multiple independent engines can coexist in tests.
//! Entries are evaluated in order and the first pattern match wins.

use serde::{Deserialize, Serialize};

// ============================================================================
// Category / Severity / Recovery
// ============================================================================

/// Failure category in the automation taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Account standing or available funds.
    Account,
    /// Missing entitlements or denied access.
    Permissions,
    /// Market closed, session boundaries, or trading halts.
    MarketHours,
    /// Symbol or contract validity.
    SymbolValidity,
    /// Price or quantity outside acceptable bounds.
    PriceQuantity,
    /// Fill and liquidity problems after submission.
    Liquidity,
    /// Connectivity, server, rate-limit, and page-structure faults.
    Connectivity,
    /// Bracket (parent/child) coordination breaks.
    BracketCoordination,
    /// Risk-limit breaches reported by the host application.
    RiskLimit,
    /// Unmatched input.
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Account => "ACCOUNT",
            Self::Permissions => "PERMISSIONS",
            Self::MarketHours => "MARKET_HOURS",
            Self::SymbolValidity => "SYMBOL_VALIDITY",
            Self::PriceQuantity => "PRICE_QUANTITY",
            Self::Liquidity => "LIQUIDITY",
            Self::Connectivity => "CONNECTIVITY",
            Self::BracketCoordination => "BRACKET_COORDINATION",
            Self::RiskLimit => "RISK_LIMIT",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{name}")
    }
}

/// Failure severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    /// Informational; retry freely.
    Low,
    /// Transient; bounded retry with backoff.
    Medium,
    /// Halt automated retries for this operation class.
    High,
    /// Halt and require operator attention.
    Critical,
}

impl ErrorSeverity {
    /// Whether this severity halts automated retries.
    #[must_use]
    pub const fn halts_retries(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        write!(f, "{name}")
    }
}

/// Suggested recovery action keyed by the taxonomy.
///
/// The resilience controller resolves these keys against its registered
/// strategies; unmatched keys fall through to plain backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryKey {
    /// Wait briefly and retry the operation as-is.
    WaitAndRetry,
    /// Wait for the next trading session before retrying.
    AwaitMarketOpen,
    /// Wait for connectivity to the host application to return.
    AwaitConnectivity,
    /// Slow down; the host is throttling requests.
    ThrottleRequests,
    /// Re-price the order before retrying.
    AdjustPrice,
    /// Reduce the order quantity before retrying.
    ReduceQuantity,
    /// Cancel the surviving legs of a broken bracket.
    CancelBracket,
    /// Stop all automated activity.
    HaltOperations,
    /// Surface to a human; no automated recovery.
    ManualReview,
}

// ============================================================================
// Classification result
// ============================================================================

/// Result of classifying one failure message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Matched category.
    pub category: ErrorCategory,
    /// Matched severity.
    pub severity: ErrorSeverity,
    /// Suggested recovery action.
    pub recovery: RecoveryKey,
    /// Name of the taxonomy rule that matched, if any.
    pub rule: Option<&'static str>,
}

impl Classification {
    /// Sentinel classification for empty, missing, or unmatched input.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            category: ErrorCategory::Unknown,
            severity: ErrorSeverity::Medium,
            recovery: RecoveryKey::ManualReview,
            rule: None,
        }
    }
}

// ============================================================================
// Taxonomy
// ============================================================================

/// One immutable taxonomy rule: ordered match patterns plus the
/// classification they produce.
#[derive(Debug, Clone)]
pub struct TaxonomyEntry {
    /// Rule name, stable across releases.
    pub name: &'static str,
    /// Lowercase substrings; any match selects this rule.
    pub patterns: &'static [&'static str],
    /// Category assigned on match.
    pub category: ErrorCategory,
    /// Severity assigned on match.
    pub severity: ErrorSeverity,
    /// Recovery key assigned on match.
    pub recovery: RecoveryKey,
}

/// Ordered failure taxonomy.
///
/// Built once and shared; first-match-wins over the entry order. The
/// standard taxonomy groups rules as: submission-time, execution-time,
/// technical, bracket-coordination, then risk-limit.
#[derive(Debug, Clone)]
pub struct ErrorTaxonomy {
    entries: Vec<TaxonomyEntry>,
}

impl ErrorTaxonomy {
    /// Build a taxonomy from explicit entries (test seam).
    #[must_use]
    pub fn from_entries(entries: Vec<TaxonomyEntry>) -> Self {
        Self { entries }
    }

    /// The standard taxonomy for trading-page automation.
    #[must_use]
    pub fn standard() -> Self {
        Self::from_entries(vec![
            // -- Submission-time --------------------------------------------
            TaxonomyEntry {
                name: "account-locked",
                patterns: &["account locked", "account suspended", "account restricted"],
                category: ErrorCategory::Account,
                severity: ErrorSeverity::Critical,
                recovery: RecoveryKey::HaltOperations,
            },
            TaxonomyEntry {
                name: "insufficient-funds",
                patterns: &[
                    "insufficient funds",
                    "insufficient buying power",
                    "insufficient margin",
                    "not enough margin",
                ],
                category: ErrorCategory::Account,
                severity: ErrorSeverity::High,
                recovery: RecoveryKey::ReduceQuantity,
            },
            TaxonomyEntry {
                name: "permission-denied",
                patterns: &[
                    "not authorized",
                    "permission denied",
                    "not permitted",
                    "access denied",
                ],
                category: ErrorCategory::Permissions,
                severity: ErrorSeverity::High,
                recovery: RecoveryKey::ManualReview,
            },
            TaxonomyEntry {
                name: "market-closed",
                patterns: &[
                    "market closed",
                    "market is closed",
                    "outside trading hours",
                    "session closed",
                ],
                category: ErrorCategory::MarketHours,
                severity: ErrorSeverity::Medium,
                recovery: RecoveryKey::AwaitMarketOpen,
            },
            TaxonomyEntry {
                name: "trading-halted",
                patterns: &["trading halted", "instrument halted", "halted"],
                category: ErrorCategory::MarketHours,
                severity: ErrorSeverity::High,
                recovery: RecoveryKey::WaitAndRetry,
            },
            TaxonomyEntry {
                name: "invalid-symbol",
                patterns: &[
                    "invalid symbol",
                    "unknown symbol",
                    "invalid contract",
                    "contract not found",
                ],
                category: ErrorCategory::SymbolValidity,
                severity: ErrorSeverity::High,
                recovery: RecoveryKey::ManualReview,
            },
            TaxonomyEntry {
                name: "invalid-price",
                patterns: &[
                    "invalid price",
                    "price out of range",
                    "invalid tick",
                    "price too far",
                ],
                category: ErrorCategory::PriceQuantity,
                severity: ErrorSeverity::Medium,
                recovery: RecoveryKey::AdjustPrice,
            },
            TaxonomyEntry {
                name: "invalid-quantity",
                patterns: &[
                    "invalid quantity",
                    "quantity exceeds",
                    "size too large",
                    "below minimum quantity",
                ],
                category: ErrorCategory::PriceQuantity,
                severity: ErrorSeverity::Medium,
                recovery: RecoveryKey::ReduceQuantity,
            },
            // -- Execution-time ---------------------------------------------
            TaxonomyEntry {
                name: "no-fill",
                patterns: &["no liquidity", "not filled", "fill timeout", "no market"],
                category: ErrorCategory::Liquidity,
                severity: ErrorSeverity::Medium,
                recovery: RecoveryKey::WaitAndRetry,
            },
            TaxonomyEntry {
                name: "order-rejected",
                patterns: &["order rejected", "rejected by exchange", "rejected by broker"],
                category: ErrorCategory::Liquidity,
                severity: ErrorSeverity::High,
                recovery: RecoveryKey::ManualReview,
            },
            // -- Technical --------------------------------------------------
            TaxonomyEntry {
                name: "rate-limited",
                patterns: &["rate limit", "too many requests", "throttled", "429"],
                category: ErrorCategory::Connectivity,
                severity: ErrorSeverity::Medium,
                recovery: RecoveryKey::ThrottleRequests,
            },
            TaxonomyEntry {
                name: "connection-lost",
                patterns: &[
                    "connection lost",
                    "connection refused",
                    "disconnected",
                    "network error",
                    "websocket closed",
                ],
                category: ErrorCategory::Connectivity,
                severity: ErrorSeverity::Medium,
                recovery: RecoveryKey::AwaitConnectivity,
            },
            TaxonomyEntry {
                name: "server-error",
                patterns: &[
                    "server error",
                    "internal error",
                    "service unavailable",
                    "500",
                    "503",
                ],
                category: ErrorCategory::Connectivity,
                severity: ErrorSeverity::Medium,
                recovery: RecoveryKey::WaitAndRetry,
            },
            TaxonomyEntry {
                name: "operation-timeout",
                patterns: &["timed out", "timeout", "deadline exceeded"],
                category: ErrorCategory::Connectivity,
                severity: ErrorSeverity::Medium,
                recovery: RecoveryKey::WaitAndRetry,
            },
            TaxonomyEntry {
                name: "page-structure",
                patterns: &[
                    "element not found",
                    "not visible",
                    "not interactable",
                    "selector",
                ],
                category: ErrorCategory::Connectivity,
                severity: ErrorSeverity::Medium,
                recovery: RecoveryKey::WaitAndRetry,
            },
            // -- Bracket coordination ---------------------------------------
            TaxonomyEntry {
                name: "bracket-break",
                patterns: &[
                    "bracket",
                    "oco",
                    "child order failed",
                    "leg rejected",
                    "parent order",
                ],
                category: ErrorCategory::BracketCoordination,
                severity: ErrorSeverity::High,
                recovery: RecoveryKey::CancelBracket,
            },
            // -- Risk limits ------------------------------------------------
            TaxonomyEntry {
                name: "daily-loss-limit",
                patterns: &["daily loss limit", "loss limit reached", "max daily loss"],
                category: ErrorCategory::RiskLimit,
                severity: ErrorSeverity::Critical,
                recovery: RecoveryKey::HaltOperations,
            },
            TaxonomyEntry {
                name: "position-limit",
                patterns: &["position limit", "max position", "exposure limit"],
                category: ErrorCategory::RiskLimit,
                severity: ErrorSeverity::High,
                recovery: RecoveryKey::ManualReview,
            },
        ])
    }

    /// Classify one failure message.
    ///
    /// `None`, empty input, and unmatched input all return the same
    /// sentinel classification.
    #[must_use]
    pub fn classify(&self, message: Option<&str>) -> Classification {
        let Some(message) = message else {
            return Classification::unknown();
        };
        if message.trim().is_empty() {
            return Classification::unknown();
        }

        let lowered = message.to_lowercase();
        for entry in &self.entries {
            if entry.patterns.iter().any(|p| lowered.contains(p)) {
                return Classification {
                    category: entry.category,
                    severity: entry.severity,
                    recovery: entry.recovery,
                    rule: Some(entry.name),
                };
            }
        }

        Classification::unknown()
    }

    /// Number of taxonomy rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the taxonomy has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ErrorTaxonomy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn classify_none_returns_sentinel() {
        let taxonomy = ErrorTaxonomy::standard();
        let c = taxonomy.classify(None);
        assert_eq!(c, Classification::unknown());
    }

    #[test]
    fn classify_empty_returns_sentinel() {
        let taxonomy = ErrorTaxonomy::standard();
        assert_eq!(taxonomy.classify(Some("")), Classification::unknown());
        assert_eq!(taxonomy.classify(Some("   ")), Classification::unknown());
    }

    #[test]
    fn classify_unmatched_returns_sentinel() {
        let taxonomy = ErrorTaxonomy::standard();
        let c = taxonomy.classify(Some("zorp gleeble unmatched"));
        assert_eq!(c.category, ErrorCategory::Unknown);
        assert_eq!(c.severity, ErrorSeverity::Medium);
        assert_eq!(c.recovery, RecoveryKey::ManualReview);
        assert!(c.rule.is_none());
    }

    #[test]
    fn classify_is_case_insensitive() {
        let taxonomy = ErrorTaxonomy::standard();
        let c = taxonomy.classify(Some("INSUFFICIENT FUNDS for this order"));
        assert_eq!(c.category, ErrorCategory::Account);
        assert_eq!(c.rule, Some("insufficient-funds"));
    }

    #[test]
    fn classify_first_match_wins() {
        // "account locked" also contains no other pattern, but a message
        // matching both account-locked and a later rule must pick the first.
        let taxonomy = ErrorTaxonomy::standard();
        let c = taxonomy.classify(Some("account locked after daily loss limit"));
        assert_eq!(c.rule, Some("account-locked"));
        assert_eq!(c.severity, ErrorSeverity::Critical);
    }

    #[test]
    fn classify_connectivity() {
        let taxonomy = ErrorTaxonomy::standard();
        let c = taxonomy.classify(Some("WebSocket closed unexpectedly"));
        assert_eq!(c.category, ErrorCategory::Connectivity);
        assert_eq!(c.recovery, RecoveryKey::AwaitConnectivity);
    }

    #[test]
    fn classify_risk_limit_is_critical() {
        let taxonomy = ErrorTaxonomy::standard();
        let c = taxonomy.classify(Some("Daily loss limit reached, trading disabled"));
        assert_eq!(c.category, ErrorCategory::RiskLimit);
        assert!(c.severity.halts_retries());
        assert_eq!(c.recovery, RecoveryKey::HaltOperations);
    }

    #[test]
    fn severity_ordering() {
        assert!(ErrorSeverity::Low < ErrorSeverity::Medium);
        assert!(ErrorSeverity::Medium < ErrorSeverity::High);
        assert!(ErrorSeverity::High < ErrorSeverity::Critical);
        assert!(!ErrorSeverity::Medium.halts_retries());
        assert!(ErrorSeverity::High.halts_retries());
    }

    proptest! {
        // Totality: any input classifies without panicking, and the result
        // is either a named rule or exactly the sentinel.
        #[test]
        fn classify_is_total(message in ".{0,256}") {
            let taxonomy = ErrorTaxonomy::standard();
            let c = taxonomy.classify(Some(&message));
            if c.rule.is_none() {
                prop_assert_eq!(c, Classification::unknown());
            }
        }

        // Determinism: same input, same output.
        #[test]
        fn classify_is_deterministic(message in ".{0,256}") {
            let taxonomy = ErrorTaxonomy::standard();
            prop_assert_eq!(
                taxonomy.classify(Some(&message)),
                taxonomy.classify(Some(&message))
            );
        }
    }
}
