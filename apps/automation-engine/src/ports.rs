//! Driven ports for external collaborators.
//!
//! The engine drives a third-party trading page but never implements the
//! page itself. Element lookup and tabular reads go through [`UiQueryPort`];
//! position-sizing/risk decisions go through [`SizingPort`]. Both are black
//! boxes: any of their operations may report "not found"/empty and the
//! engine tolerates it without special-casing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::tracker::order::OrderIntent;

// ============================================================================
// UI query port
// ============================================================================

/// Port for querying the rendered page.
///
/// Implementations poll the live DOM (or a recorded fixture in tests).
/// `wait_for_element` is the bounded polling primitive: it checks roughly
/// every 100 ms until the element is present or the timeout elapses.
#[async_trait]
pub trait UiQueryPort: Send + Sync {
    /// Whether an element matching `selector` exists.
    async fn element_exists(&self, selector: &str) -> bool;

    /// Whether an element matching `selector` exists and is visible.
    async fn element_visible(&self, selector: &str) -> bool;

    /// Poll until the element is present. Returns `false` on timeout.
    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> bool;

    /// Read tabular data as an ordered sequence of field-maps.
    ///
    /// Returns an empty vector when the table is absent or empty.
    async fn read_table(&self, selector: &str) -> Vec<HashMap<String, String>>;
}

/// UI port that reports every element as absent.
///
/// Useful as a default and for exercising degraded paths in tests.
#[derive(Debug, Clone, Default)]
pub struct NullUi;

#[async_trait]
impl UiQueryPort for NullUi {
    async fn element_exists(&self, _selector: &str) -> bool {
        false
    }

    async fn element_visible(&self, _selector: &str) -> bool {
        false
    }

    async fn wait_for_element(&self, _selector: &str, _timeout: Duration) -> bool {
        false
    }

    async fn read_table(&self, _selector: &str) -> Vec<HashMap<String, String>> {
        Vec::new()
    }
}

// ============================================================================
// Sizing / risk port
// ============================================================================

/// Account metrics the sizing collaborator may consult.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMetrics {
    /// Account equity.
    pub equity: Decimal,
    /// Available buying power.
    pub buying_power: Decimal,
    /// Open positions currently held.
    pub open_position_count: u32,
}

/// Verdict from the sizing collaborator, used verbatim as the risk phase
/// result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SizingVerdict {
    /// Whether the intent passes sizing rules.
    pub valid: bool,
    /// Blocking errors.
    pub errors: Vec<String>,
    /// Non-blocking warnings.
    pub warnings: Vec<String>,
}

impl SizingVerdict {
    /// A passing verdict with no findings.
    #[must_use]
    pub const fn passed() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Port for the position-sizing/risk collaborator.
#[async_trait]
pub trait SizingPort: Send + Sync {
    /// Validate an order intent against sizing rules.
    async fn validate_sizing(
        &self,
        intent: &OrderIntent,
        metrics: Option<&AccountMetrics>,
    ) -> SizingVerdict;
}

/// Sizing port that approves everything.
#[derive(Debug, Clone, Default)]
pub struct PermissiveSizing;

#[async_trait]
impl SizingPort for PermissiveSizing {
    async fn validate_sizing(
        &self,
        _intent: &OrderIntent,
        _metrics: Option<&AccountMetrics>,
    ) -> SizingVerdict {
        SizingVerdict::passed()
    }
}
