//! Best-effort local snapshot persistence.
//!
//! Persists the order map and aggregate performance counters to a JSON
//! file keyed by the configured instance name. The snapshot is written
//! after every successful registration and read once at startup. It is
//! non-authoritative: corruption or absence degrades to an empty starting
//! state and never raises past [`SnapshotStore::load`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::tracker::order::OrderRecord;

/// Errors from snapshot writes.
///
/// Reads never error; they degrade to an empty snapshot.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem error.
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Aggregate performance counters carried across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceCounters {
    /// Validations recorded.
    pub total_validations: u64,
    /// Budget violations recorded.
    pub total_violations: u64,
}

/// Serializable engine snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// When the snapshot was written.
    pub saved_at: DateTime<Utc>,
    /// Every tracked order at save time.
    pub orders: Vec<OrderRecord>,
    /// Aggregate performance counters.
    pub performance: PerformanceCounters,
}

impl EngineSnapshot {
    /// Empty snapshot stamped now.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            saved_at: Utc::now(),
            orders: Vec::new(),
            performance: PerformanceCounters::default(),
        }
    }
}

/// File-backed snapshot store.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Create a store writing under `directory` with a file name derived
    /// from `instance_key`.
    #[must_use]
    pub fn new(directory: &Path, instance_key: &str) -> Self {
        Self {
            path: directory.join(format!("{instance_key}.snapshot.json")),
        }
    }

    /// Snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] on serialization or filesystem failure;
    /// callers treat saves as best-effort and log rather than propagate.
    pub async fn save(&self, snapshot: &EngineSnapshot) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(
            path = %self.path.display(),
            orders = snapshot.orders.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Read the snapshot, degrading to empty on absence or corruption.
    pub async fn load(&self) -> EngineSnapshot {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot to restore");
                return EngineSnapshot::empty();
            }
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    error = %error,
                    "snapshot unreadable, starting empty"
                );
                return EngineSnapshot::empty();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    error = %error,
                    "snapshot corrupt, starting empty"
                );
                EngineSnapshot::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::order::{OrderIntent, OrderRecord, OrderSide};
    use rust_decimal_macros::dec;

    fn record(id: &str) -> OrderRecord {
        let intent = OrderIntent::market("NQ".to_string(), OrderSide::Buy, dec!(1));
        OrderRecord::from_intent(
            id.to_string(),
            format!("cli-{id}"),
            "val-1".to_string(),
            &intent,
        )
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "panel-nq");

        let snapshot = EngineSnapshot {
            saved_at: Utc::now(),
            orders: vec![record("ord-1"), record("ord-2")],
            performance: PerformanceCounters {
                total_validations: 10,
                total_violations: 2,
            },
        };
        store.save(&snapshot).await.unwrap();

        let restored = store.load().await;
        assert_eq!(restored.orders.len(), 2);
        assert_eq!(restored.performance.total_validations, 10);
        assert_eq!(restored.orders[0].id, "ord-1");
    }

    #[tokio::test]
    async fn missing_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "absent");
        let restored = store.load().await;
        assert!(restored.orders.is_empty());
        assert_eq!(restored.performance, PerformanceCounters::default());
    }

    #[tokio::test]
    async fn corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "corrupt");
        tokio::fs::write(store.path(), b"{ not json").await.unwrap();

        let restored = store.load().await;
        assert!(restored.orders.is_empty());
    }

    #[tokio::test]
    async fn key_derives_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "nq-panel");
        assert!(
            store
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("nq-panel")
        );
    }
}
