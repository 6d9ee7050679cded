//! Order store: the tracker-owned map of identifier to record.
//!
//! The store is owned exclusively by the tracker; the analyzer and any
//! reporting surface only read snapshots. Mutations happen through
//! [`OrderStore::with_order_mut`] and are atomic between suspension points.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use rand::Rng;

use super::order::{OrderRecord, OrderStatus};

/// Generate an opaque order identifier (time + random derived).
#[must_use]
pub fn new_order_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u32 = rand::rng().random_range(0..0xFFFF);
    format!("ord-{millis}-{suffix:04x}")
}

/// Generate a client identifier for submissions without one.
#[must_use]
pub fn new_client_id() -> String {
    format!("cli-{}", uuid::Uuid::new_v4().simple())
}

/// Tracker-owned collection of order records and bracket-group membership.
///
/// Bracket member sets are append-only: sweeping an order removes the record
/// but group membership history is only dropped when the whole group has
/// been swept.
#[derive(Debug, Default)]
pub struct OrderStore {
    orders: RwLock<HashMap<String, OrderRecord>>,
    bracket_groups: RwLock<HashMap<String, Vec<String>>>,
}

impl OrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new record, indexing bracket membership.
    pub fn insert(&self, record: OrderRecord) {
        if let Some(group) = record.bracket_group_id.clone() {
            let mut groups = self
                .bracket_groups
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let members = groups.entry(group).or_default();
            if !members.contains(&record.id) {
                members.push(record.id.clone());
            }
        }

        self.orders
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(record.id.clone(), record);
    }

    /// Get a clone of one record.
    #[must_use]
    pub fn get(&self, order_id: &str) -> Option<OrderRecord> {
        self.orders
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(order_id)
            .cloned()
    }

    /// Whether a record exists.
    #[must_use]
    pub fn contains(&self, order_id: &str) -> bool {
        self.orders
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(order_id)
    }

    /// Mutate one record in place. Returns `None` if the order is unknown.
    pub fn with_order_mut<R>(
        &self,
        order_id: &str,
        f: impl FnOnce(&mut OrderRecord) -> R,
    ) -> Option<R> {
        let mut orders = self
            .orders
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        orders.get_mut(order_id).map(f)
    }

    /// Read-only snapshot of every record.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OrderRecord> {
        self.orders
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Records still moving through their lifecycle.
    #[must_use]
    pub fn active_orders(&self) -> Vec<OrderRecord> {
        self.orders
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|o| o.status.is_active())
            .cloned()
            .collect()
    }

    /// Member ids of a bracket group, in registration order.
    #[must_use]
    pub fn bracket_members(&self, group_id: &str) -> Vec<String> {
        self.bracket_groups
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(group_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether every member of a bracket group has reached a terminal status.
    ///
    /// Empty or unknown groups are not complete.
    #[must_use]
    pub fn bracket_group_terminal(&self, group_id: &str) -> bool {
        let members = self.bracket_members(group_id);
        if members.is_empty() {
            return false;
        }
        let orders = self
            .orders
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        members.iter().all(|id| {
            orders
                .get(id)
                .is_some_and(|o| o.status.is_terminal() || o.status == OrderStatus::Failed)
        })
    }

    /// Drop settled records older than the retention window.
    ///
    /// Age is measured from completion when stamped, otherwise from
    /// creation. Returns the number of records removed.
    pub fn sweep_expired(&self, retention: chrono::Duration) -> usize {
        let now = Utc::now();
        let mut orders = self
            .orders
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let expired: Vec<String> = orders
            .values()
            .filter(|o| {
                if o.status.is_active() {
                    return false;
                }
                let settled_at = o.completed_at.unwrap_or(o.created_at);
                now - settled_at > retention
            })
            .map(|o| o.id.clone())
            .collect();

        for id in &expired {
            orders.remove(id);
        }
        drop(orders);

        // Drop group entries whose members are all gone.
        if !expired.is_empty() {
            let orders = self
                .orders
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut groups = self
                .bracket_groups
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            groups.retain(|_, members| members.iter().any(|id| orders.contains_key(id)));
        }

        expired.len()
    }

    /// Restore records from a persisted snapshot.
    ///
    /// Entries older than `retention` are dropped, restored poll tracking is
    /// deactivated (the loops are gone), and bracket membership is rebuilt.
    /// Returns the number of records restored.
    pub fn restore(&self, records: Vec<OrderRecord>, retention: chrono::Duration) -> usize {
        let now = Utc::now();
        let mut restored = 0;
        for mut record in records {
            if now - record.created_at > retention {
                continue;
            }
            if let Some(tracking) = record.tracking.as_mut() {
                tracking.active = false;
            }
            self.insert(record);
            restored += 1;
        }
        restored
    }

    /// Total number of records.
    #[must_use]
    pub fn count(&self) -> usize {
        self.orders
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}
