//! Audit partition lifecycle and naming.
//!
//! Events are stored partitioned by calendar month on `event_time`. The
//! partition name format `audit_events_yYYYYmMM` is an external contract:
//! operational tooling parses it. A lifecycle task creates partitions ahead
//! of time and drops those past the retention window.

use crate::config::EngineConfig;
use crate::error::{AuthzError, Result};
use crate::store::AuthzStore;
use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;
use tracing::info;

/// Partition name for a given month, e.g. `audit_events_y2026m08`.
pub fn partition_name(year: i32, month: u32) -> String {
    format!("audit_events_y{year:04}m{month:02}")
}

/// Partition an event at `time` lands in.
pub fn partition_for(time: DateTime<Utc>) -> String {
    partition_name(time.year(), time.month())
}

/// Parse a partition name back into `(year, month)`.
pub fn parse_partition_name(name: &str) -> Option<(i32, u32)> {
    let rest = name.strip_prefix("audit_events_y")?;
    let (year, month) = rest.split_once('m')?;
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year, month))
}

/// Linear month index used for retention arithmetic.
fn month_index(year: i32, month: u32) -> i64 {
    year as i64 * 12 + (month as i64 - 1)
}

/// Walk a `(year, month)` pair forward or backward by whole months.
pub fn add_months(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let idx = month_index(year, month) + delta as i64;
    let year = idx.div_euclid(12) as i32;
    let month = (idx.rem_euclid(12) + 1) as u32;
    (year, month)
}

/// Partition lifecycle operations over the store.
pub struct AuditMaintenance {
    store: Arc<dyn AuthzStore>,
    config: Arc<EngineConfig>,
}

impl AuditMaintenance {
    pub fn new(store: Arc<dyn AuthzStore>, config: Arc<EngineConfig>) -> Self {
        Self { store, config }
    }

    /// Create partitions for `[this_month, this_month + months_ahead]` if
    /// missing. Idempotent; returns the names actually created.
    pub async fn ensure_partitions(&self, months_ahead: Option<u32>) -> Result<Vec<String>> {
        let ahead = months_ahead.unwrap_or(self.config.default_partitions_ahead);
        let now = Utc::now();
        let mut created = Vec::new();
        for delta in 0..=ahead as i32 {
            let (year, month) = add_months(now.year(), now.month(), delta);
            if let Some(name) = self.store.create_audit_partition(year, month).await? {
                info!(target: "audit", partition = %name, "Created audit partition");
                created.push(name);
            }
        }
        Ok(created)
    }

    /// Drop partitions whose end falls at or before `this_month − months`.
    /// Returns the names dropped.
    pub async fn drop_partitions(&self, older_than_months: Option<u32>) -> Result<Vec<String>> {
        let retention = older_than_months.unwrap_or(self.config.default_retention_months);
        let now = Utc::now();
        let cutoff = month_index(now.year(), now.month()) - retention as i64;

        let mut dropped = Vec::new();
        for name in self.store.list_audit_partitions().await? {
            let Some((year, month)) = parse_partition_name(&name) else {
                continue;
            };
            // a partition's end is the first instant of the following month
            if month_index(year, month) + 1 <= cutoff
                && self.store.drop_audit_partition(&name).await?
            {
                info!(target: "audit", partition = %name, "Dropped audit partition");
                dropped.push(name);
            }
        }
        Ok(dropped)
    }

    /// Create a single partition; `None` when it already exists.
    pub async fn create_partition(&self, year: i32, month: u32) -> Result<Option<String>> {
        if !(1..=12).contains(&month) {
            return Err(AuthzError::invalid("month", "must be between 1 and 12"));
        }
        self.store.create_audit_partition(year, month).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn names_round_trip() {
        assert_eq!(partition_name(2026, 8), "audit_events_y2026m08");
        assert_eq!(parse_partition_name("audit_events_y2026m08"), Some((2026, 8)));
        assert_eq!(parse_partition_name("audit_events_y2026m13"), None);
        assert_eq!(parse_partition_name("somewhere_else"), None);
    }

    #[test]
    fn month_arithmetic_wraps_years() {
        assert_eq!(add_months(2026, 11, 3), (2027, 2));
        assert_eq!(add_months(2026, 1, -1), (2025, 12));
        assert_eq!(add_months(2026, 8, -84), (2019, 8));
    }

    #[tokio::test]
    async fn ensure_creates_ahead_and_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let maint = AuditMaintenance::new(store.clone(), Arc::new(EngineConfig::default()));

        let created = maint.ensure_partitions(Some(2)).await.unwrap();
        assert_eq!(created.len(), 3); // this month plus two ahead

        let again = maint.ensure_partitions(Some(2)).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn drop_respects_retention_window() {
        let store = Arc::new(MemoryStore::new());
        let maint = AuditMaintenance::new(store.clone(), Arc::new(EngineConfig::default()));

        let now = Utc::now();
        let (old_y, old_m) = add_months(now.year(), now.month(), -90);
        let (recent_y, recent_m) = add_months(now.year(), now.month(), -2);
        store.create_audit_partition(old_y, old_m).await.unwrap();
        store
            .create_audit_partition(recent_y, recent_m)
            .await
            .unwrap();

        let dropped = maint.drop_partitions(None).await.unwrap();
        assert_eq!(dropped, vec![partition_name(old_y, old_m)]);

        let remaining = store.list_audit_partitions().await.unwrap();
        assert_eq!(remaining, vec![partition_name(recent_y, recent_m)]);
    }

    #[tokio::test]
    async fn create_partition_validates_month() {
        let store = Arc::new(MemoryStore::new());
        let maint = AuditMaintenance::new(store, Arc::new(EngineConfig::default()));
        assert!(maint.create_partition(2026, 13).await.is_err());
        assert!(maint.create_partition(2026, 12).await.unwrap().is_some());
    }
}
