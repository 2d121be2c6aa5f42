//! Statistics and integrity scanning.

use crate::config::EngineConfig;
use crate::cycle::CycleDetector;
use crate::error::Result;
use crate::models::{IntegrityIssue, IntegrityKind, NamespaceStats};
use crate::store::AuthzStore;
use crate::validation::validate_namespace;
use std::sync::Arc;
use tracing::warn;

pub struct Maintenance {
    store: Arc<dyn AuthzStore>,
    cycles: CycleDetector,
}

impl Maintenance {
    pub fn new(store: Arc<dyn AuthzStore>, config: Arc<EngineConfig>) -> Self {
        let cycles = CycleDetector::new(store.clone(), config);
        Self { store, cycles }
    }

    pub async fn get_stats(&self, namespace: &str) -> Result<NamespaceStats> {
        validate_namespace("namespace", namespace)?;
        self.store.stats(namespace).await
    }

    /// Scan the group and resource-parent graphs for cycles. Any finding
    /// means a prior invariant failure; a healthy deployment returns
    /// nothing.
    pub async fn verify_integrity(&self, namespace: &str) -> Result<Vec<IntegrityIssue>> {
        validate_namespace("namespace", namespace)?;

        let mut issues = Vec::new();
        for cycle in self.cycles.scan_group_cycles(namespace).await? {
            issues.push(IntegrityIssue::warning(
                IntegrityKind::GroupCycles,
                cycle.join(" -> "),
            ));
        }
        for cycle in self.cycles.scan_resource_cycles(namespace).await? {
            issues.push(IntegrityIssue::warning(
                IntegrityKind::ResourceCycles,
                cycle.join(" -> "),
            ));
        }
        if !issues.is_empty() {
            warn!(
                namespace,
                findings = issues.len(),
                "Integrity scan found graph cycles"
            );
        }
        Ok(issues)
    }
}
