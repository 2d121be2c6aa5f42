//! Engine configuration knobs and their defaults.

/// Namespace used by the convenience constructors when the caller does not
/// name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Tunable limits for traversal, pagination, and audit lifecycle.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum nested-group traversal depth.
    pub max_group_depth: usize,
    /// Maximum resource-ancestor traversal depth.
    pub max_resource_depth: usize,
    /// Relation used for group containment edges.
    pub default_membership_relation: String,
    /// Safety cap on hierarchy fixed-point iterations. The DAG invariant
    /// guarantees convergence well below this; reaching it is fatal.
    pub hierarchy_iteration_cap: usize,
    /// Page size applied when a list call passes no limit.
    pub default_page_size: usize,
    /// Hard ceiling on requested page sizes.
    pub max_page_size: usize,
    /// How many forward audit partitions `ensure_audit_partitions` creates
    /// by default.
    pub default_partitions_ahead: u32,
    /// Default audit retention in months (~7 years).
    pub default_retention_months: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_group_depth: 50,
            max_resource_depth: 50,
            default_membership_relation: crate::models::MEMBER_RELATION.to_string(),
            hierarchy_iteration_cap: 100,
            default_page_size: 100,
            max_page_size: 1000,
            default_partitions_ahead: 3,
            default_retention_months: 84,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_group_depth(mut self, depth: usize) -> Self {
        self.max_group_depth = depth;
        self
    }

    pub fn with_max_resource_depth(mut self, depth: usize) -> Self {
        self.max_resource_depth = depth;
        self
    }

    pub fn with_page_sizes(mut self, default: usize, max: usize) -> Self {
        self.default_page_size = default;
        self.max_page_size = max;
        self
    }

    /// Clamp a caller-supplied limit to the configured bounds.
    pub fn effective_limit(&self, limit: Option<usize>) -> usize {
        match limit {
            Some(0) | None => self.default_page_size,
            Some(n) => n.min(self.max_page_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.max_group_depth, 50);
        assert_eq!(config.max_resource_depth, 50);
        assert_eq!(config.hierarchy_iteration_cap, 100);
        assert_eq!(config.default_page_size, 100);
        assert_eq!(config.max_page_size, 1000);
        assert_eq!(config.default_partitions_ahead, 3);
        assert_eq!(config.default_retention_months, 84);
        assert_eq!(config.default_membership_relation, "member");
    }

    #[test]
    fn limits_clamp() {
        let config = EngineConfig::default();
        assert_eq!(config.effective_limit(None), 100);
        assert_eq!(config.effective_limit(Some(0)), 100);
        assert_eq!(config.effective_limit(Some(25)), 25);
        assert_eq!(config.effective_limit(Some(5000)), 1000);
    }
}
