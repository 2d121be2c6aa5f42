//! Storage abstraction for tuples, hierarchy rules, and audit events.
//!
//! The engine talks to storage through [`AuthzStore`] trait objects so the
//! same evaluator runs against the in-memory store (tests, development) and
//! the PostgreSQL store (production). Mutation methods take the audit event
//! describing them: persisting both atomically is the store's contract, so
//! a failed mutation can never leave a stray event and vice versa.

pub mod memory;
pub mod postgres;

use crate::error::Result;
use crate::models::{
    AuditEvent, AuditQuery, HierarchyRule, NamespaceStats, StoredTuple, TupleKey, WriteOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Wildcard filter over stored tuples; `None` fields match anything.
///
/// When `as_of` is set, tuples expired at that instant are excluded; leave
/// it unset for physical-graph scans (cycle checks, maintenance) that must
/// see expired rows too.
#[derive(Debug, Clone, Default)]
pub struct TupleFilter {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub relation: Option<String>,
    pub relation_any: Option<Vec<String>>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub as_of: Option<DateTime<Utc>>,
}

impl TupleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, resource_type: &str, resource_id: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn with_resource_type(mut self, resource_type: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self
    }

    pub fn with_relation(mut self, relation: &str) -> Self {
        self.relation = Some(relation.to_string());
        self
    }

    pub fn with_relation_any(mut self, relations: Vec<String>) -> Self {
        self.relation_any = Some(relations);
        self
    }

    pub fn with_subject(mut self, subject_type: &str, subject_id: &str) -> Self {
        self.subject_type = Some(subject_type.to_string());
        self.subject_id = Some(subject_id.to_string());
        self
    }

    pub fn as_of(mut self, now: DateTime<Utc>) -> Self {
        self.as_of = Some(now);
        self
    }

    pub fn matches(&self, tuple: &StoredTuple) -> bool {
        if let Some(ref t) = self.resource_type {
            if tuple.resource.resource_type != *t {
                return false;
            }
        }
        if let Some(ref i) = self.resource_id {
            if tuple.resource.resource_id != *i {
                return false;
            }
        }
        if let Some(ref r) = self.relation {
            if tuple.relation != *r {
                return false;
            }
        }
        if let Some(ref set) = self.relation_any {
            if !set.iter().any(|r| tuple.relation == *r) {
                return false;
            }
        }
        if let Some(ref t) = self.subject_type {
            if tuple.subject.subject_type != *t {
                return false;
            }
        }
        if let Some(ref i) = self.subject_id {
            if tuple.subject.subject_id != *i {
                return false;
            }
        }
        if let Some(at) = self.as_of {
            if tuple.is_expired(at) {
                return false;
            }
        }
        true
    }
}

/// Persistent state backing the engine. All rows are scoped by namespace;
/// implementations never return rows from a namespace other than the one
/// asked for.
#[async_trait]
pub trait AuthzStore: Send + Sync {
    // ---------------------------------------------------------------------
    // Tuples
    // ---------------------------------------------------------------------

    /// Upsert on the uniqueness key. A conflict replaces `expires_at` and
    /// keeps the original tuple id; the store rewrites the event type to
    /// `tuple_updated` in that case.
    async fn upsert_tuple(
        &self,
        namespace: &str,
        key: &TupleKey,
        expires_at: Option<DateTime<Utc>>,
        event: AuditEvent,
    ) -> Result<WriteOutcome>;

    /// Upsert many tuples with their events; returns the number of rows
    /// newly created.
    async fn upsert_tuples(
        &self,
        namespace: &str,
        rows: Vec<(TupleKey, Option<DateTime<Utc>>, AuditEvent)>,
    ) -> Result<u64>;

    /// Delete by exact key, returning the removed row if it existed. The
    /// event is persisted only when a row was actually deleted, and carries
    /// the removed row's old `expires_at`.
    async fn delete_tuple(
        &self,
        namespace: &str,
        key: &TupleKey,
        event: AuditEvent,
    ) -> Result<Option<StoredTuple>>;

    async fn get_tuple(&self, namespace: &str, key: &TupleKey) -> Result<Option<StoredTuple>>;

    async fn find_tuples(&self, namespace: &str, filter: &TupleFilter)
        -> Result<Vec<StoredTuple>>;

    /// Replace `expires_at` on an existing tuple; `None` target row yields
    /// `Ok(None)` and persists no event.
    async fn update_expiration(
        &self,
        namespace: &str,
        key: &TupleKey,
        expires_at: Option<DateTime<Utc>>,
        event: AuditEvent,
    ) -> Result<Option<StoredTuple>>;

    /// Tuples whose expiration falls in `(now, until]`, soonest first.
    async fn expiring_within(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<StoredTuple>>;

    /// Tuples already expired at `now`.
    async fn find_expired(&self, namespace: &str, now: DateTime<Utc>) -> Result<Vec<StoredTuple>>;

    // ---------------------------------------------------------------------
    // Hierarchy rules
    // ---------------------------------------------------------------------

    /// Upsert a hierarchy rule; idempotent, returning the stable rule id.
    async fn upsert_rule(
        &self,
        namespace: &str,
        resource_type: &str,
        permission: &str,
        implies: &str,
        event: AuditEvent,
    ) -> Result<WriteOutcome>;

    /// Delete one rule; the event is persisted only if the rule existed.
    async fn delete_rule(
        &self,
        namespace: &str,
        resource_type: &str,
        permission: &str,
        implies: &str,
        event: AuditEvent,
    ) -> Result<bool>;

    async fn rules_for(&self, namespace: &str, resource_type: &str)
        -> Result<Vec<HierarchyRule>>;

    // ---------------------------------------------------------------------
    // Audit
    // ---------------------------------------------------------------------

    async fn query_audit(&self, namespace: &str, query: &AuditQuery) -> Result<Vec<AuditEvent>>;

    /// Create the partition for the given month if missing. Returns the
    /// partition name when one was created, `None` if it already existed.
    async fn create_audit_partition(&self, year: i32, month: u32) -> Result<Option<String>>;

    async fn list_audit_partitions(&self) -> Result<Vec<String>>;

    /// Drop a partition and everything in it. Returns whether it existed.
    async fn drop_audit_partition(&self, name: &str) -> Result<bool>;

    // ---------------------------------------------------------------------
    // Statistics
    // ---------------------------------------------------------------------

    async fn stats(&self, namespace: &str) -> Result<NamespaceStats>;
}
