//! In-memory store for tests and development.
//!
//! Mirrors the PostgreSQL store's semantics: namespace-scoped tuples and
//! rules keyed by their uniqueness keys, and audit events bucketed into
//! month partitions. Unlike PostgreSQL, a missing audit partition is
//! created on demand so short-lived test setups need no lifecycle calls.

use crate::audit::partition_for;
use crate::error::Result;
use crate::models::{
    AuditEvent, AuditEventType, AuditQuery, HierarchyRule, NamespaceStats, StoredTuple, TupleKey,
    WriteOutcome,
};
use crate::store::{AuthzStore, TupleFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Default)]
struct NamespaceData {
    tuples: HashMap<TupleKey, StoredTuple>,
    rules: HashMap<(String, String, String), HierarchyRule>,
}

pub struct MemoryStore {
    namespaces: DashMap<String, NamespaceData>,
    audit_partitions: DashMap<String, Vec<(u64, AuditEvent)>>,
    audit_seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            namespaces: DashMap::new(),
            audit_partitions: DashMap::new(),
            audit_seq: AtomicU64::new(0),
        }
    }

    fn append_event(&self, mut event: AuditEvent, tuple_id: Option<Uuid>) {
        if tuple_id.is_some() {
            event.tuple_id = tuple_id;
        }
        let name = partition_for(event.event_time);
        let seq = self.audit_seq.fetch_add(1, Ordering::SeqCst);
        self.audit_partitions.entry(name).or_default().push((seq, event));
    }

    /// Insert a tuple bypassing write-path validation and audit capture.
    /// Test and import helper only: the write path is the supported way to
    /// create tuples.
    pub fn insert_unvalidated(&self, namespace: &str, tuple: StoredTuple) {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .tuples
            .insert(tuple.key(), tuple);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthzStore for MemoryStore {
    async fn upsert_tuple(
        &self,
        namespace: &str,
        key: &TupleKey,
        expires_at: Option<DateTime<Utc>>,
        mut event: AuditEvent,
    ) -> Result<WriteOutcome> {
        let mut ns = self.namespaces.entry(namespace.to_string()).or_default();
        let outcome = match ns.tuples.get_mut(key) {
            Some(existing) => {
                existing.expires_at = expires_at;
                event.event_type = AuditEventType::TupleUpdated;
                WriteOutcome {
                    id: existing.id,
                    created: false,
                }
            }
            None => {
                let tuple = StoredTuple {
                    id: Uuid::new_v4(),
                    resource: key.resource.clone(),
                    relation: key.relation.clone(),
                    subject: key.subject.clone(),
                    expires_at,
                    created_at: Utc::now(),
                };
                let id = tuple.id;
                ns.tuples.insert(key.clone(), tuple);
                WriteOutcome { id, created: true }
            }
        };
        drop(ns);
        self.append_event(event, Some(outcome.id));
        Ok(outcome)
    }

    async fn upsert_tuples(
        &self,
        namespace: &str,
        rows: Vec<(TupleKey, Option<DateTime<Utc>>, AuditEvent)>,
    ) -> Result<u64> {
        let mut created = 0;
        for (key, expires_at, event) in rows {
            let outcome = self.upsert_tuple(namespace, &key, expires_at, event).await?;
            if outcome.created {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn delete_tuple(
        &self,
        namespace: &str,
        key: &TupleKey,
        mut event: AuditEvent,
    ) -> Result<Option<StoredTuple>> {
        let removed = self
            .namespaces
            .get_mut(namespace)
            .and_then(|mut ns| ns.tuples.remove(key));
        if let Some(ref tuple) = removed {
            event.expires_at = tuple.expires_at;
            self.append_event(event, Some(tuple.id));
        }
        Ok(removed)
    }

    async fn get_tuple(&self, namespace: &str, key: &TupleKey) -> Result<Option<StoredTuple>> {
        Ok(self
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.tuples.get(key).cloned()))
    }

    async fn find_tuples(
        &self,
        namespace: &str,
        filter: &TupleFilter,
    ) -> Result<Vec<StoredTuple>> {
        Ok(match self.namespaces.get(namespace) {
            Some(ns) => ns
                .tuples
                .values()
                .filter(|t| filter.matches(t))
                .cloned()
                .collect(),
            None => Vec::new(),
        })
    }

    async fn update_expiration(
        &self,
        namespace: &str,
        key: &TupleKey,
        expires_at: Option<DateTime<Utc>>,
        event: AuditEvent,
    ) -> Result<Option<StoredTuple>> {
        let updated = self.namespaces.get_mut(namespace).and_then(|mut ns| {
            ns.tuples.get_mut(key).map(|t| {
                t.expires_at = expires_at;
                t.clone()
            })
        });
        if let Some(ref tuple) = updated {
            self.append_event(event, Some(tuple.id));
        }
        Ok(updated)
    }

    async fn expiring_within(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<StoredTuple>> {
        let mut rows: Vec<StoredTuple> = match self.namespaces.get(namespace) {
            Some(ns) => ns
                .tuples
                .values()
                .filter(|t| matches!(t.expires_at, Some(e) if e > now && e <= until))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        rows.sort_by_key(|t| t.expires_at);
        Ok(rows)
    }

    async fn find_expired(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredTuple>> {
        Ok(match self.namespaces.get(namespace) {
            Some(ns) => ns
                .tuples
                .values()
                .filter(|t| t.is_expired(now))
                .cloned()
                .collect(),
            None => Vec::new(),
        })
    }

    async fn upsert_rule(
        &self,
        namespace: &str,
        resource_type: &str,
        permission: &str,
        implies: &str,
        event: AuditEvent,
    ) -> Result<WriteOutcome> {
        let rule_key = (
            resource_type.to_string(),
            permission.to_string(),
            implies.to_string(),
        );
        let mut ns = self.namespaces.entry(namespace.to_string()).or_default();
        if let Some(existing) = ns.rules.get(&rule_key) {
            // idempotent: no second event for an identical rule
            return Ok(WriteOutcome {
                id: existing.id,
                created: false,
            });
        }
        let rule = HierarchyRule {
            id: Uuid::new_v4(),
            resource_type: resource_type.to_string(),
            permission: permission.to_string(),
            implies: implies.to_string(),
        };
        let id = rule.id;
        ns.rules.insert(rule_key, rule);
        drop(ns);
        self.append_event(event, Some(id));
        Ok(WriteOutcome { id, created: true })
    }

    async fn delete_rule(
        &self,
        namespace: &str,
        resource_type: &str,
        permission: &str,
        implies: &str,
        event: AuditEvent,
    ) -> Result<bool> {
        let rule_key = (
            resource_type.to_string(),
            permission.to_string(),
            implies.to_string(),
        );
        let removed = self
            .namespaces
            .get_mut(namespace)
            .and_then(|mut ns| ns.rules.remove(&rule_key));
        if let Some(rule) = removed {
            self.append_event(event, Some(rule.id));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn rules_for(
        &self,
        namespace: &str,
        resource_type: &str,
    ) -> Result<Vec<HierarchyRule>> {
        Ok(match self.namespaces.get(namespace) {
            Some(ns) => ns
                .rules
                .values()
                .filter(|r| r.resource_type == resource_type)
                .cloned()
                .collect(),
            None => Vec::new(),
        })
    }

    async fn query_audit(&self, namespace: &str, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let mut rows: Vec<(u64, AuditEvent)> = Vec::new();
        for partition in self.audit_partitions.iter() {
            for (seq, event) in partition.value() {
                if event.namespace != namespace {
                    continue;
                }
                if let Some(t) = query.event_type {
                    if event.event_type != t {
                        continue;
                    }
                }
                if let Some(ref actor) = query.actor_id {
                    if event.actor_id.as_deref() != Some(actor.as_str()) {
                        continue;
                    }
                }
                if let Some(ref resource) = query.resource {
                    if event.resource_type != resource.resource_type
                        || event.resource_id.as_deref() != Some(resource.resource_id.as_str())
                    {
                        continue;
                    }
                }
                if let Some((ref st, ref si)) = query.subject {
                    if event.subject_type.as_deref() != Some(st.as_str())
                        || event.subject_id.as_deref() != Some(si.as_str())
                    {
                        continue;
                    }
                }
                rows.push((*seq, event.clone()));
            }
        }
        rows.sort_by(|a, b| (b.1.event_time, b.0).cmp(&(a.1.event_time, a.0)));
        Ok(rows
            .into_iter()
            .take(query.limit)
            .map(|(_, e)| e)
            .collect())
    }

    async fn create_audit_partition(&self, year: i32, month: u32) -> Result<Option<String>> {
        let name = crate::audit::partition_name(year, month);
        if self.audit_partitions.contains_key(&name) {
            return Ok(None);
        }
        self.audit_partitions.insert(name.clone(), Vec::new());
        Ok(Some(name))
    }

    async fn list_audit_partitions(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .audit_partitions
            .iter()
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn drop_audit_partition(&self, name: &str) -> Result<bool> {
        Ok(self.audit_partitions.remove(name).is_some())
    }

    async fn stats(&self, namespace: &str) -> Result<NamespaceStats> {
        Ok(match self.namespaces.get(namespace) {
            Some(ns) => {
                let mut users = HashSet::new();
                let mut resources = HashSet::new();
                for tuple in ns.tuples.values() {
                    if tuple.subject.is_user() {
                        users.insert(tuple.subject.subject_id.clone());
                    }
                    resources.insert((
                        tuple.resource.resource_type.clone(),
                        tuple.resource.resource_id.clone(),
                    ));
                }
                NamespaceStats {
                    tuple_count: ns.tuples.len() as u64,
                    hierarchy_rule_count: ns.rules.len() as u64,
                    distinct_users: users.len() as u64,
                    distinct_resources: resources.len() as u64,
                }
            }
            None => NamespaceStats::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceRef, SubjectRef};

    fn key(rt: &str, rid: &str, rel: &str, st: &str, sid: &str) -> TupleKey {
        TupleKey::new(
            ResourceRef::new(rt, rid),
            rel,
            SubjectRef::new(st, sid),
        )
    }

    fn event(namespace: &str, key: &TupleKey) -> AuditEvent {
        AuditEvent {
            event_id: Uuid::new_v4(),
            event_time: Utc::now(),
            event_type: AuditEventType::TupleCreated,
            namespace: namespace.to_string(),
            resource_type: key.resource.resource_type.clone(),
            resource_id: Some(key.resource.resource_id.clone()),
            relation: Some(key.relation.clone()),
            subject_type: Some(key.subject.subject_type.clone()),
            subject_id: Some(key.subject.subject_id.clone()),
            subject_relation: key.subject.relation.clone(),
            tuple_id: None,
            expires_at: None,
            actor_id: None,
            request_id: None,
            reason: None,
            ip_address: None,
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn upsert_is_stable_on_conflict() {
        let store = MemoryStore::new();
        let k = key("doc", "1", "read", "user", "alice");

        let first = store
            .upsert_tuple("acme", &k, None, event("acme", &k))
            .await
            .unwrap();
        assert!(first.created);

        let later = Utc::now() + chrono::Duration::hours(1);
        let second = store
            .upsert_tuple("acme", &k, Some(later), event("acme", &k))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(first.id, second.id);

        let stored = store.get_tuple("acme", &k).await.unwrap().unwrap();
        assert_eq!(stored.expires_at, Some(later));

        // the conflicting write was recorded as an update
        let events = store
            .query_audit("acme", &AuditQuery::new())
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::TupleUpdated);
        assert_eq!(events[1].event_type, AuditEventType::TupleCreated);
    }

    #[tokio::test]
    async fn namespaces_do_not_leak() {
        let store = MemoryStore::new();
        let k = key("doc", "1", "read", "user", "alice");
        store
            .upsert_tuple("acme", &k, None, event("acme", &k))
            .await
            .unwrap();

        assert!(store.get_tuple("other", &k).await.unwrap().is_none());
        assert!(store
            .find_tuples("other", &TupleFilter::new())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.stats("other").await.unwrap().tuple_count, 0);
    }

    #[tokio::test]
    async fn delete_of_absent_row_records_nothing() {
        let store = MemoryStore::new();
        let k = key("doc", "1", "read", "user", "alice");
        let removed = store
            .delete_tuple("acme", &k, event("acme", &k))
            .await
            .unwrap();
        assert!(removed.is_none());
        assert!(store
            .query_audit("acme", &AuditQuery::new())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn rule_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let ev = event("acme", &key("repo", "*", "admin", "permission", "write"));
        let first = store
            .upsert_rule("acme", "repo", "admin", "write", ev.clone())
            .await
            .unwrap();
        let second = store
            .upsert_rule("acme", "repo", "admin", "write", ev)
            .await
            .unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(store.rules_for("acme", "repo").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn partition_lifecycle() {
        let store = MemoryStore::new();
        let created = store.create_audit_partition(2026, 8).await.unwrap();
        assert_eq!(created.as_deref(), Some("audit_events_y2026m08"));
        assert!(store.create_audit_partition(2026, 8).await.unwrap().is_none());

        assert_eq!(
            store.list_audit_partitions().await.unwrap(),
            vec!["audit_events_y2026m08".to_string()]
        );
        assert!(store.drop_audit_partition("audit_events_y2026m08").await.unwrap());
        assert!(!store.drop_audit_partition("audit_events_y2026m08").await.unwrap());
    }

    #[tokio::test]
    async fn expiring_rows_sort_soonest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (id, days) in [("1", 3), ("2", 1), ("3", 2)] {
            let k = key("doc", id, "read", "user", "alice");
            store
                .upsert_tuple(
                    "acme",
                    &k,
                    Some(now + chrono::Duration::days(days)),
                    event("acme", &k),
                )
                .await
                .unwrap();
        }
        let rows = store
            .expiring_within("acme", now, now + chrono::Duration::days(7))
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|t| t.resource.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
    }
}
