//! The write path: validation, namespace serialization, cycle checks under
//! endpoint locks, upserts, and audit emission.
//!
//! Every mutation follows the same sequence: validate inputs, take the
//! namespace lock, take endpoint pair locks and run the cycle check when
//! the relation carries graph semantics, then hand the row and its audit
//! event to the store in one atomic call.

use crate::config::EngineConfig;
use crate::context::{ActorContext, RequestContext};
use crate::cycle::CycleDetector;
use crate::error::{AuthzError, Result};
use crate::graph::member_containment_edge;
use crate::locks::{endpoint_key, LockManager};
use crate::models::{
    AuditEvent, AuditEventType, CleanupReport, ResourceRef, SubjectRef, TupleKey, MEMBER_RELATION,
    PARENT_RELATION,
};
use crate::store::AuthzStore;
use crate::validation::{
    validate_expiration, validate_free_id, validate_id_array, validate_identifier,
    validate_namespace,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Build the audit event for a tuple mutation, carrying the actor context.
pub(crate) fn tuple_event(
    event_type: AuditEventType,
    namespace: &str,
    key: &TupleKey,
    expires_at: Option<DateTime<Utc>>,
    actor: &ActorContext,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4(),
        event_time: Utc::now(),
        event_type,
        namespace: namespace.to_string(),
        resource_type: key.resource.resource_type.clone(),
        resource_id: Some(key.resource.resource_id.clone()),
        relation: Some(key.relation.clone()),
        subject_type: Some(key.subject.subject_type.clone()),
        subject_id: Some(key.subject.subject_id.clone()),
        subject_relation: key.subject.relation.clone(),
        tuple_id: None,
        expires_at,
        actor_id: actor.actor_id.clone(),
        request_id: actor.request_id.clone(),
        reason: actor.reason.clone(),
        ip_address: actor.ip_address,
        user_agent: actor.user_agent.clone(),
    }
}

/// Build the audit event for a hierarchy-rule mutation. The permission
/// lands in `relation` and the implied permission in `subject_id`.
pub(crate) fn rule_event(
    event_type: AuditEventType,
    namespace: &str,
    resource_type: &str,
    permission: &str,
    implies: &str,
    actor: &ActorContext,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4(),
        event_time: Utc::now(),
        event_type,
        namespace: namespace.to_string(),
        resource_type: resource_type.to_string(),
        resource_id: None,
        relation: Some(permission.to_string()),
        subject_type: Some("permission".to_string()),
        subject_id: Some(implies.to_string()),
        subject_relation: None,
        tuple_id: None,
        expires_at: None,
        actor_id: actor.actor_id.clone(),
        request_id: actor.request_id.clone(),
        reason: actor.reason.clone(),
        ip_address: actor.ip_address,
        user_agent: actor.user_agent.clone(),
    }
}

pub(crate) fn validate_tuple_parts(
    resource: &ResourceRef,
    relation: &str,
    subject: &SubjectRef,
    namespace: &str,
) -> Result<()> {
    validate_namespace("namespace", namespace)?;
    validate_identifier("resource_type", &resource.resource_type)?;
    validate_free_id("resource_id", &resource.resource_id)?;
    validate_identifier("relation", relation)?;
    validate_identifier("subject_type", &subject.subject_type)?;
    validate_free_id("subject_id", &subject.subject_id)?;
    if let Some(ref sr) = subject.relation {
        validate_identifier("subject_relation", sr)?;
    }
    Ok(())
}

pub struct TupleWriter {
    store: Arc<dyn AuthzStore>,
    locks: Arc<LockManager>,
    cycles: CycleDetector,
}

impl TupleWriter {
    pub fn new(
        store: Arc<dyn AuthzStore>,
        config: Arc<EngineConfig>,
        locks: Arc<LockManager>,
    ) -> Self {
        let cycles = CycleDetector::new(store.clone(), config);
        Self {
            store,
            locks,
            cycles,
        }
    }

    /// Upsert one tuple. On conflict the expiration is replaced, which is
    /// how expiration is set or cleared atomically with a write.
    pub async fn write_tuple(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        resource: &ResourceRef,
        relation: &str,
        subject: &SubjectRef,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Uuid> {
        validate_tuple_parts(resource, relation, subject, namespace)?;
        validate_expiration("expires_at", expires_at, Utc::now())?;

        let key = TupleKey::new(resource.clone(), relation, subject.clone());
        let _ns_guard = self.locks.lock_namespace(namespace).await;
        let _pair_guard = self.check_reserved_edge(namespace, &key).await?;

        let event = tuple_event(
            AuditEventType::TupleCreated,
            namespace,
            &key,
            expires_at,
            ctx.actor(),
        );
        let outcome = self
            .store
            .upsert_tuple(namespace, &key, expires_at, event)
            .await?;
        info!(
            namespace,
            tuple = %key,
            created = outcome.created,
            "Wrote relationship tuple"
        );
        Ok(outcome.id)
    }

    /// Cycle-check a reserved-relation edge, holding the endpoint pair
    /// locks until the caller's upsert commits.
    async fn check_reserved_edge(
        &self,
        namespace: &str,
        key: &TupleKey,
    ) -> Result<Option<crate::locks::PairGuard>> {
        let resource = &key.resource;
        let subject = &key.subject;
        if member_containment_edge(&key.relation, &subject.subject_type) {
            let guard = self
                .locks
                .lock_pair(
                    &endpoint_key(namespace, "group", &subject.subject_type, &subject.subject_id),
                    &endpoint_key(
                        namespace,
                        "group",
                        &resource.resource_type,
                        &resource.resource_id,
                    ),
                )
                .await;
            self.cycles
                .check_group_edge(
                    namespace,
                    (&subject.subject_type, &subject.subject_id),
                    (&resource.resource_type, &resource.resource_id),
                )
                .await?;
            return Ok(Some(guard));
        }
        if key.relation == PARENT_RELATION {
            let guard = self
                .locks
                .lock_pair(
                    &endpoint_key(
                        namespace,
                        "resource",
                        &resource.resource_type,
                        &resource.resource_id,
                    ),
                    &endpoint_key(namespace, "resource", &subject.subject_type, &subject.subject_id),
                )
                .await;
            self.cycles
                .check_parent_edge(
                    namespace,
                    (&resource.resource_type, &resource.resource_id),
                    (&subject.subject_type, &subject.subject_id),
                )
                .await?;
            return Ok(Some(guard));
        }
        Ok(None)
    }

    /// Delete by exact key. Absent tuples return `false` and emit nothing.
    pub async fn delete_tuple(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        resource: &ResourceRef,
        relation: &str,
        subject: &SubjectRef,
    ) -> Result<bool> {
        validate_tuple_parts(resource, relation, subject, namespace)?;
        let key = TupleKey::new(resource.clone(), relation, subject.clone());
        let _ns_guard = self.locks.lock_namespace(namespace).await;

        let event = tuple_event(
            AuditEventType::TupleDeleted,
            namespace,
            &key,
            None,
            ctx.actor(),
        );
        let removed = self.store.delete_tuple(namespace, &key, event).await?;
        if removed.is_some() {
            info!(namespace, tuple = %key, "Deleted relationship tuple");
        }
        Ok(removed.is_some())
    }

    /// Insert many subjects onto one resource with a single validation pass
    /// and a single lock acquisition. Refused for relations that carry
    /// graph semantics, since those need per-edge cycle analysis.
    pub async fn write_tuples_bulk(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        resource: &ResourceRef,
        relation: &str,
        subject_type: &str,
        subject_ids: &[String],
    ) -> Result<u64> {
        validate_namespace("namespace", namespace)?;
        validate_identifier("resource_type", &resource.resource_type)?;
        validate_free_id("resource_id", &resource.resource_id)?;
        validate_identifier("relation", relation)?;
        validate_identifier("subject_type", subject_type)?;
        validate_id_array("subject_ids", subject_ids)?;
        self.refuse_reserved_bulk("write_tuples_bulk", relation, subject_type)?;

        let _ns_guard = self.locks.lock_namespace(namespace).await;
        let rows = subject_ids
            .iter()
            .map(|id| {
                let key = TupleKey::new(
                    resource.clone(),
                    relation,
                    SubjectRef::new(subject_type, id),
                );
                let event = tuple_event(
                    AuditEventType::TupleCreated,
                    namespace,
                    &key,
                    None,
                    ctx.actor(),
                );
                (key, None, event)
            })
            .collect();
        let created = self.store.upsert_tuples(namespace, rows).await?;
        info!(
            namespace,
            resource = %resource,
            relation,
            subjects = subject_ids.len(),
            created,
            "Bulk-wrote relationship tuples"
        );
        Ok(created)
    }

    /// Insert one subject onto many resources in a single pass. Same
    /// reserved-relation refusal as `write_tuples_bulk`.
    pub async fn grant_to_resources_bulk(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        resource_type: &str,
        resource_ids: &[String],
        relation: &str,
        subject: &SubjectRef,
    ) -> Result<u64> {
        validate_namespace("namespace", namespace)?;
        validate_identifier("resource_type", resource_type)?;
        validate_id_array("resource_ids", resource_ids)?;
        validate_identifier("relation", relation)?;
        validate_identifier("subject_type", &subject.subject_type)?;
        validate_free_id("subject_id", &subject.subject_id)?;
        if let Some(ref sr) = subject.relation {
            validate_identifier("subject_relation", sr)?;
        }
        self.refuse_reserved_bulk("grant_to_resources_bulk", relation, &subject.subject_type)?;

        let _ns_guard = self.locks.lock_namespace(namespace).await;
        let rows = resource_ids
            .iter()
            .map(|id| {
                let key = TupleKey::new(
                    ResourceRef::new(resource_type, id),
                    relation,
                    subject.clone(),
                );
                let event = tuple_event(
                    AuditEventType::TupleCreated,
                    namespace,
                    &key,
                    None,
                    ctx.actor(),
                );
                (key, None, event)
            })
            .collect();
        let created = self.store.upsert_tuples(namespace, rows).await?;
        info!(
            namespace,
            resource_type,
            relation,
            resources = resource_ids.len(),
            created,
            "Bulk-granted to resources"
        );
        Ok(created)
    }

    fn refuse_reserved_bulk(
        &self,
        operation: &str,
        relation: &str,
        subject_type: &str,
    ) -> Result<()> {
        if relation == MEMBER_RELATION && subject_type != crate::models::USER_SUBJECT_TYPE {
            return Err(AuthzError::Unsupported {
                operation: operation.to_string(),
                cause: "cannot create group-to-group memberships in bulk".to_string(),
            });
        }
        if relation == PARENT_RELATION {
            return Err(AuthzError::Unsupported {
                operation: operation.to_string(),
                cause: "cannot create parent relations in bulk".to_string(),
            });
        }
        Ok(())
    }

    /// Add one implication rule, refusing self-implication and cycles.
    pub async fn add_hierarchy(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        resource_type: &str,
        permission: &str,
        implies: &str,
    ) -> Result<Uuid> {
        validate_namespace("namespace", namespace)?;
        validate_identifier("resource_type", resource_type)?;
        validate_identifier("permission", permission)?;
        validate_identifier("implies", implies)?;

        let _ns_guard = self.locks.lock_namespace(namespace).await;
        let _pair_guard = self
            .locks
            .lock_pair(
                &endpoint_key(namespace, "perm", resource_type, permission),
                &endpoint_key(namespace, "perm", resource_type, implies),
            )
            .await;
        self.cycles
            .check_hierarchy_edge(namespace, resource_type, permission, implies)
            .await?;

        let event = rule_event(
            AuditEventType::HierarchyCreated,
            namespace,
            resource_type,
            permission,
            implies,
            ctx.actor(),
        );
        let outcome = self
            .store
            .upsert_rule(namespace, resource_type, permission, implies, event)
            .await?;
        info!(
            namespace,
            resource_type, permission, implies, "Added hierarchy rule"
        );
        Ok(outcome.id)
    }

    pub async fn remove_hierarchy(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        resource_type: &str,
        permission: &str,
        implies: &str,
    ) -> Result<bool> {
        validate_namespace("namespace", namespace)?;
        validate_identifier("resource_type", resource_type)?;
        validate_identifier("permission", permission)?;
        validate_identifier("implies", implies)?;

        let _ns_guard = self.locks.lock_namespace(namespace).await;
        let event = rule_event(
            AuditEventType::HierarchyDeleted,
            namespace,
            resource_type,
            permission,
            implies,
            ctx.actor(),
        );
        let removed = self
            .store
            .delete_rule(namespace, resource_type, permission, implies, event)
            .await?;
        if removed {
            info!(
                namespace,
                resource_type, permission, implies, "Removed hierarchy rule"
            );
        }
        Ok(removed)
    }

    /// Remove every rule for a resource type, one deletion event per rule.
    pub async fn clear_hierarchy(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        resource_type: &str,
    ) -> Result<u64> {
        validate_namespace("namespace", namespace)?;
        validate_identifier("resource_type", resource_type)?;

        let _ns_guard = self.locks.lock_namespace(namespace).await;
        let rules = self.store.rules_for(namespace, resource_type).await?;
        let mut removed = 0u64;
        for rule in rules {
            let event = rule_event(
                AuditEventType::HierarchyDeleted,
                namespace,
                resource_type,
                &rule.permission,
                &rule.implies,
                ctx.actor(),
            );
            if self
                .store
                .delete_rule(namespace, resource_type, &rule.permission, &rule.implies, event)
                .await?
            {
                removed += 1;
            }
        }
        info!(namespace, resource_type, removed, "Cleared hierarchy rules");
        Ok(removed)
    }

    /// Physically reclaim expired tuples, one deletion event per row.
    pub async fn cleanup_expired(
        &self,
        ctx: &RequestContext,
        namespace: &str,
    ) -> Result<CleanupReport> {
        validate_namespace("namespace", namespace)?;
        let _ns_guard = self.locks.lock_namespace(namespace).await;

        let now = Utc::now();
        let mut report = CleanupReport::default();
        for tuple in self.store.find_expired(namespace, now).await? {
            let key = tuple.key();
            let event = tuple_event(
                AuditEventType::TupleDeleted,
                namespace,
                &key,
                None,
                ctx.actor(),
            );
            if self.store.delete_tuple(namespace, &key, event).await?.is_some() {
                report.tuples_deleted += 1;
            }
        }
        info!(
            namespace,
            deleted = report.tuples_deleted,
            "Reclaimed expired tuples"
        );
        Ok(report)
    }
}
