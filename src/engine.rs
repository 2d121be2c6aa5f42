//! The authorization engine facade.
//!
//! Wires the write path, evaluator, listers, explainer, expiration manager,
//! audit lifecycle, and maintenance over one store, and enforces tenant
//! isolation at the boundary: every operation takes a [`RequestContext`]
//! and a namespace, and the namespace must match the context's active
//! tenant. Without a match, reads come back empty and writes are refused,
//! as if the rows did not exist.

use crate::audit::AuditMaintenance;
use crate::check::PermissionChecker;
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::error::{AuthzError, Result};
use crate::expiration::ExpirationManager;
use crate::explain::Explainer;
use crate::listing::Lister;
use crate::locks::LockManager;
use crate::maintenance::Maintenance;
use crate::models::{
    AuditEvent, AuditQuery, CleanupReport, ExpiringGrant, ExplainPath, IntegrityIssue,
    NamespaceStats, ResourceRef, SubjectRef,
};
use crate::store::AuthzStore;
use crate::write::TupleWriter;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub struct AuthzEngine {
    store: Arc<dyn AuthzStore>,
    writer: TupleWriter,
    checker: PermissionChecker,
    lister: Lister,
    explainer: Explainer,
    expiration: ExpirationManager,
    audit: AuditMaintenance,
    maintenance: Maintenance,
}

impl AuthzEngine {
    pub fn new(store: Arc<dyn AuthzStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn AuthzStore>, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let locks = Arc::new(LockManager::new());
        Self {
            writer: TupleWriter::new(store.clone(), config.clone(), locks.clone()),
            checker: PermissionChecker::new(store.clone(), config.clone()),
            lister: Lister::new(store.clone(), config.clone()),
            explainer: Explainer::new(store.clone(), config.clone()),
            expiration: ExpirationManager::new(store.clone(), locks),
            audit: AuditMaintenance::new(store.clone(), config.clone()),
            maintenance: Maintenance::new(store.clone(), config),
            store,
        }
    }

    /// Tenant guard for reads: `None` means the caller sees nothing.
    fn read_namespace<'a>(&self, ctx: &'a RequestContext, namespace: &str) -> Option<&'a str> {
        match ctx.tenant() {
            Some(tenant) if tenant == namespace => Some(tenant),
            Some(tenant) => {
                warn!(
                    tenant,
                    namespace,
                    "Namespace argument disagrees with active tenant; results will be empty"
                );
                None
            }
            None => None,
        }
    }

    /// Tenant guard for writes: a mismatch or missing tenant fails the
    /// operation outright.
    fn write_namespace(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        operation: &str,
    ) -> Result<()> {
        match ctx.tenant() {
            Some(tenant) if tenant == namespace => Ok(()),
            Some(tenant) => {
                warn!(
                    tenant,
                    namespace, operation, "Write refused: namespace is outside the active tenant"
                );
                Err(AuthzError::TenantRequired {
                    operation: operation.to_string(),
                })
            }
            None => Err(AuthzError::TenantRequired {
                operation: operation.to_string(),
            }),
        }
    }

    // =====================================================================
    // Tuple API
    // =====================================================================

    /// Upsert one relationship tuple; returns its id. On conflict the
    /// expiration is replaced with the new value.
    pub async fn write_tuple(
        &self,
        ctx: &RequestContext,
        resource: &ResourceRef,
        relation: &str,
        subject: &SubjectRef,
        namespace: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Uuid> {
        self.write_namespace(ctx, namespace, "write_tuple")?;
        self.writer
            .write_tuple(ctx, namespace, resource, relation, subject, expires_at)
            .await
    }

    /// Convenience variant taking a bare `(subject_type, subject_id)` pair
    /// without a userset relation.
    pub async fn write(
        &self,
        ctx: &RequestContext,
        resource: &ResourceRef,
        relation: &str,
        subject_type: &str,
        subject_id: &str,
        namespace: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Uuid> {
        self.write_tuple(
            ctx,
            resource,
            relation,
            &SubjectRef::new(subject_type, subject_id),
            namespace,
            expires_at,
        )
        .await
    }

    pub async fn delete_tuple(
        &self,
        ctx: &RequestContext,
        resource: &ResourceRef,
        relation: &str,
        subject: &SubjectRef,
        namespace: &str,
    ) -> Result<bool> {
        self.write_namespace(ctx, namespace, "delete_tuple")?;
        self.writer
            .delete_tuple(ctx, namespace, resource, relation, subject)
            .await
    }

    pub async fn delete(
        &self,
        ctx: &RequestContext,
        resource: &ResourceRef,
        relation: &str,
        subject_type: &str,
        subject_id: &str,
        namespace: &str,
    ) -> Result<bool> {
        self.delete_tuple(
            ctx,
            resource,
            relation,
            &SubjectRef::new(subject_type, subject_id),
            namespace,
        )
        .await
    }

    /// Grant one relation on one resource to many subjects at once.
    /// Refused for reserved relations that need per-edge cycle analysis.
    pub async fn write_tuples_bulk(
        &self,
        ctx: &RequestContext,
        resource: &ResourceRef,
        relation: &str,
        subject_type: &str,
        subject_ids: &[String],
        namespace: &str,
    ) -> Result<u64> {
        self.write_namespace(ctx, namespace, "write_tuples_bulk")?;
        self.writer
            .write_tuples_bulk(ctx, namespace, resource, relation, subject_type, subject_ids)
            .await
    }

    /// Grant one subject a relation on many resources at once.
    pub async fn grant_to_resources_bulk(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        resource_ids: &[String],
        relation: &str,
        subject: &SubjectRef,
        namespace: &str,
    ) -> Result<u64> {
        self.write_namespace(ctx, namespace, "grant_to_resources_bulk")?;
        self.writer
            .grant_to_resources_bulk(ctx, namespace, resource_type, resource_ids, relation, subject)
            .await
    }

    // =====================================================================
    // Query API
    // =====================================================================

    pub async fn check(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        permission: &str,
        resource_type: &str,
        resource_id: &str,
        namespace: &str,
    ) -> Result<bool> {
        let Some(ns) = self.read_namespace(ctx, namespace) else {
            return Ok(false);
        };
        self.checker
            .check(ns, user_id, permission, &ResourceRef::new(resource_type, resource_id))
            .await
    }

    pub async fn check_any(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        permissions: &[String],
        resource_type: &str,
        resource_id: &str,
        namespace: &str,
    ) -> Result<bool> {
        let Some(ns) = self.read_namespace(ctx, namespace) else {
            return Ok(false);
        };
        self.checker
            .check_any(ns, user_id, permissions, &ResourceRef::new(resource_type, resource_id))
            .await
    }

    pub async fn check_all(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        permissions: &[String],
        resource_type: &str,
        resource_id: &str,
        namespace: &str,
    ) -> Result<bool> {
        let Some(ns) = self.read_namespace(ctx, namespace) else {
            // an empty request set is vacuously satisfied even here
            return Ok(permissions.is_empty());
        };
        self.checker
            .check_all(ns, user_id, permissions, &ResourceRef::new(resource_type, resource_id))
            .await
    }

    pub async fn list_resources(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        resource_type: &str,
        permission: &str,
        namespace: &str,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<Vec<String>> {
        let Some(ns) = self.read_namespace(ctx, namespace) else {
            return Ok(Vec::new());
        };
        self.lister
            .list_resources(ns, user_id, resource_type, permission, limit, cursor)
            .await
    }

    pub async fn list_users(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        resource_id: &str,
        permission: &str,
        namespace: &str,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<Vec<String>> {
        let Some(ns) = self.read_namespace(ctx, namespace) else {
            return Ok(Vec::new());
        };
        self.lister
            .list_users(ns, resource_type, resource_id, permission, limit, cursor)
            .await
    }

    pub async fn filter_authorized(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        resource_type: &str,
        permission: &str,
        resource_ids: &[String],
        namespace: &str,
    ) -> Result<Vec<String>> {
        let Some(ns) = self.read_namespace(ctx, namespace) else {
            return Ok(Vec::new());
        };
        self.checker
            .filter_authorized(ns, user_id, resource_type, permission, resource_ids)
            .await
    }

    pub async fn explain(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        permission: &str,
        resource_type: &str,
        resource_id: &str,
        namespace: &str,
        max_depth: Option<usize>,
    ) -> Result<Vec<ExplainPath>> {
        let Some(ns) = self.read_namespace(ctx, namespace) else {
            return Ok(Vec::new());
        };
        self.explainer
            .explain(
                ns,
                user_id,
                permission,
                &ResourceRef::new(resource_type, resource_id),
                max_depth,
            )
            .await
    }

    pub async fn explain_text(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        permission: &str,
        resource_type: &str,
        resource_id: &str,
        namespace: &str,
    ) -> Result<Vec<String>> {
        let Some(ns) = self.read_namespace(ctx, namespace) else {
            return Ok(Vec::new());
        };
        self.explainer
            .explain_text(
                ns,
                user_id,
                permission,
                &ResourceRef::new(resource_type, resource_id),
                None,
            )
            .await
    }

    // =====================================================================
    // Hierarchy API
    // =====================================================================

    pub async fn add_hierarchy(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        permission: &str,
        implies: &str,
        namespace: &str,
    ) -> Result<Uuid> {
        self.write_namespace(ctx, namespace, "add_hierarchy")?;
        self.writer
            .add_hierarchy(ctx, namespace, resource_type, permission, implies)
            .await
    }

    pub async fn remove_hierarchy(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        permission: &str,
        implies: &str,
        namespace: &str,
    ) -> Result<bool> {
        self.write_namespace(ctx, namespace, "remove_hierarchy")?;
        self.writer
            .remove_hierarchy(ctx, namespace, resource_type, permission, implies)
            .await
    }

    pub async fn clear_hierarchy(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        namespace: &str,
    ) -> Result<u64> {
        self.write_namespace(ctx, namespace, "clear_hierarchy")?;
        self.writer.clear_hierarchy(ctx, namespace, resource_type).await
    }

    // =====================================================================
    // Expiration API
    // =====================================================================

    pub async fn set_expiration(
        &self,
        ctx: &RequestContext,
        resource: &ResourceRef,
        relation: &str,
        subject: &SubjectRef,
        expires_at: Option<DateTime<Utc>>,
        namespace: &str,
    ) -> Result<bool> {
        self.write_namespace(ctx, namespace, "set_expiration")?;
        self.expiration
            .set_expiration(ctx, namespace, resource, relation, subject, expires_at)
            .await
    }

    pub async fn clear_expiration(
        &self,
        ctx: &RequestContext,
        resource: &ResourceRef,
        relation: &str,
        subject: &SubjectRef,
        namespace: &str,
    ) -> Result<bool> {
        self.write_namespace(ctx, namespace, "clear_expiration")?;
        self.expiration
            .clear_expiration(ctx, namespace, resource, relation, subject)
            .await
    }

    pub async fn extend_expiration(
        &self,
        ctx: &RequestContext,
        resource: &ResourceRef,
        relation: &str,
        subject: &SubjectRef,
        extension: Duration,
        namespace: &str,
    ) -> Result<DateTime<Utc>> {
        self.write_namespace(ctx, namespace, "extend_expiration")?;
        self.expiration
            .extend_expiration(ctx, namespace, resource, relation, subject, extension)
            .await
    }

    pub async fn list_expiring(
        &self,
        ctx: &RequestContext,
        within: Duration,
        namespace: &str,
    ) -> Result<Vec<ExpiringGrant>> {
        let Some(ns) = self.read_namespace(ctx, namespace) else {
            return Ok(Vec::new());
        };
        self.expiration.list_expiring(ns, within).await
    }

    pub async fn cleanup_expired(
        &self,
        ctx: &RequestContext,
        namespace: &str,
    ) -> Result<CleanupReport> {
        self.write_namespace(ctx, namespace, "cleanup_expired")?;
        self.writer.cleanup_expired(ctx, namespace).await
    }

    // =====================================================================
    // Audit & maintenance API
    // =====================================================================

    pub async fn get_audit_events(
        &self,
        ctx: &RequestContext,
        query: &AuditQuery,
        namespace: &str,
    ) -> Result<Vec<AuditEvent>> {
        let Some(ns) = self.read_namespace(ctx, namespace) else {
            return Ok(Vec::new());
        };
        self.store.query_audit(ns, query).await
    }

    pub async fn ensure_audit_partitions(
        &self,
        months_ahead: Option<u32>,
    ) -> Result<Vec<String>> {
        self.audit.ensure_partitions(months_ahead).await
    }

    pub async fn drop_audit_partitions(
        &self,
        older_than_months: Option<u32>,
    ) -> Result<Vec<String>> {
        self.audit.drop_partitions(older_than_months).await
    }

    pub async fn create_audit_partition(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Option<String>> {
        self.audit.create_partition(year, month).await
    }

    pub async fn get_stats(
        &self,
        ctx: &RequestContext,
        namespace: &str,
    ) -> Result<NamespaceStats> {
        let Some(ns) = self.read_namespace(ctx, namespace) else {
            return Ok(NamespaceStats::default());
        };
        self.maintenance.get_stats(ns).await
    }

    pub async fn verify_integrity(
        &self,
        ctx: &RequestContext,
        namespace: &str,
    ) -> Result<Vec<IntegrityIssue>> {
        let Some(ns) = self.read_namespace(ctx, namespace) else {
            return Ok(Vec::new());
        };
        self.maintenance.verify_integrity(ns).await
    }
}
