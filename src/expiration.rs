//! Expiration management for time-bound grants.
//!
//! The evaluator filters expired tuples at query time, so everything here
//! is bookkeeping: adjusting `expires_at` on existing grants, listing what
//! lapses soon, and (in the write path) physically reclaiming dead rows.

use crate::context::RequestContext;
use crate::error::{AuthzError, Result};
use crate::locks::LockManager;
use crate::models::{
    AuditEventType, ExpiringGrant, ResourceRef, SubjectRef, TupleKey,
};
use crate::store::AuthzStore;
use crate::validation::{validate_expiration, validate_interval, validate_namespace};
use crate::write::{tuple_event, validate_tuple_parts};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;

pub struct ExpirationManager {
    store: Arc<dyn AuthzStore>,
    locks: Arc<LockManager>,
}

impl ExpirationManager {
    pub fn new(store: Arc<dyn AuthzStore>, locks: Arc<LockManager>) -> Self {
        Self { store, locks }
    }

    /// Set or replace the expiration on an existing grant. `None` makes it
    /// permanent. Returns whether the grant existed.
    pub async fn set_expiration(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        resource: &ResourceRef,
        relation: &str,
        subject: &SubjectRef,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        validate_tuple_parts(resource, relation, subject, namespace)?;
        validate_expiration("expires_at", expires_at, Utc::now())?;

        let key = TupleKey::new(resource.clone(), relation, subject.clone());
        let _ns_guard = self.locks.lock_namespace(namespace).await;

        let event = tuple_event(
            AuditEventType::TupleUpdated,
            namespace,
            &key,
            expires_at,
            ctx.actor(),
        );
        let updated = self
            .store
            .update_expiration(namespace, &key, expires_at, event)
            .await?;
        if updated.is_some() {
            info!(namespace, tuple = %key, expires_at = ?expires_at, "Updated expiration");
        }
        Ok(updated.is_some())
    }

    /// Make a grant permanent.
    pub async fn clear_expiration(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        resource: &ResourceRef,
        relation: &str,
        subject: &SubjectRef,
    ) -> Result<bool> {
        self.set_expiration(ctx, namespace, resource, relation, subject, None)
            .await
    }

    /// Push an existing expiration out by `extension`. An expiration
    /// already in the past extends from now; a grant with no expiration is
    /// an error, as is an absent grant.
    pub async fn extend_expiration(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        resource: &ResourceRef,
        relation: &str,
        subject: &SubjectRef,
        extension: Duration,
    ) -> Result<DateTime<Utc>> {
        validate_tuple_parts(resource, relation, subject, namespace)?;
        validate_interval("extension", extension)?;

        let key = TupleKey::new(resource.clone(), relation, subject.clone());
        let _ns_guard = self.locks.lock_namespace(namespace).await;

        let current = self
            .store
            .get_tuple(namespace, &key)
            .await?
            .ok_or_else(|| AuthzError::not_found("extend_expiration", key.to_string()))?;
        let Some(expires_at) = current.expires_at else {
            return Err(AuthzError::invalid(
                "extend_expiration",
                "grant has no expiration to extend",
            ));
        };

        let now = Utc::now();
        let base = if expires_at <= now { now } else { expires_at };
        let new_expires = base + extension;

        let event = tuple_event(
            AuditEventType::TupleUpdated,
            namespace,
            &key,
            Some(new_expires),
            ctx.actor(),
        );
        self.store
            .update_expiration(namespace, &key, Some(new_expires), event)
            .await?;
        info!(namespace, tuple = %key, %new_expires, "Extended expiration");
        Ok(new_expires)
    }

    /// Grants expiring within the window, soonest first. Already-expired
    /// and permanent grants are excluded.
    pub async fn list_expiring(
        &self,
        namespace: &str,
        within: Duration,
    ) -> Result<Vec<ExpiringGrant>> {
        validate_namespace("namespace", namespace)?;
        validate_interval("within", within)?;

        let now = Utc::now();
        let rows = self
            .store
            .expiring_within(namespace, now, now + within)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|t| {
                t.expires_at.map(|expires_at| ExpiringGrant {
                    expires_at,
                    resource: t.resource,
                    relation: t.relation,
                    subject: t.subject,
                })
            })
            .collect())
    }
}
