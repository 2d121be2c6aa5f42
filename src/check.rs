//! Permission evaluation: the lazy evaluator over memberships, resource
//! ancestors, grants, and the hierarchy fixed point.
//!
//! A check runs in four steps: expand the user's nested-group memberships,
//! expand the target's containment ancestors, collect the relations the
//! user holds on any ancestor (directly or through a matching group), then
//! close that set under the target type's implication rules and test
//! membership. Expired tuples never contribute; no caching, so hierarchy
//! changes are visible immediately.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::{membership_matches, Ancestor, GraphWalker, Membership};
use crate::models::ResourceRef;
use crate::store::{AuthzStore, TupleFilter};
use crate::validation::{validate_free_id, validate_identifier};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

pub struct PermissionChecker {
    store: Arc<dyn AuthzStore>,
    graph: GraphWalker,
}

impl PermissionChecker {
    pub fn new(store: Arc<dyn AuthzStore>, config: Arc<EngineConfig>) -> Self {
        let graph = GraphWalker::new(store.clone(), config);
        Self { store, graph }
    }

    /// Does the user hold `permission` on the resource?
    pub async fn check(
        &self,
        namespace: &str,
        user_id: &str,
        permission: &str,
        resource: &ResourceRef,
    ) -> Result<bool> {
        validate_free_id("user_id", user_id)?;
        validate_identifier("permission", permission)?;
        validate_identifier("resource_type", &resource.resource_type)?;
        validate_free_id("resource_id", &resource.resource_id)?;

        let now = Utc::now();
        let effective = self
            .effective_permissions(namespace, user_id, resource, now)
            .await?;
        let allowed = effective.contains(permission);
        debug!(
            namespace,
            user_id,
            permission,
            resource = %resource,
            allowed,
            "Permission check"
        );
        Ok(allowed)
    }

    /// Does the user hold at least one of `permissions`? Empty set: no.
    pub async fn check_any(
        &self,
        namespace: &str,
        user_id: &str,
        permissions: &[String],
        resource: &ResourceRef,
    ) -> Result<bool> {
        if permissions.is_empty() {
            return Ok(false);
        }
        validate_free_id("user_id", user_id)?;
        for (i, p) in permissions.iter().enumerate() {
            validate_identifier(&format!("permissions[{i}]"), p)?;
        }
        validate_identifier("resource_type", &resource.resource_type)?;
        validate_free_id("resource_id", &resource.resource_id)?;

        let effective = self
            .effective_permissions(namespace, user_id, resource, Utc::now())
            .await?;
        Ok(permissions.iter().any(|p| effective.contains(p)))
    }

    /// Does the user hold every one of `permissions`? Empty set: yes.
    pub async fn check_all(
        &self,
        namespace: &str,
        user_id: &str,
        permissions: &[String],
        resource: &ResourceRef,
    ) -> Result<bool> {
        if permissions.is_empty() {
            return Ok(true);
        }
        validate_free_id("user_id", user_id)?;
        for (i, p) in permissions.iter().enumerate() {
            validate_identifier(&format!("permissions[{i}]"), p)?;
        }
        validate_identifier("resource_type", &resource.resource_type)?;
        validate_free_id("resource_id", &resource.resource_id)?;

        let effective = self
            .effective_permissions(namespace, user_id, resource, Utc::now())
            .await?;
        Ok(permissions.iter().all(|p| effective.contains(p)))
    }

    /// The subset of `resource_ids` the user holds `permission` on.
    ///
    /// Memberships and the implication closure are computed once; each
    /// candidate costs one ancestor walk. Practical guidance is to keep
    /// batches at or below ~1000 candidates.
    pub async fn filter_authorized(
        &self,
        namespace: &str,
        user_id: &str,
        resource_type: &str,
        permission: &str,
        resource_ids: &[String],
    ) -> Result<Vec<String>> {
        if resource_ids.is_empty() {
            return Ok(Vec::new());
        }
        validate_free_id("user_id", user_id)?;
        validate_identifier("resource_type", resource_type)?;
        validate_identifier("permission", permission)?;
        for (i, id) in resource_ids.iter().enumerate() {
            validate_free_id(&format!("resource_ids[{i}]"), id)?;
        }

        let now = Utc::now();
        let memberships = self
            .graph
            .expand_memberships(namespace, user_id, now, None)
            .await?;
        let granting = self
            .graph
            .inverse_closure(namespace, resource_type, permission)
            .await?;

        let mut authorized = Vec::new();
        for id in resource_ids {
            let resource = ResourceRef::new(resource_type, id);
            if self
                .holds_any_of(namespace, user_id, &memberships, &granting, &resource, now)
                .await?
            {
                authorized.push(id.clone());
            }
        }
        Ok(authorized)
    }

    /// All permissions the user effectively holds on the resource: grants
    /// collected over the ancestor chain, closed under the target type's
    /// hierarchy rules.
    pub(crate) async fn effective_permissions(
        &self,
        namespace: &str,
        user_id: &str,
        resource: &ResourceRef,
        now: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let memberships = self
            .graph
            .expand_memberships(namespace, user_id, now, None)
            .await?;
        let ancestors = self
            .graph
            .expand_ancestors(namespace, resource, now, None)
            .await?;
        let granted = self
            .granted_relations(namespace, user_id, &memberships, &ancestors, now)
            .await?;
        self.graph
            .closure(namespace, &resource.resource_type, &granted)
            .await
    }

    /// Relations the user holds on any of the given ancestors, directly or
    /// through a membership whose relation satisfies the grant's userset.
    async fn granted_relations(
        &self,
        namespace: &str,
        user_id: &str,
        memberships: &[Membership],
        ancestors: &[Ancestor],
        now: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let mut granted = HashSet::new();
        for ancestor in ancestors {
            let filter = TupleFilter::new()
                .with_resource(
                    &ancestor.resource.resource_type,
                    &ancestor.resource.resource_id,
                )
                .as_of(now);
            for tuple in self.store.find_tuples(namespace, &filter).await? {
                if tuple.subject.is_user() {
                    if tuple.subject.subject_id == user_id && tuple.subject.relation.is_none() {
                        granted.insert(tuple.relation.clone());
                    }
                } else if memberships.iter().any(|m| membership_matches(&tuple, m)) {
                    granted.insert(tuple.relation.clone());
                }
            }
        }
        Ok(granted)
    }

    /// Fast path for batch filtering: stop at the first ancestor grant
    /// whose relation lies in the precomputed granting set.
    async fn holds_any_of(
        &self,
        namespace: &str,
        user_id: &str,
        memberships: &[Membership],
        granting: &HashSet<String>,
        resource: &ResourceRef,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let ancestors = self
            .graph
            .expand_ancestors(namespace, resource, now, None)
            .await?;
        for ancestor in &ancestors {
            let filter = TupleFilter::new()
                .with_resource(
                    &ancestor.resource.resource_type,
                    &ancestor.resource.resource_id,
                )
                .with_relation_any(granting.iter().cloned().collect())
                .as_of(now);
            for tuple in self.store.find_tuples(namespace, &filter).await? {
                if tuple.subject.is_user() {
                    if tuple.subject.subject_id == user_id && tuple.subject.relation.is_none() {
                        return Ok(true);
                    }
                } else if memberships.iter().any(|m| membership_matches(&tuple, m)) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::locks::LockManager;
    use crate::models::SubjectRef;
    use crate::store::MemoryStore;
    use crate::write::TupleWriter;

    struct Fixture {
        store: Arc<MemoryStore>,
        writer: TupleWriter,
        checker: PermissionChecker,
        ctx: RequestContext,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(EngineConfig::default());
        Fixture {
            store: store.clone(),
            writer: TupleWriter::new(store.clone(), config.clone(), Arc::new(LockManager::new())),
            checker: PermissionChecker::new(store, config),
            ctx: RequestContext::for_tenant("t").unwrap(),
        }
    }

    impl Fixture {
        async fn grant(&self, rt: &str, rid: &str, rel: &str, st: &str, sid: &str) {
            self.writer
                .write_tuple(
                    &self.ctx,
                    "t",
                    &ResourceRef::new(rt, rid),
                    rel,
                    &SubjectRef::new(st, sid),
                    None,
                )
                .await
                .unwrap();
        }

        async fn check(&self, user: &str, perm: &str, rt: &str, rid: &str) -> bool {
            self.checker
                .check("t", user, perm, &ResourceRef::new(rt, rid))
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn direct_grant_checks() {
        let f = fixture();
        assert!(!f.check("alice", "read", "doc", "1").await);
        f.grant("doc", "1", "read", "user", "alice").await;
        assert!(f.check("alice", "read", "doc", "1").await);
        assert!(!f.check("alice", "write", "doc", "1").await);
        assert!(!f.check("bob", "read", "doc", "1").await);
    }

    #[tokio::test]
    async fn nested_groups_grant_through_chain() {
        let f = fixture();
        f.grant("team", "infra", "member", "user", "alice").await;
        f.grant("team", "platform", "member", "team", "infra").await;
        f.grant("team", "eng", "member", "team", "platform").await;
        f.grant("repo", "api", "read", "team", "eng").await;

        assert!(f.check("alice", "read", "repo", "api").await);
        assert!(!f.check("alice", "write", "repo", "api").await);
        assert!(!f.check("mallory", "read", "repo", "api").await);
    }

    #[tokio::test]
    async fn hierarchy_implication_expands() {
        let f = fixture();
        f.writer
            .add_hierarchy(&f.ctx, "t", "repo", "admin", "write")
            .await
            .unwrap();
        f.writer
            .add_hierarchy(&f.ctx, "t", "repo", "write", "read")
            .await
            .unwrap();
        f.grant("repo", "api", "admin", "user", "bob").await;

        assert!(f.check("bob", "admin", "repo", "api").await);
        assert!(f.check("bob", "write", "repo", "api").await);
        assert!(f.check("bob", "read", "repo", "api").await);
        // implication is one-directional
        f.grant("repo", "api", "read", "user", "carol").await;
        assert!(!f.check("carol", "admin", "repo", "api").await);
    }

    #[tokio::test]
    async fn resource_parents_grant_downward() {
        let f = fixture();
        f.grant("doc", "spec", "parent", "folder", "projects").await;
        f.grant("folder", "projects", "parent", "folder", "root").await;
        f.grant("folder", "root", "read", "user", "alice").await;

        assert!(f.check("alice", "read", "doc", "spec").await);
        assert!(f.check("alice", "read", "folder", "projects").await);
        // containment does not grant upward
        f.grant("folder", "projects", "write", "user", "bob").await;
        assert!(!f.check("bob", "write", "folder", "root").await);
        assert!(f.check("bob", "write", "doc", "spec").await);
    }

    #[tokio::test]
    async fn userset_grants_match_membership_relation() {
        let f = fixture();
        f.grant("team", "eng", "admin", "user", "alice").await;
        f.grant("team", "eng", "member", "user", "bob").await;
        f.writer
            .write_tuple(
                &f.ctx,
                "t",
                &ResourceRef::new("repo", "api"),
                "write",
                &SubjectRef::userset("team", "eng", "admin"),
                None,
            )
            .await
            .unwrap();

        assert!(f.check("alice", "write", "repo", "api").await);
        assert!(!f.check("bob", "write", "repo", "api").await);
    }

    #[tokio::test]
    async fn check_any_and_check_all_boundaries() {
        let f = fixture();
        f.grant("doc", "1", "read", "user", "alice").await;

        let read_write = vec!["read".to_string(), "write".to_string()];
        let r = ResourceRef::new("doc", "1");
        assert!(f.checker.check_any("t", "alice", &read_write, &r).await.unwrap());
        assert!(!f.checker.check_all("t", "alice", &read_write, &r).await.unwrap());
        assert!(f
            .checker
            .check_all("t", "alice", &["read".to_string()], &r)
            .await
            .unwrap());

        // empty request sets
        assert!(!f.checker.check_any("t", "alice", &[], &r).await.unwrap());
        assert!(f.checker.check_all("t", "alice", &[], &r).await.unwrap());
    }

    #[tokio::test]
    async fn expired_tuples_do_not_contribute() {
        let f = fixture();
        f.store.insert_unvalidated(
            "t",
            crate::models::StoredTuple {
                id: uuid::Uuid::new_v4(),
                resource: ResourceRef::new("doc", "1"),
                relation: "read".to_string(),
                subject: SubjectRef::user("alice"),
                expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
                created_at: Utc::now(),
            },
        );
        assert!(!f.check("alice", "read", "doc", "1").await);

        // an expired membership breaks the whole chain
        f.store.insert_unvalidated(
            "t",
            crate::models::StoredTuple {
                id: uuid::Uuid::new_v4(),
                resource: ResourceRef::new("team", "eng"),
                relation: "member".to_string(),
                subject: SubjectRef::user("carol"),
                expires_at: Some(Utc::now() - chrono::Duration::minutes(1)),
                created_at: Utc::now(),
            },
        );
        f.grant("repo", "api", "read", "team", "eng").await;
        assert!(!f.check("carol", "read", "repo", "api").await);
    }

    #[tokio::test]
    async fn filter_authorized_combines_sources() {
        let f = fixture();
        f.writer
            .add_hierarchy(&f.ctx, "t", "doc", "admin", "read")
            .await
            .unwrap();
        f.grant("doc", "1", "admin", "user", "alice").await;
        f.grant("doc", "2", "read", "user", "alice").await;
        f.grant("team", "eng", "member", "user", "alice").await;
        f.grant("doc", "4", "read", "team", "eng").await;

        let ids: Vec<String> = ["1", "2", "3", "4", "5"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let authorized = f
            .checker
            .filter_authorized("t", "alice", "doc", "read", &ids)
            .await
            .unwrap();
        assert_eq!(authorized, vec!["1", "2", "4"]);

        let empty = f
            .checker
            .filter_authorized("t", "alice", "doc", "read", &[])
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn deterministic_on_frozen_state() {
        let f = fixture();
        f.grant("team", "eng", "member", "user", "alice").await;
        f.grant("repo", "api", "read", "team", "eng").await;
        for _ in 0..5 {
            assert!(f.check("alice", "read", "repo", "api").await);
        }
    }
}
