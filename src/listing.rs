//! Listing queries: which resources can a user reach, and who can reach a
//! resource. Both run the evaluator's expansion in the reverse sense and
//! paginate with a strictly-greater-than cursor over lexicographic order.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::{membership_matches, GraphWalker};
use crate::models::ResourceRef;
use crate::store::{AuthzStore, TupleFilter};
use crate::validation::{validate_free_id, validate_identifier};
use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

pub struct Lister {
    store: Arc<dyn AuthzStore>,
    config: Arc<EngineConfig>,
    graph: GraphWalker,
}

impl Lister {
    pub fn new(store: Arc<dyn AuthzStore>, config: Arc<EngineConfig>) -> Self {
        let graph = GraphWalker::new(store.clone(), config.clone());
        Self {
            store,
            config,
            graph,
        }
    }

    /// Resources of `resource_type` the user holds `permission` on, through
    /// any derivation: direct grants, group grants, permissions that imply
    /// the requested one, and containment under a granted resource.
    ///
    /// Results are ordered lexicographically by resource id; rows strictly
    /// greater than `cursor` are returned, at most `limit` (default 100,
    /// max 1000). The descendant fan-out is linear in the number of granted
    /// resources; practical deployments stay below ~1000 accessible
    /// resources per call.
    pub async fn list_resources(
        &self,
        namespace: &str,
        user_id: &str,
        resource_type: &str,
        permission: &str,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<Vec<String>> {
        validate_free_id("user_id", user_id)?;
        validate_identifier("resource_type", resource_type)?;
        validate_identifier("permission", permission)?;

        let now = Utc::now();
        let limit = self.config.effective_limit(limit);
        let granting = self
            .graph
            .inverse_closure(namespace, resource_type, permission)
            .await?;
        let memberships = self
            .graph
            .expand_memberships(namespace, user_id, now, None)
            .await?;

        let filter = TupleFilter::new()
            .with_relation_any(granting.iter().cloned().collect())
            .as_of(now);
        let mut results: BTreeSet<String> = BTreeSet::new();
        let mut roots: HashSet<(String, String)> = HashSet::new();
        for tuple in self.store.find_tuples(namespace, &filter).await? {
            let held = if tuple.subject.is_user() {
                tuple.subject.subject_id == user_id && tuple.subject.relation.is_none()
            } else {
                memberships.iter().any(|m| membership_matches(&tuple, m))
            };
            if !held {
                continue;
            }
            if tuple.resource.resource_type == resource_type {
                results.insert(tuple.resource.resource_id.clone());
            }
            roots.insert((
                tuple.resource.resource_type.clone(),
                tuple.resource.resource_id.clone(),
            ));
        }

        // anything contained under a granted resource is reachable too
        for (rtype, rid) in roots {
            let root = ResourceRef::new(&rtype, &rid);
            for descendant in self.graph.expand_descendants(namespace, &root, now).await? {
                if descendant.resource_type == resource_type {
                    results.insert(descendant.resource_id);
                }
            }
        }

        Ok(paginate(results, cursor, limit))
    }

    /// Users holding `permission` on the resource, through any derivation.
    /// Group subjects are expanded downward to users, honoring usersets.
    pub async fn list_users(
        &self,
        namespace: &str,
        resource_type: &str,
        resource_id: &str,
        permission: &str,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<Vec<String>> {
        validate_identifier("resource_type", resource_type)?;
        validate_free_id("resource_id", resource_id)?;
        validate_identifier("permission", permission)?;

        let now = Utc::now();
        let limit = self.config.effective_limit(limit);
        let granting = self
            .graph
            .inverse_closure(namespace, resource_type, permission)
            .await?;
        let ancestors = self
            .graph
            .expand_ancestors(
                namespace,
                &ResourceRef::new(resource_type, resource_id),
                now,
                None,
            )
            .await?;

        let mut users: BTreeSet<String> = BTreeSet::new();
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
                    if tuple.subject.relation.is_none() {
                        users.insert(tuple.subject.subject_id.clone());
                    }
                } else {
                    let members = self
                        .graph
                        .group_users(
                            namespace,
                            &tuple.subject.subject_type,
                            &tuple.subject.subject_id,
                            tuple.subject.relation.as_deref(),
                            now,
                        )
                        .await?;
                    users.extend(members);
                }
            }
        }

        Ok(paginate(users, cursor, limit))
    }
}

fn paginate(rows: BTreeSet<String>, cursor: Option<&str>, limit: usize) -> Vec<String> {
    rows.into_iter()
        .filter(|id| cursor.map_or(true, |c| id.as_str() > c))
        .take(limit)
        .collect()
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
        writer: TupleWriter,
        lister: Lister,
        ctx: RequestContext,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(EngineConfig::default());
        Fixture {
            writer: TupleWriter::new(store.clone(), config.clone(), Arc::new(LockManager::new())),
            lister: Lister::new(store, config),
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
    }

    #[tokio::test]
    async fn list_resources_covers_all_derivations() {
        let f = fixture();
        f.writer
            .add_hierarchy(&f.ctx, "t", "doc", "admin", "read")
            .await
            .unwrap();
        // direct, hierarchy, group, and containment derivations
        f.grant("doc", "direct", "read", "user", "alice").await;
        f.grant("doc", "admin-doc", "admin", "user", "alice").await;
        f.grant("team", "eng", "member", "user", "alice").await;
        f.grant("doc", "team-doc", "read", "team", "eng").await;
        f.grant("doc", "child", "parent", "folder", "shared").await;
        f.grant("folder", "shared", "read", "user", "alice").await;
        // noise: someone else's grant and the wrong type
        f.grant("doc", "other", "read", "user", "bob").await;
        f.grant("repo", "api", "read", "user", "alice").await;

        let docs = f
            .lister
            .list_resources("t", "alice", "doc", "read", None, None)
            .await
            .unwrap();
        assert_eq!(docs, vec!["admin-doc", "child", "direct", "team-doc"]);
    }

    #[tokio::test]
    async fn list_resources_paginates_with_cursor() {
        let f = fixture();
        for i in 0..25 {
            f.grant("doc", &format!("doc-{i:02}"), "read", "user", "alice")
                .await;
        }

        let page1 = f
            .lister
            .list_resources("t", "alice", "doc", "read", Some(10), None)
            .await
            .unwrap();
        assert_eq!(page1.len(), 10);

        let page2 = f
            .lister
            .list_resources("t", "alice", "doc", "read", Some(10), Some(&page1[9]))
            .await
            .unwrap();
        assert_eq!(page2.len(), 10);
        assert!(page2[0] > page1[9]);

        let page3 = f
            .lister
            .list_resources("t", "alice", "doc", "read", Some(10), Some(&page2[9]))
            .await
            .unwrap();
        assert_eq!(page3.len(), 5);

        let all: HashSet<String> = page1
            .into_iter()
            .chain(page2)
            .chain(page3)
            .collect();
        assert_eq!(all.len(), 25);

        let past_end = f
            .lister
            .list_resources("t", "alice", "doc", "read", Some(10), Some("zzz"))
            .await
            .unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn list_users_expands_groups_and_ancestors() {
        let f = fixture();
        f.grant("doc", "readme", "parent", "folder", "docs").await;
        f.grant("doc", "readme", "read", "user", "alice").await;
        f.grant("folder", "docs", "read", "user", "bob").await;
        f.grant("folder", "docs", "read", "team", "eng").await;
        f.grant("team", "eng", "member", "user", "carol").await;
        f.grant("team", "eng", "member", "team", "infra").await;
        f.grant("team", "infra", "member", "user", "dave").await;

        let users = f
            .lister
            .list_users("t", "doc", "readme", "read", None, None)
            .await
            .unwrap();
        assert_eq!(users, vec!["alice", "bob", "carol", "dave"]);
    }

    #[tokio::test]
    async fn list_users_respects_usersets() {
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

        let users = f
            .lister
            .list_users("t", "repo", "api", "write", None, None)
            .await
            .unwrap();
        assert_eq!(users, vec!["alice"]);
    }

    #[tokio::test]
    async fn empty_results_are_empty_not_errors() {
        let f = fixture();
        assert!(f
            .lister
            .list_resources("t", "nobody", "doc", "read", None, None)
            .await
            .unwrap()
            .is_empty());
        assert!(f
            .lister
            .list_users("t", "doc", "absent", "read", None, None)
            .await
            .unwrap()
            .is_empty());
    }
}
