//! Access explanation: backward chaining from a (user, permission,
//! resource) question to the tuples that justify it.
//!
//! Each discovered path is tagged with how the final hop was made: a
//! direct grant on the target, a grant to a group the user belongs to, a
//! permission that implies the requested one, or a grant on a containing
//! resource. An empty result means no access.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::{membership_matches, GraphWalker, Membership};
use crate::models::{ExplainPath, PathType, ResourceRef};
use crate::store::{AuthzStore, TupleFilter};
use crate::validation::{validate_free_id, validate_identifier};
use chrono::Utc;
use std::sync::Arc;

pub struct Explainer {
    store: Arc<dyn AuthzStore>,
    graph: GraphWalker,
}

enum Holder<'a> {
    Direct,
    Group(&'a Membership),
}

impl Explainer {
    pub fn new(store: Arc<dyn AuthzStore>, config: Arc<EngineConfig>) -> Self {
        let graph = GraphWalker::new(store.clone(), config);
        Self { store, graph }
    }

    pub async fn explain(
        &self,
        namespace: &str,
        user_id: &str,
        permission: &str,
        resource: &ResourceRef,
        max_depth: Option<usize>,
    ) -> Result<Vec<ExplainPath>> {
        validate_free_id("user_id", user_id)?;
        validate_identifier("permission", permission)?;
        validate_identifier("resource_type", &resource.resource_type)?;
        validate_free_id("resource_id", &resource.resource_id)?;

        let now = Utc::now();
        let memberships = self
            .graph
            .expand_memberships(namespace, user_id, now, max_depth)
            .await?;
        let ancestors = self
            .graph
            .expand_ancestors(namespace, resource, now, max_depth)
            .await?;

        let mut paths: Vec<ExplainPath> = Vec::new();
        for (idx, ancestor) in ancestors.iter().enumerate() {
            let on_target = idx == 0;
            let filter = TupleFilter::new()
                .with_resource(
                    &ancestor.resource.resource_type,
                    &ancestor.resource.resource_id,
                )
                .as_of(now);
            for tuple in self.store.find_tuples(namespace, &filter).await? {
                let mut holders: Vec<Holder> = Vec::new();
                if tuple.subject.is_user() {
                    if tuple.subject.subject_id == user_id && tuple.subject.relation.is_none() {
                        holders.push(Holder::Direct);
                    }
                } else {
                    holders.extend(
                        memberships
                            .iter()
                            .filter(|m| membership_matches(&tuple, m))
                            .map(Holder::Group),
                    );
                }
                if holders.is_empty() {
                    continue;
                }

                let granted = tuple.relation.clone();
                let implication = if granted == permission {
                    None
                } else {
                    match self
                        .graph
                        .implication_chain(
                            namespace,
                            &resource.resource_type,
                            &granted,
                            permission,
                        )
                        .await?
                    {
                        Some(chain) => Some(chain),
                        // this grant does not reach the asked permission
                        None => continue,
                    }
                };

                for holder in holders {
                    let (via_subject_type, via_subject_id, via_membership) = match &holder {
                        Holder::Direct => (None, None, None),
                        Holder::Group(m) => (
                            Some(m.group_type.clone()),
                            Some(m.group_id.clone()),
                            Some(m.relation.clone()),
                        ),
                    };
                    let path = if !on_target {
                        ExplainPath {
                            path_type: PathType::Resource,
                            via_relation: granted.clone(),
                            via_subject_type,
                            via_subject_id,
                            via_membership,
                            path_chain: ancestor.chain.clone(),
                        }
                    } else if let Some(ref chain) = implication {
                        ExplainPath {
                            path_type: PathType::Hierarchy,
                            via_relation: granted.clone(),
                            via_subject_type,
                            via_subject_id,
                            via_membership,
                            path_chain: chain.clone(),
                        }
                    } else {
                        match &holder {
                            Holder::Direct => ExplainPath {
                                path_type: PathType::Direct,
                                via_relation: granted.clone(),
                                via_subject_type,
                                via_subject_id,
                                via_membership,
                                path_chain: Vec::new(),
                            },
                            Holder::Group(m) => ExplainPath {
                                path_type: PathType::Group,
                                via_relation: granted.clone(),
                                via_subject_type,
                                via_subject_id,
                                via_membership,
                                path_chain: m.chain.clone(),
                            },
                        }
                    };
                    paths.push(path);
                }
            }
        }
        Ok(paths)
    }

    /// Human-readable rendition of [`Explainer::explain`].
    pub async fn explain_text(
        &self,
        namespace: &str,
        user_id: &str,
        permission: &str,
        resource: &ResourceRef,
        max_depth: Option<usize>,
    ) -> Result<Vec<String>> {
        let paths = self
            .explain(namespace, user_id, permission, resource, max_depth)
            .await?;
        Ok(paths
            .iter()
            .map(|p| render_path(p, user_id, permission, resource))
            .collect())
    }
}

fn render_path(
    path: &ExplainPath,
    user_id: &str,
    permission: &str,
    resource: &ResourceRef,
) -> String {
    match path.path_type {
        PathType::Direct => {
            format!("DIRECT: {user_id} has {permission} on {resource}")
        }
        PathType::Group => format!(
            "GROUP: {user_id} is member of {} which has {permission} on {resource}",
            path.path_chain.join(" -> ")
        ),
        PathType::Hierarchy => {
            let via = match (&path.via_subject_type, &path.via_subject_id) {
                (Some(t), Some(i)) => format!(" via {t}:{i}"),
                _ => String::new(),
            };
            format!(
                "HIERARCHY: {user_id} has {} on {resource}{via} ({})",
                path.via_relation,
                path.path_chain.join(" -> ")
            )
        }
        PathType::Resource => {
            let ancestor = path.path_chain.last().cloned().unwrap_or_default();
            format!(
                "RESOURCE: {user_id} has {} on {ancestor} which contains {resource} ({})",
                path.via_relation,
                path.path_chain.join(" -> ")
            )
        }
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
        writer: TupleWriter,
        explainer: Explainer,
        ctx: RequestContext,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(EngineConfig::default());
        Fixture {
            writer: TupleWriter::new(store.clone(), config.clone(), Arc::new(LockManager::new())),
            explainer: Explainer::new(store, config),
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
    async fn nested_group_path_carries_the_chain() {
        let f = fixture();
        f.grant("team", "infra", "member", "user", "alice").await;
        f.grant("team", "platform", "member", "team", "infra").await;
        f.grant("team", "eng", "member", "team", "platform").await;
        f.grant("repo", "api", "read", "team", "eng").await;

        let paths = f
            .explainer
            .explain("t", "alice", "read", &ResourceRef::new("repo", "api"), None)
            .await
            .unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].path_type, PathType::Group);
        assert_eq!(
            paths[0].path_chain,
            vec!["team:infra", "team:platform", "team:eng"]
        );
    }

    #[tokio::test]
    async fn hierarchy_path_carries_the_implication_chain() {
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

        let paths = f
            .explainer
            .explain("t", "bob", "read", &ResourceRef::new("repo", "api"), None)
            .await
            .unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].path_type, PathType::Hierarchy);
        assert_eq!(paths[0].path_chain, vec!["admin", "write", "read"]);

        let lines = f
            .explainer
            .explain_text("t", "bob", "read", &ResourceRef::new("repo", "api"), None)
            .await
            .unwrap();
        assert!(lines[0].contains("HIERARCHY"));
        assert!(lines[0].contains("admin -> write -> read"));
    }

    #[tokio::test]
    async fn resource_path_carries_the_containment_chain() {
        let f = fixture();
        f.grant("doc", "spec", "parent", "folder", "projects").await;
        f.grant("folder", "projects", "parent", "folder", "root").await;
        f.grant("folder", "root", "read", "user", "alice").await;

        let paths = f
            .explainer
            .explain("t", "alice", "read", &ResourceRef::new("doc", "spec"), None)
            .await
            .unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].path_type, PathType::Resource);
        assert_eq!(
            paths[0].path_chain,
            vec!["doc:spec", "folder:projects", "folder:root"]
        );
    }

    #[tokio::test]
    async fn multiple_paths_all_reported() {
        let f = fixture();
        f.grant("doc", "1", "read", "user", "alice").await;
        f.grant("doc", "1", "read", "team", "eng").await;
        f.grant("team", "eng", "member", "user", "alice").await;

        let lines = f
            .explainer
            .explain_text("t", "alice", "read", &ResourceRef::new("doc", "1"), None)
            .await
            .unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().any(|l| l.contains("DIRECT")));
        assert!(lines.iter().any(|l| l.contains("GROUP")));
    }

    #[tokio::test]
    async fn deep_hierarchy_chain_renders_fully() {
        let f = fixture();
        for (p, i) in [("owner", "admin"), ("admin", "write"), ("write", "read")] {
            f.writer.add_hierarchy(&f.ctx, "t", "doc", p, i).await.unwrap();
        }
        f.grant("doc", "1", "owner", "user", "alice").await;

        let lines = f
            .explainer
            .explain_text("t", "alice", "read", &ResourceRef::new("doc", "1"), None)
            .await
            .unwrap();
        assert!(lines
            .iter()
            .any(|l| l.contains("owner -> admin -> write -> read")));
    }

    #[tokio::test]
    async fn no_access_means_no_paths() {
        let f = fixture();
        f.grant("doc", "1", "read", "user", "bob").await;
        let paths = f
            .explainer
            .explain("t", "alice", "read", &ResourceRef::new("doc", "1"), None)
            .await
            .unwrap();
        assert!(paths.is_empty());
    }
}
