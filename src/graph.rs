//! Bounded graph traversal over the tuple store.
//!
//! Every traversal is an explicit frontier/visited loop with a depth bound,
//! never unbounded recursion: nested-group climbing, resource-ancestor and
//! descendant walks, downward group-to-user expansion, and the implication
//! closures. Expired tuples are skipped at every step, so a lapsed
//! membership or grant stops contributing the moment it expires.

use crate::config::EngineConfig;
use crate::error::{AuthzError, Result};
use crate::models::{ResourceRef, StoredTuple, MEMBER_RELATION, USER_SUBJECT_TYPE};
use crate::store::{AuthzStore, TupleFilter};
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// One group the user belongs to, directly or through nesting.
#[derive(Debug, Clone)]
pub struct Membership {
    pub group_type: String,
    pub group_id: String,
    /// The relation the user effectively holds on this group: the direct
    /// relation for the first hop, `member` for groups reached by climbing
    /// containment edges.
    pub relation: String,
    /// Groups traversed to get here, `type:id` strings, direct group first.
    pub chain: Vec<String>,
}

/// One resource in the target's containment chain, the target itself first.
#[derive(Debug, Clone)]
pub struct Ancestor {
    pub resource: ResourceRef,
    /// Containment chain from the target to this resource, inclusive.
    pub chain: Vec<String>,
}

pub struct GraphWalker {
    store: Arc<dyn AuthzStore>,
    config: Arc<EngineConfig>,
}

impl GraphWalker {
    pub fn new(store: Arc<dyn AuthzStore>, config: Arc<EngineConfig>) -> Self {
        Self { store, config }
    }

    fn member_relation(&self) -> &str {
        &self.config.default_membership_relation
    }

    /// Expand the set M of groups a user belongs to.
    ///
    /// Seeds with every live tuple naming the user as subject (the relation
    /// held becomes the membership relation, which userset grants match
    /// against), then climbs `member` containment edges outward up to the
    /// depth bound. Containment edges carrying a userset only pass
    /// memberships whose relation matches.
    pub async fn expand_memberships(
        &self,
        namespace: &str,
        user_id: &str,
        now: DateTime<Utc>,
        max_depth: Option<usize>,
    ) -> Result<Vec<Membership>> {
        let max_depth = max_depth.unwrap_or(self.config.max_group_depth);
        let mut out: Vec<Membership> = Vec::new();
        let mut visited: HashSet<(String, String, String)> = HashSet::new();

        let seed_filter = TupleFilter::new()
            .with_subject(USER_SUBJECT_TYPE, user_id)
            .as_of(now);
        let mut frontier: Vec<Membership> = Vec::new();
        for tuple in self.store.find_tuples(namespace, &seed_filter).await? {
            let m = Membership {
                group_type: tuple.resource.resource_type.clone(),
                group_id: tuple.resource.resource_id.clone(),
                relation: tuple.relation.clone(),
                chain: vec![tuple.resource.to_string()],
            };
            if visited.insert((m.group_type.clone(), m.group_id.clone(), m.relation.clone())) {
                frontier.push(m);
            }
        }
        out.extend(frontier.iter().cloned());

        let mut depth = 1;
        while !frontier.is_empty() && depth < max_depth {
            let mut next = Vec::new();
            for m in &frontier {
                // user-typed resources are not groups; their tuples are
                // user memberships, not containment edges
                if m.group_type == USER_SUBJECT_TYPE {
                    continue;
                }
                let filter = TupleFilter::new()
                    .with_relation(self.member_relation())
                    .with_subject(&m.group_type, &m.group_id)
                    .as_of(now);
                for edge in self.store.find_tuples(namespace, &filter).await? {
                    if let Some(ref required) = edge.subject.relation {
                        if *required != m.relation {
                            continue;
                        }
                    }
                    let outer = Membership {
                        group_type: edge.resource.resource_type.clone(),
                        group_id: edge.resource.resource_id.clone(),
                        relation: edge.relation.clone(),
                        chain: {
                            let mut chain = m.chain.clone();
                            chain.push(edge.resource.to_string());
                            chain
                        },
                    };
                    if visited.insert((
                        outer.group_type.clone(),
                        outer.group_id.clone(),
                        outer.relation.clone(),
                    )) {
                        next.push(outer);
                    }
                }
            }
            out.extend(next.iter().cloned());
            frontier = next;
            depth += 1;
        }

        debug!(
            user_id,
            namespace,
            groups = out.len(),
            "Expanded user memberships"
        );
        Ok(out)
    }

    /// Expand the resource and its containment ancestors, nearest first.
    pub async fn expand_ancestors(
        &self,
        namespace: &str,
        resource: &ResourceRef,
        now: DateTime<Utc>,
        max_depth: Option<usize>,
    ) -> Result<Vec<Ancestor>> {
        let max_depth = max_depth.unwrap_or(self.config.max_resource_depth);
        let mut visited: HashSet<(String, String)> = HashSet::new();
        visited.insert((resource.resource_type.clone(), resource.resource_id.clone()));

        let start = Ancestor {
            resource: resource.clone(),
            chain: vec![resource.to_string()],
        };
        let mut out = vec![start.clone()];
        let mut frontier = vec![start];

        let mut depth = 0;
        while !frontier.is_empty() && depth < max_depth {
            let mut next = Vec::new();
            for a in &frontier {
                let filter = TupleFilter::new()
                    .with_resource(&a.resource.resource_type, &a.resource.resource_id)
                    .with_relation(crate::models::PARENT_RELATION)
                    .as_of(now);
                for edge in self.store.find_tuples(namespace, &filter).await? {
                    let parent = ResourceRef::new(
                        &edge.subject.subject_type,
                        &edge.subject.subject_id,
                    );
                    if visited.insert((
                        parent.resource_type.clone(),
                        parent.resource_id.clone(),
                    )) {
                        let mut chain = a.chain.clone();
                        chain.push(parent.to_string());
                        next.push(Ancestor {
                            resource: parent,
                            chain,
                        });
                    }
                }
            }
            out.extend(next.iter().cloned());
            frontier = next;
            depth += 1;
        }
        Ok(out)
    }

    /// Expand resources contained (transitively) under `resource`,
    /// excluding the resource itself.
    pub async fn expand_descendants(
        &self,
        namespace: &str,
        resource: &ResourceRef,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResourceRef>> {
        let max_depth = self.config.max_resource_depth;
        let mut visited: HashSet<(String, String)> = HashSet::new();
        visited.insert((resource.resource_type.clone(), resource.resource_id.clone()));
        let mut out = Vec::new();
        let mut frontier = vec![resource.clone()];

        let mut depth = 0;
        while !frontier.is_empty() && depth < max_depth {
            let mut next = Vec::new();
            for r in &frontier {
                let filter = TupleFilter::new()
                    .with_relation(crate::models::PARENT_RELATION)
                    .with_subject(&r.resource_type, &r.resource_id)
                    .as_of(now);
                for edge in self.store.find_tuples(namespace, &filter).await? {
                    let child = edge.resource.clone();
                    if visited.insert((child.resource_type.clone(), child.resource_id.clone())) {
                        next.push(child);
                    }
                }
            }
            out.extend(next.iter().cloned());
            frontier = next;
            depth += 1;
        }
        Ok(out)
    }

    /// Expand a group downward to the user ids it contains.
    ///
    /// `required` carries userset semantics: `Some(r)` restricts the first
    /// hop to holders of relation `r`; `None` matches any relation. Nested
    /// groups are entered only through `member` containment edges, each
    /// edge's own userset becoming the requirement below it.
    pub async fn group_users(
        &self,
        namespace: &str,
        group_type: &str,
        group_id: &str,
        required: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let max_depth = self.config.max_group_depth;
        let mut users = HashSet::new();
        let mut visited: HashSet<(String, String, Option<String>)> = HashSet::new();
        let mut queue: VecDeque<(String, String, Option<String>, usize)> = VecDeque::new();
        queue.push_back((
            group_type.to_string(),
            group_id.to_string(),
            required.map(|r| r.to_string()),
            0,
        ));

        while let Some((gtype, gid, req, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            if !visited.insert((gtype.clone(), gid.clone(), req.clone())) {
                continue;
            }
            let filter = TupleFilter::new()
                .with_resource(&gtype, &gid)
                .as_of(now);
            for tuple in self.store.find_tuples(namespace, &filter).await? {
                if tuple.subject.is_user() {
                    if req.as_deref().map_or(true, |r| tuple.relation == r) {
                        users.insert(tuple.subject.subject_id.clone());
                    }
                } else if tuple.relation == *self.member_relation()
                    && req
                        .as_deref()
                        .map_or(true, |r| r == self.member_relation())
                {
                    queue.push_back((
                        tuple.subject.subject_type.clone(),
                        tuple.subject.subject_id.clone(),
                        tuple.subject.relation.clone(),
                        depth + 1,
                    ));
                }
            }
        }
        Ok(users)
    }

    /// Forward fixed point: everything the seed permissions imply under the
    /// resource type's hierarchy rules. Divergence past the iteration cap
    /// means the DAG invariant was violated and is a fatal error.
    pub async fn closure(
        &self,
        namespace: &str,
        resource_type: &str,
        seed: &HashSet<String>,
    ) -> Result<HashSet<String>> {
        let rules = self.store.rules_for(namespace, resource_type).await?;
        let mut set = seed.clone();
        for _ in 0..self.config.hierarchy_iteration_cap {
            let added: Vec<String> = rules
                .iter()
                .filter(|r| set.contains(&r.permission) && !set.contains(&r.implies))
                .map(|r| r.implies.clone())
                .collect();
            if added.is_empty() {
                return Ok(set);
            }
            set.extend(added);
        }
        Err(AuthzError::HierarchyDiverged {
            resource_type: resource_type.to_string(),
            cap: self.config.hierarchy_iteration_cap,
        })
    }

    /// Inverse fixed point: the permissions whose closure contains
    /// `permission` (itself included). Used by the listing paths.
    pub async fn inverse_closure(
        &self,
        namespace: &str,
        resource_type: &str,
        permission: &str,
    ) -> Result<HashSet<String>> {
        let rules = self.store.rules_for(namespace, resource_type).await?;
        let mut set: HashSet<String> = HashSet::from([permission.to_string()]);
        for _ in 0..self.config.hierarchy_iteration_cap {
            let added: Vec<String> = rules
                .iter()
                .filter(|r| set.contains(&r.implies) && !set.contains(&r.permission))
                .map(|r| r.permission.clone())
                .collect();
            if added.is_empty() {
                return Ok(set);
            }
            set.extend(added);
        }
        Err(AuthzError::HierarchyDiverged {
            resource_type: resource_type.to_string(),
            cap: self.config.hierarchy_iteration_cap,
        })
    }

    /// Shortest implication chain `from -> ... -> to`, if one exists.
    pub async fn implication_chain(
        &self,
        namespace: &str,
        resource_type: &str,
        from: &str,
        to: &str,
    ) -> Result<Option<Vec<String>>> {
        if from == to {
            return Ok(Some(vec![from.to_string()]));
        }
        let rules = self.store.rules_for(namespace, resource_type).await?;
        let mut queue: VecDeque<Vec<String>> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::from([from.to_string()]);
        queue.push_back(vec![from.to_string()]);

        while let Some(path) = queue.pop_front() {
            if path.len() > self.config.hierarchy_iteration_cap {
                break;
            }
            let tail = path.last().unwrap().clone();
            for rule in rules.iter().filter(|r| r.permission == tail) {
                if rule.implies == to {
                    let mut done = path.clone();
                    done.push(rule.implies.clone());
                    return Ok(Some(done));
                }
                if visited.insert(rule.implies.clone()) {
                    let mut next = path.clone();
                    next.push(rule.implies.clone());
                    queue.push_back(next);
                }
            }
        }
        Ok(None)
    }
}

/// Convenience for grant matching: does `tuple`'s subject cover the user
/// through this membership, honoring the tuple's userset relation.
pub fn membership_matches(tuple: &StoredTuple, membership: &Membership) -> bool {
    tuple.subject.subject_type == membership.group_type
        && tuple.subject.subject_id == membership.group_id
        && tuple
            .subject
            .relation
            .as_deref()
            .map_or(true, |required| required == membership.relation)
}

pub fn member_containment_edge(relation: &str, subject_type: &str) -> bool {
    relation == MEMBER_RELATION && subject_type != USER_SUBJECT_TYPE
}
