//! Cycle prevention for the three DAGs the engine maintains: group
//! containment, resource parenthood, and permission implication.
//!
//! Write-time checks walk the existing graph upward from the proposed
//! upper endpoint and refuse the edge when the lower endpoint is reachable.
//! Checks run on the physical graph: expired edges still count until they
//! are reclaimed, because an upsert can revive them. The diagnostic scans
//! behind `verify_integrity` enumerate any cycles that slipped in anyway.

use crate::config::EngineConfig;
use crate::error::{AuthzError, Result};
use crate::models::{MEMBER_RELATION, PARENT_RELATION, USER_SUBJECT_TYPE};
use crate::store::{AuthzStore, TupleFilter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct CycleDetector {
    store: Arc<dyn AuthzStore>,
    config: Arc<EngineConfig>,
}

#[derive(Clone, Copy)]
enum Graph {
    Group,
    Resource,
}

impl Graph {
    fn relation(&self) -> &'static str {
        match self {
            Graph::Group => MEMBER_RELATION,
            Graph::Resource => PARENT_RELATION,
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            Graph::Group => "membership",
            Graph::Resource => "hierarchy",
        }
    }
}

impl CycleDetector {
    pub fn new(store: Arc<dyn AuthzStore>, config: Arc<EngineConfig>) -> Self {
        Self { store, config }
    }

    /// Refuse a group-containment edge placing `child` inside `parent`
    /// when `parent` is already (transitively) contained in `child`.
    pub async fn check_group_edge(
        &self,
        namespace: &str,
        child: (&str, &str),
        parent: (&str, &str),
    ) -> Result<()> {
        self.check_edge(namespace, Graph::Group, child, parent, self.config.max_group_depth)
            .await
    }

    /// Refuse a resource-containment edge placing `child` under `parent`
    /// when `parent` already sits below `child`.
    pub async fn check_parent_edge(
        &self,
        namespace: &str,
        child: (&str, &str),
        parent: (&str, &str),
    ) -> Result<()> {
        self.check_edge(
            namespace,
            Graph::Resource,
            child,
            parent,
            self.config.max_resource_depth,
        )
        .await
    }

    async fn check_edge(
        &self,
        namespace: &str,
        graph: Graph,
        child: (&str, &str),
        parent: (&str, &str),
        max_depth: usize,
    ) -> Result<()> {
        if child == parent {
            return Err(AuthzError::invalid(
                "subject",
                format!(
                    "would create a circular {}: {}:{} cannot contain itself",
                    graph.noun(),
                    child.0,
                    child.1
                ),
            ));
        }

        // walk upward from the proposed parent through whatever already
        // contains it; reaching the child closes a cycle. The two graphs
        // store containment in opposite columns: a group edge puts the
        // container in the resource slot, a parent edge puts it in the
        // subject slot.
        let mut visited: HashSet<(String, String)> =
            HashSet::from([(parent.0.to_string(), parent.1.to_string())]);
        let mut frontier: Vec<((String, String), Vec<String>)> = vec![(
            (parent.0.to_string(), parent.1.to_string()),
            vec![format!("{}:{}", parent.0, parent.1)],
        )];

        let mut depth = 0;
        while !frontier.is_empty() && depth < max_depth {
            let mut next = Vec::new();
            for ((ntype, nid), chain) in &frontier {
                let filter = match graph {
                    Graph::Group => TupleFilter::new()
                        .with_relation(graph.relation())
                        .with_subject(ntype, nid),
                    Graph::Resource => TupleFilter::new()
                        .with_resource(ntype, nid)
                        .with_relation(graph.relation()),
                };
                for edge in self.store.find_tuples(namespace, &filter).await? {
                    let up = match graph {
                        Graph::Group => (
                            edge.resource.resource_type.clone(),
                            edge.resource.resource_id.clone(),
                        ),
                        Graph::Resource => (
                            edge.subject.subject_type.clone(),
                            edge.subject.subject_id.clone(),
                        ),
                    };
                    let mut up_chain = chain.clone();
                    up_chain.push(format!("{}:{}", up.0, up.1));
                    if (up.0.as_str(), up.1.as_str()) == child {
                        return Err(AuthzError::invalid(
                            "subject",
                            format!(
                                "would create a circular {}: {}",
                                graph.noun(),
                                up_chain.join(" -> ")
                            ),
                        ));
                    }
                    if visited.insert(up.clone()) {
                        next.push((up, up_chain));
                    }
                }
            }
            frontier = next;
            depth += 1;
        }
        Ok(())
    }

    /// Refuse an implication rule `permission -> implies` that would close
    /// a cycle in the per-resource-type hierarchy graph.
    pub async fn check_hierarchy_edge(
        &self,
        namespace: &str,
        resource_type: &str,
        permission: &str,
        implies: &str,
    ) -> Result<()> {
        if permission == implies {
            return Err(AuthzError::invalid(
                "implies",
                format!("would create a hierarchy cycle: {permission} cannot imply itself"),
            ));
        }
        let rules = self.store.rules_for(namespace, resource_type).await?;
        let mut visited: HashSet<String> = HashSet::from([implies.to_string()]);
        let mut frontier: Vec<(String, Vec<String>)> =
            vec![(implies.to_string(), vec![implies.to_string()])];

        let mut depth = 0;
        while !frontier.is_empty() && depth < self.config.hierarchy_iteration_cap {
            let mut next = Vec::new();
            for (perm, chain) in &frontier {
                for rule in rules.iter().filter(|r| r.permission == *perm) {
                    let mut down_chain = chain.clone();
                    down_chain.push(rule.implies.clone());
                    if rule.implies == permission {
                        return Err(AuthzError::invalid(
                            "implies",
                            format!(
                                "would create a hierarchy cycle: {} -> {}",
                                permission,
                                down_chain.join(" -> ")
                            ),
                        ));
                    }
                    if visited.insert(rule.implies.clone()) {
                        next.push((rule.implies.clone(), down_chain));
                    }
                }
            }
            frontier = next;
            depth += 1;
        }
        Ok(())
    }

    /// Enumerate group-containment cycles for diagnostics.
    pub async fn scan_group_cycles(&self, namespace: &str) -> Result<Vec<Vec<String>>> {
        let filter = TupleFilter::new().with_relation(MEMBER_RELATION);
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for tuple in self.store.find_tuples(namespace, &filter).await? {
            if tuple.subject.subject_type == USER_SUBJECT_TYPE {
                continue;
            }
            let child = format!("{}:{}", tuple.subject.subject_type, tuple.subject.subject_id);
            adjacency
                .entry(child)
                .or_default()
                .push(tuple.resource.to_string());
        }
        Ok(self.scan(&adjacency, self.config.max_group_depth))
    }

    /// Enumerate resource-parent cycles for diagnostics.
    pub async fn scan_resource_cycles(&self, namespace: &str) -> Result<Vec<Vec<String>>> {
        let filter = TupleFilter::new().with_relation(PARENT_RELATION);
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for tuple in self.store.find_tuples(namespace, &filter).await? {
            let parent = format!("{}:{}", tuple.subject.subject_type, tuple.subject.subject_id);
            adjacency
                .entry(tuple.resource.to_string())
                .or_default()
                .push(parent);
        }
        Ok(self.scan(&adjacency, self.config.max_resource_depth))
    }

    /// Depth-bounded path enumeration reporting paths whose last node
    /// repeats an earlier one. Each cycle is reported once in canonical
    /// rotation.
    fn scan(&self, adjacency: &HashMap<String, Vec<String>>, max_depth: usize) -> Vec<Vec<String>> {
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut cycles = Vec::new();

        for start in adjacency.keys() {
            let mut stack: Vec<Vec<String>> = vec![vec![start.clone()]];
            while let Some(path) = stack.pop() {
                if path.len() > max_depth {
                    continue;
                }
                let tail = path.last().unwrap();
                let Some(nexts) = adjacency.get(tail) else {
                    continue;
                };
                for next in nexts {
                    if let Some(pos) = path.iter().position(|n| n == next) {
                        let cycle = canonical_rotation(&path[pos..]);
                        if seen.insert(cycle.clone()) {
                            cycles.push(cycle);
                        }
                    } else {
                        let mut extended = path.clone();
                        extended.push(next.clone());
                        stack.push(extended);
                    }
                }
            }
        }
        cycles
    }
}

fn canonical_rotation(cycle: &[String]) -> Vec<String> {
    let min_pos = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, v)| v.as_str())
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated: Vec<String> = Vec::with_capacity(cycle.len());
    rotated.extend_from_slice(&cycle[min_pos..]);
    rotated.extend_from_slice(&cycle[..min_pos]);
    rotated
}
