//! Resource graph validation.
//!
//! Edges run from a dependency to its dependent (Network -> Cluster -> Service).
//! We keep two representations:
//! - `Declaration`: resources in the order they were declared
//! - `ResourceGraph`: validated and normalized, with a deterministic build order

use crate::error::ConfigurationError;
use crate::spec::{LogicalId, ResourceSpec};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Resources as declared, before validation.
#[derive(Debug, Clone, Default)]
pub struct Declaration {
    pub resources: Vec<(LogicalId, ResourceSpec)>,
}

impl Declaration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource and hand back its id so later declarations can reference it.
    pub fn declare(&mut self, id: LogicalId, spec: ResourceSpec) -> LogicalId {
        self.resources.push((id.clone(), spec));
        id
    }
}

/// Validated + normalized resource graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceGraph {
    pub nodes: BTreeMap<LogicalId, ResourceSpec>,
    /// dependency -> dependents
    pub children: BTreeMap<LogicalId, Vec<LogicalId>>,
    /// dependent -> dependencies
    pub parents: BTreeMap<LogicalId, Vec<LogicalId>>,
    pub roots: Vec<LogicalId>,
    /// Topological order; ties are broken by logical id.
    pub order: Vec<LogicalId>,
}

impl ResourceGraph {
    pub fn get(&self, id: &LogicalId) -> Option<&ResourceSpec> {
        self.nodes.get(id)
    }

    /// Nodes in build order.
    pub fn iter_ordered(&self) -> impl Iterator<Item = (&LogicalId, &ResourceSpec)> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|spec| (id, spec)))
    }

    /// First node of the given kind in build order.
    #[cfg(test)]
    pub fn find_kind(&self, kind: &str) -> Option<(&LogicalId, &ResourceSpec)> {
        self.iter_ordered().find(|(_, spec)| spec.kind() == kind)
    }
}

impl Declaration {
    /// Validate a Declaration and build a ResourceGraph:
    /// - unique logical ids
    /// - references resolve to declared resources
    /// - cycle detection (acyclic)
    /// - references point at the expected kind
    /// - deterministic topological order
    pub fn validate_and_build(&self) -> Result<ResourceGraph, ConfigurationError> {
        // 1) Unique nodes.
        let mut nodes = BTreeMap::<LogicalId, ResourceSpec>::new();
        for (id, spec) in &self.resources {
            if nodes.insert(id.clone(), spec.clone()).is_some() {
                return Err(ConfigurationError::DuplicateResource(id.to_string()));
            }
        }
        if nodes.is_empty() {
            return Err(ConfigurationError::InvalidValue {
                field: "resources",
                reason: "declaration contains no resources".to_string(),
            });
        }

        // 2) Build adjacency maps.
        let mut children = BTreeMap::<LogicalId, Vec<LogicalId>>::new();
        let mut parents = BTreeMap::<LogicalId, Vec<LogicalId>>::new();
        for (id, spec) in &nodes {
            for (dep, _) in spec.references() {
                if !nodes.contains_key(dep) {
                    return Err(ConfigurationError::DanglingReference {
                        from: id.to_string(),
                        to: dep.to_string(),
                    });
                }
                children.entry(dep.clone()).or_default().push(id.clone());
                parents.entry(id.clone()).or_default().push(dep.clone());
            }
        }

        // 3) Roots.
        let roots: Vec<LogicalId> = nodes
            .keys()
            .filter(|n| parents.get(*n).map(|p| p.is_empty()).unwrap_or(true))
            .cloned()
            .collect();
        if roots.is_empty() {
            return Err(ConfigurationError::Cycle(
                "no roots found, every resource has a dependency".to_string(),
            ));
        }

        // 4) Cycle detection (DFS coloring) over every node, so cycles unreachable
        // from a root are caught too.
        #[derive(Copy, Clone, PartialEq, Eq)]
        enum Mark {
            Temp,
            Perm,
        }

        fn dfs(
            v: &LogicalId,
            children: &BTreeMap<LogicalId, Vec<LogicalId>>,
            marks: &mut BTreeMap<LogicalId, Mark>,
            stack: &mut Vec<String>,
        ) -> Result<(), ConfigurationError> {
            if let Some(Mark::Perm) = marks.get(v) {
                return Ok(());
            }
            if let Some(Mark::Temp) = marks.get(v) {
                // v is in the current recursion stack => cycle
                stack.push(v.to_string());
                return Err(ConfigurationError::Cycle(stack.join(" -> ")));
            }

            marks.insert(v.clone(), Mark::Temp);
            stack.push(v.to_string());

            if let Some(kids) = children.get(v) {
                for k in kids {
                    dfs(k, children, marks, stack)?;
                }
            }

            stack.pop();
            marks.insert(v.clone(), Mark::Perm);
            Ok(())
        }

        let mut marks = BTreeMap::<LogicalId, Mark>::new();
        let mut stack = Vec::<String>::new();
        for id in nodes.keys() {
            stack.clear();
            dfs(id, &children, &mut marks, &mut stack)?;
        }

        // 5) Reference kinds (a cluster must sit on a network, and so on).
        for (id, spec) in &nodes {
            for (dep, kind) in spec.references() {
                let found = nodes[dep].kind();
                if found != kind {
                    return Err(ConfigurationError::WrongReferenceKind {
                        from: id.to_string(),
                        to: dep.to_string(),
                        expected: kind,
                        found,
                    });
                }
            }
        }

        // 6) Topological order (Kahn), smallest ready id first.
        let mut indegree: BTreeMap<&LogicalId, usize> = nodes
            .keys()
            .map(|id| (id, parents.get(id).map(Vec::len).unwrap_or(0)))
            .collect();
        let mut ready: BTreeSet<&LogicalId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(id) = ready.pop_first() {
            order.push(id.clone());
            for kid in children.get(id).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(kid) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(kid);
                    }
                }
            }
        }

        Ok(ResourceGraph {
            nodes,
            children,
            parents,
            roots,
            order,
        })
    }
}
