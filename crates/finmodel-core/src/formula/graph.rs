//! Dependency graph over line item codes.
//!
//! An edge `from -> to` means "from depends on to": `to` must be
//! calculated before `from`. Topological order is produced by Kahn's
//! algorithm; ties break lexicographically so the order is deterministic
//! and stable across re-invocations.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::FinModelError;
use crate::FinModelResult;

/// Directed acyclic graph of calculation dependencies.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    /// node -> set of nodes it depends on
    deps: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, code: impl Into<String>) {
        self.nodes.insert(code.into());
    }

    /// Record that `from` depends on `to`. Both endpoints become nodes.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let from = from.into();
        let to = to.into();
        self.nodes.insert(from.clone());
        self.nodes.insert(to.clone());
        self.deps.entry(from).or_default().insert(to);
    }

    /// Direct dependencies of a node, lexicographically ordered.
    pub fn dependencies_of(&self, code: &str) -> Vec<String> {
        self.deps
            .get(code)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All nodes, lexicographically ordered.
    pub fn nodes(&self) -> Vec<String> {
        self.nodes.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.deps.clear();
    }

    /// Dependency-respecting calculation order (dependencies first).
    ///
    /// Kahn's algorithm with a lexicographic ready set. Fails with the
    /// cycle path when the graph is cyclic.
    pub fn topological_sort(&self) -> FinModelResult<Vec<String>> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| {
                let degree = self.deps.get(n).map_or(0, |d| d.len());
                (n.as_str(), degree)
            })
            .collect();

        // Reverse adjacency: dependency -> nodes that depend on it
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (from, tos) in &self.deps {
            for to in tos {
                dependents.entry(to.as_str()).or_default().push(from.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(&node) = ready.iter().next() {
            ready.remove(node);
            order.push(node.to_string());

            if let Some(deps) = dependents.get(node) {
                for &dependent in deps {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(dependent);
                        }
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            let path = self.find_cycle().unwrap_or_default();
            return Err(FinModelError::CircularDependency { path });
        }
        Ok(order)
    }

    pub fn has_cycles(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Find one cycle via three-colour DFS.
    ///
    /// Returns the cycle as a closed path, e.g. `["A", "B", "C", "A"]`.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visiting: BTreeSet<&str> = BTreeSet::new();
        let mut visited: BTreeSet<&str> = BTreeSet::new();

        for node in &self.nodes {
            if visited.contains(node.as_str()) {
                continue;
            }
            let mut path: Vec<&str> = Vec::new();
            if let Some(cycle) = self.dfs_cycle(node, &mut visiting, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visiting: &mut BTreeSet<&'a str>,
        visited: &mut BTreeSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visiting.insert(node);
        path.push(node);

        if let Some(deps) = self.deps.get(node) {
            for dep in deps {
                if visiting.contains(dep.as_str()) {
                    // Back edge: close the cycle from its first occurrence
                    let start = path.iter().position(|&n| n == dep.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                if !visited.contains(dep.as_str()) {
                    if let Some(cycle) = self.dfs_cycle(dep, visiting, visited, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        visiting.remove(node);
        visited.insert(node);
        path.pop();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_topological_sort_dependencies_first() {
        let mut graph = DependencyGraph::new();
        graph.add_node("REVENUE");
        graph.add_node("COGS");
        graph.add_edge("GROSS_PROFIT", "REVENUE");
        graph.add_edge("GROSS_PROFIT", "COGS");
        graph.add_edge("NET_INCOME", "GROSS_PROFIT");

        let order = graph.topological_sort().unwrap();
        let pos = |code: &str| order.iter().position(|c| c == code).unwrap();
        assert!(pos("REVENUE") < pos("GROSS_PROFIT"));
        assert!(pos("COGS") < pos("GROSS_PROFIT"));
        assert!(pos("GROSS_PROFIT") < pos("NET_INCOME"));
    }

    #[test]
    fn test_sort_is_deterministic_and_lexicographic() {
        let mut graph = DependencyGraph::new();
        for code in ["ZETA", "ALPHA", "MID"] {
            graph.add_node(code);
        }
        let first = graph.topological_sort().unwrap();
        let second = graph.topological_sort().unwrap();
        assert_eq!(first, vec!["ALPHA", "MID", "ZETA"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_cycle_detection_returns_path() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("A", "B");
        graph.add_edge("B", "C");
        graph.add_edge("C", "A");

        assert!(graph.has_cycles());
        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.len() == 4);

        let err = graph.topological_sort().unwrap_err();
        match err {
            FinModelError::CircularDependency { path } => assert!(!path.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_acyclic_graph_has_no_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("B", "A");
        graph.add_edge("C", "B");
        assert!(!graph.has_cycles());
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn test_self_edge_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("X", "X");
        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle, vec!["X".to_string(), "X".to_string()]);
    }
}
