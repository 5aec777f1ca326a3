//! Role inheritance graph with Kahn's algorithm for topological sorting
//!
//! This module implements Kahn's algorithm to:
//! 1. Detect circular inheritance between roles
//! 2. Provide an order in which inherited roles come before the roles that
//!    inherit them, so closures can be computed in a single pass

use super::types::RoleDefinition;
use crate::types::RoleId;
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Graph-related errors
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    /// Circular inheritance detected in the role graph
    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    /// Role id is duplicated
    #[error("Duplicate role name: {0}")]
    DuplicateRole(String),

    /// Invalid role definition
    #[error("Invalid role: {0}")]
    InvalidRole(String),
}

/// Graph node representing a role and the roles it inherits
#[derive(Debug, Clone)]
struct GraphNode {
    /// Inherited roles that are themselves defined in the graph
    dependencies: Vec<RoleId>,
}

impl GraphNode {
    fn new() -> Self {
        Self {
            dependencies: Vec::new(),
        }
    }

    fn add_dependency(&mut self, depends_on: RoleId) {
        if !self.dependencies.contains(&depends_on) {
            self.dependencies.push(depends_on);
        }
    }
}

/// Role inheritance graph
///
/// Nodes keep insertion order so evaluation order and cycle reports are
/// stable across runs.
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    nodes: IndexMap<RoleId, GraphNode>,
}

impl RoleGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of roles in the graph
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn add_node(&mut self, id: &str) -> Result<(), GraphError> {
        if self.nodes.contains_key(id) {
            return Err(GraphError::DuplicateRole(id.to_string()));
        }
        self.nodes.insert(id.to_string(), GraphNode::new());
        Ok(())
    }

    /// Record that `from_role` inherits `to_role`
    fn add_dependency_edge(&mut self, from_role: &str, to_role: &str) {
        if let Some(node) = self.nodes.get_mut(from_role) {
            node.add_dependency(to_role.to_string());
        }
    }

    /// Direct inherited roles of a node (only those defined in the graph)
    pub fn dependencies(&self, id: &str) -> &[RoleId] {
        self.nodes
            .get(id)
            .map(|n| n.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Resolve the evaluation order using Kahn's algorithm
    ///
    /// Inherited roles are returned before the roles that inherit them.
    ///
    /// # Errors
    ///
    /// Returns an error if a circular dependency is detected.
    pub fn resolve_order(&self) -> Result<Vec<RoleId>, GraphError> {
        if self.nodes.is_empty() {
            return Ok(Vec::new());
        }

        // dep -> roles that inherit it
        let mut reverse_edges: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut in_degree: IndexMap<&str, usize> = IndexMap::new();

        for name in self.nodes.keys() {
            reverse_edges.insert(name, Vec::new());
            in_degree.insert(name, 0);
        }

        for (name, node) in &self.nodes {
            for dep in &node.dependencies {
                if let Some(edges) = reverse_edges.get_mut(dep.as_str()) {
                    edges.push(name);
                }
                if let Some(degree) = in_degree.get_mut(name.as_str()) {
                    *degree += 1;
                }
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());

        while let Some(current) = queue.pop_front() {
            sorted.push(current.to_string());

            if let Some(dependents) = reverse_edges.get(current) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(*dependent);
                        }
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            return match self.find_cycle() {
                Some(cycle) => Err(GraphError::CircularDependency(cycle.join(" -> "))),
                None => Err(GraphError::CircularDependency(
                    "Unknown cycle detected".to_string(),
                )),
            };
        }

        Ok(sorted)
    }

    /// Detect a cycle in the graph
    ///
    /// # Errors
    ///
    /// Returns the first cycle found as a `CircularDependency` error.
    pub fn detect_cycles(&self) -> Result<(), GraphError> {
        match self.find_cycle() {
            Some(cycle) => Err(GraphError::CircularDependency(cycle.join(" -> "))),
            None => Ok(()),
        }
    }

    /// DFS with three states: 0 unvisited, 1 on the stack, 2 finished
    fn find_cycle(&self) -> Option<Vec<RoleId>> {
        let mut state: HashMap<&str, u8> = self.nodes.keys().map(|k| (k.as_str(), 0)).collect();

        for start in self.nodes.keys() {
            if state.get(start.as_str()) == Some(&0) {
                let mut path = Vec::new();
                if let Some(cycle) = self.dfs_cycle_detect(start, &mut state, &mut path) {
                    return Some(cycle);
                }
            }
        }

        None
    }

    fn dfs_cycle_detect<'a>(
        &'a self,
        node: &'a str,
        state: &mut HashMap<&'a str, u8>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<RoleId>> {
        match state.get(node) {
            Some(1) => {
                let start = path.iter().position(|n| *n == node)?;
                let cycle = path[start..]
                    .iter()
                    .chain(std::iter::once(&node))
                    .map(|n| n.to_string())
                    .collect();
                return Some(cycle);
            }
            Some(2) => return None,
            _ => {}
        }

        state.insert(node, 1);
        path.push(node);

        if let Some(graph_node) = self.nodes.get(node) {
            for dep in &graph_node.dependencies {
                if let Some(cycle) = self.dfs_cycle_detect(dep, state, path) {
                    return Some(cycle);
                }
            }
        }

        state.insert(node, 2);
        path.pop();

        None
    }
}

/// Collects role definitions and builds a validated [`RoleGraph`]
#[derive(Debug, Clone, Default)]
pub struct RoleGraphBuilder {
    roles: Vec<(RoleId, RoleDefinition)>,
}

impl RoleGraphBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a role definition under `id`
    pub fn add_role(&mut self, id: impl Into<String>, role: RoleDefinition) -> Result<(), GraphError> {
        let id = id.into();
        role.validate(&id)
            .map_err(|e| GraphError::InvalidRole(e.to_string()))?;

        if self.roles.iter().any(|(existing, _)| *existing == id) {
            return Err(GraphError::DuplicateRole(id));
        }

        self.roles.push((id, role));
        Ok(())
    }

    /// Build the graph, adding edges only between defined roles
    pub fn build(self) -> Result<RoleGraph, GraphError> {
        let mut graph = RoleGraph::new();
        let defined: IndexSet<&str> = self.roles.iter().map(|(id, _)| id.as_str()).collect();

        for (id, _) in &self.roles {
            graph.add_node(id)?;
        }

        for (id, role) in &self.roles {
            for parent in &role.inherits {
                if defined.contains(parent.as_str()) {
                    graph.add_dependency_edge(id, parent);
                }
            }
        }

        graph.detect_cycles()?;

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(inherits: &[&str]) -> RoleDefinition {
        RoleDefinition::new("test").with_inherits(inherits.iter().copied())
    }

    #[test]
    fn test_empty_graph() {
        let graph = RoleGraph::new();
        assert_eq!(graph.resolve_order().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_linear_inheritance() {
        // admin -> editor -> viewer
        let mut builder = RoleGraphBuilder::new();
        builder.add_role("admin", role(&["editor"])).unwrap();
        builder.add_role("editor", role(&["viewer"])).unwrap();
        builder.add_role("viewer", role(&[])).unwrap();

        let graph = builder.build().unwrap();
        let order = graph.resolve_order().unwrap();

        let idx = |name: &str| order.iter().position(|r| r == name).unwrap();
        assert!(idx("viewer") < idx("editor"));
        assert!(idx("editor") < idx("admin"));
    }

    #[test]
    fn test_diamond_inheritance() {
        let mut builder = RoleGraphBuilder::new();
        builder.add_role("lead", role(&["manager", "developer"])).unwrap();
        builder.add_role("manager", role(&["employee"])).unwrap();
        builder.add_role("developer", role(&["employee"])).unwrap();
        builder.add_role("employee", role(&[])).unwrap();

        let graph = builder.build().unwrap();
        let order = graph.resolve_order().unwrap();
        let idx = |name: &str| order.iter().position(|r| r == name).unwrap();

        assert!(idx("employee") < idx("manager"));
        assert!(idx("employee") < idx("developer"));
        assert!(idx("manager") < idx("lead"));
        assert!(idx("developer") < idx("lead"));
    }

    #[test]
    fn test_undefined_parent_is_a_leaf() {
        let mut builder = RoleGraphBuilder::new();
        builder.add_role("auditor", role(&["external"])).unwrap();

        let graph = builder.build().unwrap();
        assert!(graph.dependencies("auditor").is_empty());
        assert_eq!(graph.resolve_order().unwrap(), vec!["auditor"]);
    }

    #[test]
    fn test_two_role_cycle() {
        let mut builder = RoleGraphBuilder::new();
        builder.add_role("role_a", role(&["role_b"])).unwrap();
        builder.add_role("role_b", role(&["role_a"])).unwrap();

        match builder.build() {
            Err(GraphError::CircularDependency(msg)) => {
                assert!(msg.contains("role_a") && msg.contains("role_b"));
            }
            other => panic!("Expected CircularDependency error, got {:?}", other),
        }
    }

    #[test]
    fn test_multi_role_cycle() {
        let mut builder = RoleGraphBuilder::new();
        builder.add_role("role_a", role(&["role_b"])).unwrap();
        builder.add_role("role_b", role(&["role_c"])).unwrap();
        builder.add_role("role_c", role(&["role_a"])).unwrap();

        match builder.build() {
            Err(GraphError::CircularDependency(msg)) => {
                assert_eq!(msg, "role_a -> role_b -> role_c -> role_a");
            }
            other => panic!("Expected CircularDependency error, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_cycle() {
        let mut builder = RoleGraphBuilder::new();
        builder.add_role("role_a", role(&["role_b"])).unwrap();
        builder.add_role("role_b", role(&["role_c"])).unwrap();
        builder.add_role("role_c", role(&["role_b"])).unwrap();
        builder.add_role("role_d", role(&[])).unwrap();

        assert!(matches!(builder.build(), Err(GraphError::CircularDependency(_))));
    }

    #[test]
    fn test_duplicate_role_names() {
        let mut builder = RoleGraphBuilder::new();
        builder.add_role("manager", role(&[])).unwrap();
        let result = builder.add_role("manager", role(&["employee"]));
        assert!(matches!(result, Err(GraphError::DuplicateRole(_))));
    }

    #[test]
    fn test_self_inheritance_is_invalid() {
        let mut builder = RoleGraphBuilder::new();
        let result = builder.add_role("manager", role(&["manager"]));
        assert!(matches!(result, Err(GraphError::InvalidRole(_))));
    }
}
