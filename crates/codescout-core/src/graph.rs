//! Code-Relationship Graph Model
//!
//! Nodes are code entities (files, functions, classes, ...); edges are the
//! relationships between them (containment, calls, imports, typing). The
//! in-memory store is a `petgraph` `StableGraph` with secondary indexes by
//! id, name, and file, which keeps caller/callee and dependency traversals
//! cheap.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

// ============================================================================
// Node and Edge Kinds
// ============================================================================

/// Kinds of graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphNodeKind {
    File,
    Function,
    Method,
    Class,
    Interface,
    Variable,
    Import,
}

impl GraphNodeKind {
    /// Get the string representation used in payloads and dumps.
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphNodeKind::File => "file",
            GraphNodeKind::Function => "function",
            GraphNodeKind::Method => "method",
            GraphNodeKind::Class => "class",
            GraphNodeKind::Interface => "interface",
            GraphNodeKind::Variable => "variable",
            GraphNodeKind::Import => "import",
        }
    }
}

/// Kinds of relationships between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphEdgeKind {
    Contains,
    Calls,
    CalledBy,
    Imports,
    Extends,
    Implements,
    TestedBy,
    HasType,
    ReturnsType,
    AcceptsType,
}

impl GraphEdgeKind {
    /// Get the string representation used in payloads and dumps.
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphEdgeKind::Contains => "CONTAINS",
            GraphEdgeKind::Calls => "CALLS",
            GraphEdgeKind::CalledBy => "CALLED_BY",
            GraphEdgeKind::Imports => "IMPORTS",
            GraphEdgeKind::Extends => "EXTENDS",
            GraphEdgeKind::Implements => "IMPLEMENTS",
            GraphEdgeKind::TestedBy => "TESTED_BY",
            GraphEdgeKind::HasType => "HAS_TYPE",
            GraphEdgeKind::ReturnsType => "RETURNS_TYPE",
            GraphEdgeKind::AcceptsType => "ACCEPTS_TYPE",
        }
    }

    /// Edge kinds that express a dependency from source to target.
    ///
    /// Used by dependency and impact traversals.
    pub fn is_dependency(&self) -> bool {
        matches!(
            self,
            GraphEdgeKind::Calls
                | GraphEdgeKind::Imports
                | GraphEdgeKind::Extends
                | GraphEdgeKind::Implements
                | GraphEdgeKind::HasType
                | GraphEdgeKind::ReturnsType
                | GraphEdgeKind::AcceptsType
        )
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// A code entity in the graph.
///
/// `id` is the block's segment id where one exists, otherwise
/// `"{file_path}:{name}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    pub kind: GraphNodeKind,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl GraphNode {
    /// Build the fallback id for entities without a segment id.
    pub fn path_name_id(file_path: &str, name: &str) -> String {
        format!("{file_path}:{name}")
    }
}

/// A relationship to be inserted: `(from_id, kind, to_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub from_id: String,
    pub kind: GraphEdgeKind,
    pub to_id: String,
}

// ============================================================================
// Graph store
// ============================================================================

/// In-memory code-relationship graph.
///
/// Reciprocal edge kinds are normalized at insert (`CALLED_BY a→b` is stored
/// as `CALLS b→a`), so traversals only ever follow one direction per kind.
#[derive(Debug, Default)]
pub struct CodeGraph {
    graph: StableGraph<GraphNode, GraphEdgeKind>,
    by_id: HashMap<String, NodeIndex>,
    by_name: HashMap<String, Vec<NodeIndex>>,
    by_file: HashMap<String, Vec<NodeIndex>>,
}

impl CodeGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Insert or replace a node by id.
    pub fn upsert_node(&mut self, node: GraphNode) {
        if let Some(&idx) = self.by_id.get(&node.id) {
            // Replacing: refresh secondary indexes if name/file changed
            let old = self.graph[idx].clone();
            if old.name != node.name {
                Self::unindex(&mut self.by_name, &old.name, idx);
                self.by_name.entry(node.name.clone()).or_default().push(idx);
            }
            if old.file_path != node.file_path {
                Self::unindex(&mut self.by_file, &old.file_path, idx);
                self.by_file.entry(node.file_path.clone()).or_default().push(idx);
            }
            self.graph[idx] = node;
            return;
        }

        let id = node.id.clone();
        let name = node.name.clone();
        let file = node.file_path.clone();
        let idx = self.graph.add_node(node);
        self.by_id.insert(id, idx);
        self.by_name.entry(name).or_default().push(idx);
        self.by_file.entry(file).or_default().push(idx);
    }

    fn unindex(map: &mut HashMap<String, Vec<NodeIndex>>, key: &str, idx: NodeIndex) {
        if let Some(list) = map.get_mut(key) {
            list.retain(|&i| i != idx);
            if list.is_empty() {
                map.remove(key);
            }
        }
    }

    /// Insert an edge. Returns `false` when either endpoint is unknown
    /// (the dangling edge is dropped).
    pub fn add_relationship(&mut self, rel: &GraphRelationship) -> bool {
        let (from, to, kind) = match rel.kind {
            // Normalize reciprocal kinds to their forward direction
            GraphEdgeKind::CalledBy => (&rel.to_id, &rel.from_id, GraphEdgeKind::Calls),
            kind => (&rel.from_id, &rel.to_id, kind),
        };

        let (Some(&a), Some(&b)) = (self.by_id.get(from), self.by_id.get(to)) else {
            return false;
        };

        // No duplicate edges of the same kind between the same endpoints
        let exists = self
            .graph
            .edges_connecting(a, b)
            .any(|e| *e.weight() == kind);
        if !exists {
            self.graph.add_edge(a, b, kind);
        }
        true
    }

    /// Remove every node (and its edges) belonging to a file.
    pub fn remove_file(&mut self, file_path: &str) -> usize {
        let Some(indexes) = self.by_file.remove(file_path) else {
            return 0;
        };
        let removed = indexes.len();
        for idx in indexes {
            if let Some(node) = self.graph.remove_node(idx) {
                self.by_id.remove(&node.id);
                Self::unindex(&mut self.by_name, &node.name, idx);
            }
        }
        removed
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.graph.clear();
        self.by_id.clear();
        self.by_name.clear();
        self.by_file.clear();
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.by_id.get(id).map(|&idx| &self.graph[idx])
    }

    /// All nodes with the given name.
    pub fn nodes_named(&self, name: &str) -> Vec<&GraphNode> {
        self.by_name
            .get(name)
            .map(|indexes| indexes.iter().map(|&idx| &self.graph[idx]).collect())
            .unwrap_or_default()
    }

    /// Nodes that call the named entity.
    pub fn find_callers(&self, name: &str) -> Vec<GraphNode> {
        self.neighbors_of(name, Direction::Incoming, |kind| kind == GraphEdgeKind::Calls)
    }

    /// Nodes the named entity calls.
    pub fn find_callees(&self, name: &str) -> Vec<GraphNode> {
        self.neighbors_of(name, Direction::Outgoing, |kind| kind == GraphEdgeKind::Calls)
    }

    /// Nodes the named entity depends on.
    pub fn find_dependencies(&self, name: &str) -> Vec<GraphNode> {
        self.neighbors_of(name, Direction::Outgoing, |kind| kind.is_dependency())
    }

    /// Nodes that depend on the named entity.
    pub fn find_dependents(&self, name: &str) -> Vec<GraphNode> {
        self.neighbors_of(name, Direction::Incoming, |kind| kind.is_dependency())
    }

    /// Tests that exercise the named entity.
    pub fn find_tests(&self, name: &str) -> Vec<GraphNode> {
        self.neighbors_of(name, Direction::Outgoing, |kind| kind == GraphEdgeKind::TestedBy)
    }

    /// Transitive set of nodes reachable from the named entity via reverse
    /// dependency edges, up to `depth` hops: the blast radius of a change.
    pub fn find_impacted(&self, name: &str, depth: usize) -> Vec<GraphNode> {
        let Some(starts) = self.by_name.get(name) else {
            return Vec::new();
        };

        let mut seen: HashSet<NodeIndex> = starts.iter().copied().collect();
        let mut queue: VecDeque<(NodeIndex, usize)> =
            starts.iter().map(|&idx| (idx, 0)).collect();
        let mut impacted = Vec::new();

        while let Some((idx, dist)) = queue.pop_front() {
            if dist >= depth {
                continue;
            }
            for edge in self.graph.edges_directed(idx, Direction::Incoming) {
                if !edge.weight().is_dependency() {
                    continue;
                }
                let neighbor = edge.source();
                if seen.insert(neighbor) {
                    impacted.push(self.graph[neighbor].clone());
                    queue.push_back((neighbor, dist + 1));
                }
            }
        }

        impacted
    }

    fn neighbors_of(
        &self,
        name: &str,
        direction: Direction,
        filter: impl Fn(GraphEdgeKind) -> bool,
    ) -> Vec<GraphNode> {
        let Some(starts) = self.by_name.get(name) else {
            return Vec::new();
        };

        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let mut result = Vec::new();
        for &idx in starts {
            for edge in self.graph.edges_directed(idx, direction) {
                if !filter(*edge.weight()) {
                    continue;
                }
                let neighbor = match direction {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                if seen.insert(neighbor) {
                    result.push(self.graph[neighbor].clone());
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, name: &str, kind: GraphNodeKind, file: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            file_path: file.to_string(),
            start_line: 1,
            end_line: 10,
        }
    }

    fn sample_graph() -> CodeGraph {
        let mut g = CodeGraph::new();
        g.upsert_node(node("svc", "UserService", GraphNodeKind::Class, "src/service.ts"));
        g.upsert_node(node("login", "login", GraphNodeKind::Method, "src/ctrl.ts"));
        g.upsert_node(node("register", "register", GraphNodeKind::Method, "src/ctrl.ts"));
        g.upsert_node(node("repo", "UserRepo", GraphNodeKind::Class, "src/repo.ts"));
        g.add_relationship(&GraphRelationship {
            from_id: "login".into(),
            kind: GraphEdgeKind::Calls,
            to_id: "svc".into(),
        });
        g.add_relationship(&GraphRelationship {
            from_id: "register".into(),
            kind: GraphEdgeKind::Calls,
            to_id: "svc".into(),
        });
        g.add_relationship(&GraphRelationship {
            from_id: "svc".into(),
            kind: GraphEdgeKind::HasType,
            to_id: "repo".into(),
        });
        g
    }

    #[test]
    fn test_find_callers() {
        let g = sample_graph();
        let callers = g.find_callers("UserService");
        let names: Vec<_> = callers.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(callers.len(), 2);
        assert!(names.contains(&"login"));
        assert!(names.contains(&"register"));
    }

    #[test]
    fn test_find_callees() {
        let g = sample_graph();
        let callees = g.find_callees("login");
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].name, "UserService");
    }

    #[test]
    fn test_called_by_normalizes_to_calls() {
        let mut g = CodeGraph::new();
        g.upsert_node(node("a", "a", GraphNodeKind::Function, "a.rs"));
        g.upsert_node(node("b", "b", GraphNodeKind::Function, "b.rs"));
        // "a is called by b" must read back as "b calls a"
        g.add_relationship(&GraphRelationship {
            from_id: "a".into(),
            kind: GraphEdgeKind::CalledBy,
            to_id: "b".into(),
        });
        let callers = g.find_callers("a");
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].name, "b");
    }

    #[test]
    fn test_dangling_edge_dropped() {
        let mut g = CodeGraph::new();
        g.upsert_node(node("a", "a", GraphNodeKind::Function, "a.rs"));
        let inserted = g.add_relationship(&GraphRelationship {
            from_id: "a".into(),
            kind: GraphEdgeKind::Calls,
            to_id: "ghost".into(),
        });
        assert!(!inserted);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_dependencies_and_dependents() {
        let g = sample_graph();
        let deps = g.find_dependencies("UserService");
        assert!(deps.iter().any(|n| n.name == "UserRepo"));
        let dependents = g.find_dependents("UserService");
        assert_eq!(dependents.len(), 2);
    }

    #[test]
    fn test_impact_bounded_by_depth() {
        let mut g = CodeGraph::new();
        for (id, file) in [("a", "a.rs"), ("b", "b.rs"), ("c", "c.rs"), ("d", "d.rs")] {
            g.upsert_node(node(id, id, GraphNodeKind::Function, file));
        }
        // d -> c -> b -> a  (each depends on the next)
        for (from, to) in [("d", "c"), ("c", "b"), ("b", "a")] {
            g.add_relationship(&GraphRelationship {
                from_id: from.into(),
                kind: GraphEdgeKind::Calls,
                to_id: to.into(),
            });
        }
        let one_hop = g.find_impacted("a", 1);
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].name, "b");

        let all = g.find_impacted("a", 10);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_remove_file_drops_nodes_and_edges() {
        let mut g = sample_graph();
        let removed = g.remove_file("src/ctrl.ts");
        assert_eq!(removed, 2);
        assert!(g.find_callers("UserService").is_empty());
        assert!(g.node("login").is_none());
    }

    #[test]
    fn test_duplicate_edges_not_inserted() {
        let mut g = sample_graph();
        let edges_before = g.edge_count();
        g.add_relationship(&GraphRelationship {
            from_id: "login".into(),
            kind: GraphEdgeKind::Calls,
            to_id: "svc".into(),
        });
        assert_eq!(g.edge_count(), edges_before);
    }
}
