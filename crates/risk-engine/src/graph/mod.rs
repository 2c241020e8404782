// crates/risk-engine/src/graph/mod.rs
// Graph Writer (§4.7 L7): the derived graph mirror. The relational store
// (db::writer) is authoritative; this module idempotently upserts nodes and
// edges into an in-process `petgraph::StableDiGraph`, rebuildable at any
// time by replaying the relational store (§3 "Graph mirror", P5).
//
// The teacher's graph sync is Neo4j UNWIND batches keyed by natural ids; we
// keep the same shape (batched upserts, `MERGE`-on-natural-key semantics,
// per-label batch sizing) but back it with petgraph so the engine carries
// no external graph-database dependency.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use serde_json::Value;

/// Node labels mirrored from the relational store (§3 "Graph mirror").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeLabel {
    File,
    CodeBlock,
    Commit,
    Developer,
    Issue,
    PullRequest,
}

impl NodeLabel {
    fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::File => "File",
            NodeLabel::CodeBlock => "CodeBlock",
            NodeLabel::Commit => "Commit",
            NodeLabel::Developer => "Developer",
            NodeLabel::Issue => "Issue",
            NodeLabel::PullRequest => "PullRequest",
        }
    }
}

/// Edge types mirrored from the relational store (§3 "Graph mirror").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Authored,
    Modified,
    ModifiedBlock,
    CreatedBlock,
    DeletedBlock,
    RenamedBlock,
    Contains,
    Imports,
    DependsOn,
    CoChangesWith,
    FixedByBlock,
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub label: NodeLabel,
    pub key: String,
    pub props: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub kind: EdgeKind,
    pub props: HashMap<String, Value>,
}

/// A node upsert request for a batch (§4.7: "batched UNWIND-style upserts").
pub struct NodeUpsert {
    pub key: String,
    pub props: HashMap<String, Value>,
}

/// An edge upsert request, naming its endpoints by `(label, key)` — matched
/// against whatever has already been upserted into the graph.
pub struct EdgeUpsert {
    pub from_label: NodeLabel,
    pub from_key: String,
    pub to_label: NodeLabel,
    pub to_key: String,
    pub kind: EdgeKind,
    pub props: HashMap<String, Value>,
}

/// Default per-label batch size, mirroring the teacher's configurable
/// UNWIND chunk sizes. Kept generous since petgraph upserts are in-process.
const DEFAULT_BATCH_SIZE: usize = 500;

/// The derived graph mirror (§3). Never treated as a source of truth —
/// components must never read back a value they just wrote here as
/// authoritative (§9 Design Notes).
pub struct GraphStore {
    graph: StableDiGraph<GraphNode, GraphEdge>,
    index: HashMap<(NodeLabel, String), NodeIndex>,
    batch_size: usize,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            index: HashMap::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Self::new()
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_node(&self, label: NodeLabel, key: &str) -> bool {
        self.index.contains_key(&(label, key.to_string()))
    }

    /// `MERGE (n:Label {key}) SET n += props` for a single node. Idempotent:
    /// a repeat call on the same `(label, key)` updates rather than
    /// duplicates.
    pub fn upsert_node(&mut self, label: NodeLabel, key: &str, props: HashMap<String, Value>) -> NodeIndex {
        match self.index.entry((label, key.to_string())) {
            Entry::Occupied(entry) => {
                let idx = *entry.get();
                if let Some(node) = self.graph.node_weight_mut(idx) {
                    node.props.extend(props);
                }
                idx
            }
            Entry::Vacant(entry) => {
                let idx = self.graph.add_node(GraphNode {
                    label,
                    key: key.to_string(),
                    props,
                });
                entry.insert(idx);
                idx
            }
        }
    }

    /// Batch node upsert, chunked at `batch_size` the way the teacher's
    /// UNWIND calls are — a no-op split here since petgraph has no
    /// round-trip cost, but it keeps the call shape identical to a real
    /// graph-database batch writer so swapping backends later is mechanical.
    pub fn upsert_nodes_batch(&mut self, label: NodeLabel, items: Vec<NodeUpsert>) -> usize {
        let mut written = 0;
        for chunk in items.chunks(self.batch_size) {
            for item in chunk {
                self.upsert_node(label, &item.key, item.props.clone());
                written += 1;
            }
        }
        written
    }

    /// `MATCH (a {from_key}), (b {to_key}) MERGE (a)-[:KIND]->(b) SET r += props`.
    /// Returns `false` (and logs a warning) if either endpoint is missing —
    /// the spec's "dangling endpoint" case (§4.7).
    pub fn upsert_edge(
        &mut self,
        from_label: NodeLabel,
        from_key: &str,
        to_label: NodeLabel,
        to_key: &str,
        kind: EdgeKind,
        props: HashMap<String, Value>,
    ) -> bool {
        let (Some(&from_idx), Some(&to_idx)) = (
            self.index.get(&(from_label, from_key.to_string())),
            self.index.get(&(to_label, to_key.to_string())),
        ) else {
            tracing::warn!(
                from = %from_key,
                to = %to_key,
                kind = ?kind,
                "graph edge upsert: dangling endpoint, skipping"
            );
            return false;
        };

        if let Some(existing) = self
            .graph
            .edges_connecting(from_idx, to_idx)
            .find(|e| e.weight().kind == kind)
            .map(|e| e.id())
        {
            if let Some(edge) = self.graph.edge_weight_mut(existing) {
                edge.props.extend(props);
            }
        } else {
            self.graph.add_edge(from_idx, to_idx, GraphEdge { kind, props });
        }
        true
    }

    /// Batch edge upsert. Returns the count actually written — fewer than
    /// `items.len()` means some endpoints were dangling (logged per-edge).
    pub fn upsert_edges_batch(&mut self, items: Vec<EdgeUpsert>) -> usize {
        let mut written = 0;
        for chunk in items.chunks(self.batch_size) {
            for item in chunk {
                if self.upsert_edge(
                    item.from_label,
                    &item.from_key,
                    item.to_label,
                    &item.to_key,
                    item.kind,
                    item.props.clone(),
                ) {
                    written += 1;
                }
            }
        }
        written
    }

    /// Undirected co-change edge: written once and read from either
    /// endpoint, matching `CO_CHANGES_WITH`'s undirected semantics (§3).
    pub fn upsert_co_change_edge(
        &mut self,
        block_a_key: &str,
        block_b_key: &str,
        co_change_count: i64,
        coupling_rate: f64,
        last_co_change: &str,
    ) -> bool {
        let mut props = HashMap::new();
        props.insert("co_change_count".to_string(), Value::from(co_change_count));
        props.insert("coupling_rate".to_string(), Value::from(coupling_rate));
        props.insert("last_co_change".to_string(), Value::from(last_co_change));
        self.upsert_edge(
            NodeLabel::CodeBlock,
            block_a_key,
            NodeLabel::CodeBlock,
            block_b_key,
            EdgeKind::CoChangesWith,
            props,
        )
    }

    pub fn node_props(&self, label: NodeLabel, key: &str) -> Option<&HashMap<String, Value>> {
        self.index
            .get(&(label, key.to_string()))
            .and_then(|idx| self.graph.node_weight(*idx))
            .map(|n| &n.props)
    }

    /// Neighbors of a node reached via a given edge kind, outbound direction.
    pub fn neighbors_via(&self, label: NodeLabel, key: &str, kind: EdgeKind) -> Vec<String> {
        let Some(&idx) = self.index.get(&(label, key.to_string())) else {
            return Vec::new();
        };
        self.graph
            .edges(idx)
            .filter(|e| e.weight().kind == kind)
            .filter_map(|e| self.graph.node_weight(e.target()))
            .map(|n| n.key.clone())
            .collect()
    }

    /// Clears the mirror — used before a from-scratch rebuild (P5).
    pub fn clear(&mut self) {
        self.graph.clear();
        self.index.clear();
    }
}

impl std::fmt::Debug for NodeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_node_is_idempotent() {
        let mut g = GraphStore::new();
        g.upsert_node(NodeLabel::File, "a.rs", HashMap::new());
        g.upsert_node(NodeLabel::File, "a.rs", HashMap::new());
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn test_upsert_node_merges_props_on_repeat() {
        let mut g = GraphStore::new();
        let mut p1 = HashMap::new();
        p1.insert("x".to_string(), Value::from(1));
        g.upsert_node(NodeLabel::File, "a.rs", p1);

        let mut p2 = HashMap::new();
        p2.insert("y".to_string(), Value::from(2));
        g.upsert_node(NodeLabel::File, "a.rs", p2);

        let props = g.node_props(NodeLabel::File, "a.rs").unwrap();
        assert_eq!(props.get("x"), Some(&Value::from(1)));
        assert_eq!(props.get("y"), Some(&Value::from(2)));
    }

    #[test]
    fn test_edge_upsert_requires_both_endpoints() {
        let mut g = GraphStore::new();
        g.upsert_node(NodeLabel::File, "a.rs", HashMap::new());
        let ok = g.upsert_edge(
            NodeLabel::File,
            "a.rs",
            NodeLabel::Commit,
            "deadbeef",
            EdgeKind::Contains,
            HashMap::new(),
        );
        assert!(!ok, "missing Commit endpoint should fail the upsert");
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_edge_upsert_succeeds_with_both_endpoints() {
        let mut g = GraphStore::new();
        g.upsert_node(NodeLabel::File, "a.rs", HashMap::new());
        g.upsert_node(NodeLabel::Commit, "deadbeef", HashMap::new());
        let ok = g.upsert_edge(
            NodeLabel::Commit,
            "deadbeef",
            NodeLabel::File,
            "a.rs",
            EdgeKind::Contains,
            HashMap::new(),
        );
        assert!(ok);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_co_change_edge_readable_from_either_endpoint() {
        let mut g = GraphStore::new();
        g.upsert_node(NodeLabel::CodeBlock, "b1", HashMap::new());
        g.upsert_node(NodeLabel::CodeBlock, "b2", HashMap::new());
        g.upsert_co_change_edge("b1", "b2", 3, 0.75, "2026-01-01");

        let from_a = g.neighbors_via(NodeLabel::CodeBlock, "b1", EdgeKind::CoChangesWith);
        assert_eq!(from_a, vec!["b2".to_string()]);
    }

    #[test]
    fn test_batch_upsert_counts_dangling_endpoints() {
        let mut g = GraphStore::new();
        g.upsert_node(NodeLabel::File, "a.rs", HashMap::new());
        g.upsert_node(NodeLabel::Commit, "sha1", HashMap::new());

        let items = vec![
            EdgeUpsert {
                from_label: NodeLabel::Commit,
                from_key: "sha1".to_string(),
                to_label: NodeLabel::File,
                to_key: "a.rs".to_string(),
                kind: EdgeKind::Contains,
                props: HashMap::new(),
            },
            EdgeUpsert {
                from_label: NodeLabel::Commit,
                from_key: "sha1".to_string(),
                to_label: NodeLabel::File,
                to_key: "missing.rs".to_string(),
                kind: EdgeKind::Contains,
                props: HashMap::new(),
            },
        ];
        let written = g.upsert_edges_batch(items);
        assert_eq!(written, 1);
    }

    #[test]
    fn test_clear_resets_graph() {
        let mut g = GraphStore::new();
        g.upsert_node(NodeLabel::File, "a.rs", HashMap::new());
        g.clear();
        assert_eq!(g.node_count(), 0);
        assert!(!g.contains_node(NodeLabel::File, "a.rs"));
    }
}
