//! Graph store shared by every layer of the Code Property Graph
//!
//! Nodes and edges live in a petgraph digraph whose indices double as the
//! stable public ids: nothing is ever removed, so insertion order, index
//! order and id order coincide. Node weights carry the tagged node sum,
//! edge weights the tagged edge sum; per-node layer views filter the
//! adjacency lists. The store owns everything: dropping it drops every
//! node and edge exactly once.

pub mod edge;
pub mod node;

pub use edge::{Edge, EdgeId, EdgeKind, EdgeType, PdgType};
pub use node::{InstKind, InstType, Node, NodeId, NodeKind, NodeType};

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashSet;
use std::mem::size_of;

/// The underlying digraph: tagged nodes, tagged multi-layer edges.
pub type Cpg = DiGraph<Node, Edge>;

/// Stable id to petgraph index. The store never removes anything, so
/// the mapping is total and order-preserving.
pub fn node_index(id: NodeId) -> NodeIndex {
    NodeIndex::new(id.0 as usize)
}

#[derive(Debug, Default)]
pub struct Graph {
    inner: Cpg,
    module: Option<NodeId>,
    trap: Option<NodeId>,
    start: Option<NodeId>,
    /// Emission of PDG edges is idempotent on (src, dst, category, label).
    pdg_seen: HashSet<(NodeId, NodeId, PdgType, String)>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    /// The digraph itself, for petgraph algorithms and adapters.
    pub fn digraph(&self) -> &Cpg {
        &self.inner
    }

    /// Allocate the next id and record the node.
    ///
    /// The single Module node is tracked here; inserting a second one is a
    /// builder bug.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.inner.node_count() as u32);
        if matches!(kind, NodeKind::Module { .. }) {
            assert!(self.module.is_none(), "second Module node inserted");
            self.module = Some(id);
        }
        let index = self.inner.add_node(Node { id, kind });
        debug_assert_eq!(index.index(), id.0 as usize);
        id
    }

    /// Record an edge. PDG edges are deduplicated by
    /// `(src, dst, category, label)`; a suppressed duplicate returns `None`.
    pub fn add_edge(&mut self, src: NodeId, dst: NodeId, kind: EdgeKind) -> Option<EdgeId> {
        debug_assert!((src.0 as usize) < self.inner.node_count());
        debug_assert!((dst.0 as usize) < self.inner.node_count());
        if let EdgeKind::Pdg {
            pdg_type, label, ..
        } = &kind
        {
            let key = (src, dst, *pdg_type, label.clone());
            if !self.pdg_seen.insert(key) {
                return None;
            }
        }
        let id = EdgeId(self.inner.edge_count() as u32);
        let index = self
            .inner
            .add_edge(node_index(src), node_index(dst), Edge { id, src, dst, kind });
        debug_assert_eq!(index.index(), id.0 as usize);
        Some(id)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.inner[node_index(id)]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.inner[EdgeIndex::new(id.0 as usize)]
    }

    /// All nodes in insertion (= id) order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.inner.node_weights()
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.inner.edge_weights()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.inner.node_count() as u32).map(NodeId)
    }

    /// Outgoing edges in insertion order. The adjacency list yields
    /// most-recent-first, so the collected view is reversed.
    pub fn out_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        let mut edges: Vec<&Edge> = self
            .inner
            .edges_directed(node_index(id), Direction::Outgoing)
            .map(|e| e.weight())
            .collect();
        edges.reverse();
        edges.into_iter()
    }

    /// Incoming edges in insertion order.
    pub fn in_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        let mut edges: Vec<&Edge> = self
            .inner
            .edges_directed(node_index(id), Direction::Incoming)
            .map(|e| e.weight())
            .collect();
        edges.reverse();
        edges.into_iter()
    }

    pub fn out_edges_of(&self, id: NodeId, ty: EdgeType) -> impl Iterator<Item = &Edge> {
        self.out_edges(id).filter(move |e| e.edge_type() == ty)
    }

    pub fn in_edges_of(&self, id: NodeId, ty: EdgeType) -> impl Iterator<Item = &Edge> {
        self.in_edges(id).filter(move |e| e.edge_type() == ty)
    }

    pub fn has_edges_of(&self, id: NodeId, ty: EdgeType) -> bool {
        self.out_edges_of(id, ty).next().is_some() || self.in_edges_of(id, ty).next().is_some()
    }

    /// The `n`-th child along edges of the given layer, in insertion order.
    pub fn child(&self, id: NodeId, n: usize, ty: EdgeType) -> Option<NodeId> {
        self.out_edges_of(id, ty).nth(n).map(|e| e.dst)
    }

    pub fn parent(&self, id: NodeId, n: usize, ty: EdgeType) -> Option<NodeId> {
        self.in_edges_of(id, ty).nth(n).map(|e| e.src)
    }

    /// The unique Module root. Panics if no module was built yet.
    pub fn module(&self) -> NodeId {
        self.module.expect("graph has no Module node")
    }

    pub fn module_id(&self) -> Option<NodeId> {
        self.module
    }

    /// The unique Trap node, created lazily on first demand.
    pub fn trap(&mut self) -> NodeId {
        match self.trap {
            Some(id) => id,
            None => {
                let id = self.add_node(NodeKind::Trap);
                self.trap = Some(id);
                id
            }
        }
    }

    /// The unique Start node, created lazily on first demand.
    pub fn start(&mut self) -> NodeId {
        match self.start {
            Some(id) => id,
            None => {
                let id = self.add_node(NodeKind::Start);
                self.start = Some(id);
                id
            }
        }
    }

    pub fn trap_id(&self) -> Option<NodeId> {
        self.trap
    }

    pub fn start_id(&self) -> Option<NodeId> {
        self.start
    }

    /// Used by the deserializer, which re-inserts singleton nodes by id.
    pub fn note_singleton(&mut self, id: NodeId) {
        match self.node(id).node_type() {
            NodeType::Trap => self.trap = Some(id),
            NodeType::Start => self.start = Some(id),
            _ => {}
        }
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Rough resident size for `-i` diagnostics: weights plus petgraph's
    /// two adjacency heads per node and four links per edge.
    pub fn memory_estimate(&self) -> usize {
        let mut total = size_of::<Graph>();
        total += self.inner.node_count() * (size_of::<Node>() + 2 * size_of::<u32>());
        total += self.inner.edge_count() * (size_of::<Edge>() + 4 * size_of::<u32>());
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_contiguous_from_zero() {
        let mut g = Graph::new();
        let a = g.add_node(NodeKind::Module { name: String::new() });
        let b = g.add_node(NodeKind::FunctionSignature);
        let c = g.add_node(NodeKind::Parameters);
        assert_eq!((a, b, c), (NodeId(0), NodeId(1), NodeId(2)));
        assert_eq!(g.node_count(), 3);
    }

    #[test]
    fn test_module_is_tracked() {
        let mut g = Graph::new();
        let m = g.add_node(NodeKind::Module { name: "$m".to_string() });
        assert_eq!(g.module(), m);
    }

    #[test]
    #[should_panic]
    fn test_second_module_panics() {
        let mut g = Graph::new();
        g.add_node(NodeKind::Module { name: String::new() });
        g.add_node(NodeKind::Module { name: String::new() });
    }

    #[test]
    fn test_trap_and_start_are_lazy_singletons() {
        let mut g = Graph::new();
        assert_eq!(g.trap_id(), None);
        let t1 = g.trap();
        let t2 = g.trap();
        assert_eq!(t1, t2);
        let s1 = g.start();
        assert_ne!(s1, t1);
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn test_edge_views_filter_by_layer() {
        let mut g = Graph::new();
        let a = g.add_node(NodeKind::Instructions);
        let b = g.add_node(NodeKind::Inst(InstKind::Nop));
        g.add_edge(a, b, EdgeKind::Ast);
        g.add_edge(a, b, EdgeKind::Cfg { label: None });

        assert_eq!(g.out_edges(a).count(), 2);
        assert_eq!(g.out_edges_of(a, EdgeType::Ast).count(), 1);
        assert_eq!(g.in_edges_of(b, EdgeType::Cfg).count(), 1);
        assert_eq!(g.child(a, 0, EdgeType::Ast), Some(b));
        assert!(g.has_edges_of(b, EdgeType::Cfg));
    }

    #[test]
    fn test_edge_views_honor_insertion_order() {
        let mut g = Graph::new();
        let call = g.add_node(NodeKind::Inst(InstKind::Nop));
        let args: Vec<NodeId> = (0..3)
            .map(|_| g.add_node(NodeKind::Inst(InstKind::Nop)))
            .collect();
        for arg in &args {
            g.add_edge(call, *arg, EdgeKind::Ast);
        }
        let seen: Vec<NodeId> = g.out_edges(call).map(|e| e.dst).collect();
        assert_eq!(seen, args);
        assert_eq!(g.child(call, 1, EdgeType::Ast), Some(args[1]));
    }

    #[test]
    fn test_pdg_edges_are_deduplicated() {
        let mut g = Graph::new();
        let a = g.add_node(NodeKind::Inst(InstKind::Nop));
        let b = g.add_node(NodeKind::Inst(InstKind::Nop));
        let first = g.add_edge(a, b, EdgeKind::pdg(PdgType::Local, "$x"));
        let dup = g.add_edge(a, b, EdgeKind::pdg(PdgType::Local, "$x"));
        let other = g.add_edge(a, b, EdgeKind::pdg(PdgType::Global, "$x"));
        assert!(first.is_some());
        assert!(dup.is_none());
        assert!(other.is_some());
        assert_eq!(g.edge_count(), 2);
    }
}
