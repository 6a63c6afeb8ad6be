//! Layer-filtered reachability over the shared digraph
//!
//! The memory checkers ask many can-this-reach-that questions along one
//! edge layer; this wraps petgraph's path search over a filtered view of
//! the store with reusable DFS state, instead of re-walking the edge
//! lists on every query.

use crate::graph::{node_index, Cpg, EdgeType, Graph, NodeId};
use petgraph::algo::{has_path_connecting, DfsSpace};
use petgraph::graph::NodeIndex;
use petgraph::visit::{EdgeFiltered, EdgeRef, Visitable};

/// Reusable reachability queries restricted to one layer.
///
/// Create once per analysis pass, reuse for many queries on the same
/// graph.
pub struct LayerReachability<'g> {
    graph: &'g Graph,
    layer: EdgeType,
    space: DfsSpace<NodeIndex, <Cpg as Visitable>::Map>,
}

impl<'g> LayerReachability<'g> {
    pub fn new(graph: &'g Graph, layer: EdgeType) -> LayerReachability<'g> {
        LayerReachability {
            graph,
            layer,
            space: DfsSpace::new(graph.digraph()),
        }
    }

    /// Is there a path from `from` to `to` along edges of this layer?
    pub fn can_reach(&mut self, from: NodeId, to: NodeId) -> bool {
        let layer = self.layer;
        let filtered =
            EdgeFiltered::from_fn(self.graph.digraph(), move |e| e.weight().edge_type() == layer);
        has_path_connecting(
            &filtered,
            node_index(from),
            node_index(to),
            Some(&mut self.space),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeKind, InstKind, NodeKind};

    fn chain() -> (Graph, Vec<NodeId>) {
        let mut g = Graph::new();
        let nodes: Vec<NodeId> = (0..4)
            .map(|_| g.add_node(NodeKind::Inst(InstKind::Nop)))
            .collect();
        for pair in nodes.windows(2) {
            g.add_edge(pair[0], pair[1], EdgeKind::Cfg { label: None });
        }
        // an AST edge must not leak into the CFG view
        g.add_edge(nodes[3], nodes[0], EdgeKind::Ast);
        (g, nodes)
    }

    #[test]
    fn test_layer_filter_is_respected() {
        let (g, nodes) = chain();
        let mut cfg = LayerReachability::new(&g, EdgeType::Cfg);
        assert!(cfg.can_reach(nodes[0], nodes[3]));
        assert!(!cfg.can_reach(nodes[3], nodes[0]));

        // the AST back edge is visible only to the AST view
        let mut ast = LayerReachability::new(&g, EdgeType::Ast);
        assert!(ast.can_reach(nodes[3], nodes[0]));
        assert!(!ast.can_reach(nodes[0], nodes[3]));
    }

    #[test]
    fn test_cached_state_is_reusable() {
        let (g, nodes) = chain();
        let mut cfg = LayerReachability::new(&g, EdgeType::Cfg);
        assert!(cfg.can_reach(nodes[1], nodes[3]));
        assert!(!cfg.can_reach(nodes[2], nodes[0]));
        assert!(cfg.can_reach(nodes[0], nodes[0]));
    }
}
