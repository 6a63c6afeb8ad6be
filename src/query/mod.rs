//! Fluent stream algebra over the graph
//!
//! A [`Query`] is an explicit read-only handle; node and edge streams own
//! id vectors in stable id order, so every traversal is deterministic.
//! Predicates accumulate conjunctions, with `or()` starting a new clause.

pub mod reachability;

use crate::graph::{node_index, Edge, EdgeId, EdgeType, Graph, InstType, NodeId, NodeType, PdgType};
use petgraph::algo::has_path_connecting;
use petgraph::visit::{EdgeFiltered, EdgeRef};
use std::collections::BTreeSet;
use std::collections::VecDeque;

/// Edge filters composable with the streams.
pub fn all_edges(_: &Edge) -> bool {
    true
}

pub fn ast_edges(e: &Edge) -> bool {
    e.edge_type() == EdgeType::Ast
}

pub fn cfg_edges(e: &Edge) -> bool {
    e.edge_type() == EdgeType::Cfg
}

pub fn pdg_edges(e: &Edge) -> bool {
    e.edge_type() == EdgeType::Pdg
}

pub fn cg_edges(e: &Edge) -> bool {
    e.edge_type() == EdgeType::Cg
}

pub fn pg_edges(e: &Edge) -> bool {
    e.edge_type() == EdgeType::Pg
}

/// Read-only query handle over a finished graph.
#[derive(Clone, Copy)]
pub struct Query<'g> {
    graph: &'g Graph,
}

impl<'g> Query<'g> {
    pub fn new(graph: &'g Graph) -> Query<'g> {
        Query { graph }
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Stream containing the Module root, empty for an empty graph.
    pub fn module(&self) -> NodeStream<'g> {
        NodeStream::new(self.graph, self.graph.module_id().into_iter().collect())
    }

    /// All Function nodes, in id order.
    pub fn functions(&self) -> NodeStream<'g> {
        self.module().children(ast_edges).filter(|g, id| {
            g.node(id).node_type() == NodeType::Function
        })
    }

    /// Every Instruction reachable from the functions' bodies.
    pub fn instructions(&self, funcs: &NodeStream<'g>) -> NodeStream<'g> {
        let mut result = BTreeSet::new();
        for func in funcs.ids() {
            if let Some(holder) = self.instructions_holder(*func) {
                result.insert(holder);
                bfs_collect(
                    self.graph,
                    &[holder],
                    &mut result,
                    |_, _| true,
                    ast_edges,
                    usize::MAX,
                    false,
                );
            }
        }
        let ids = result
            .into_iter()
            .filter(|id| self.graph.node(*id).node_type() == NodeType::Instruction)
            .collect();
        NodeStream::new(self.graph, ids)
    }

    /// The Instructions holder of a function, absent for imports.
    pub fn instructions_holder(&self, func: NodeId) -> Option<NodeId> {
        self.graph
            .out_edges_of(func, EdgeType::Ast)
            .map(|e| e.dst)
            .find(|id| self.graph.node(*id).node_type() == NodeType::Instructions)
    }

    /// Parameter Var nodes of the functions, in declaration order.
    pub fn parameters(&self, funcs: &NodeStream<'g>) -> NodeStream<'g> {
        let mut ids = Vec::new();
        for func in funcs.ids() {
            let Some(signature) = self.graph.child(*func, 0, EdgeType::Ast) else {
                continue;
            };
            let Some(holder) = self
                .graph
                .out_edges_of(signature, EdgeType::Ast)
                .map(|e| e.dst)
                .find(|id| self.graph.node(*id).node_type() == NodeType::Parameters)
            else {
                continue;
            };
            ids.extend(self.graph.out_edges_of(holder, EdgeType::Ast).map(|e| e.dst));
        }
        NodeStream::new(self.graph, ids)
    }

    /// Innermost enclosing Function of a node, through AST parents.
    pub fn function_of(&self, node: NodeId) -> Option<NodeId> {
        let mut frontier = vec![node];
        let mut visited = BTreeSet::new();
        while let Some(current) = frontier.pop() {
            if !visited.insert(current) {
                continue;
            }
            if self.graph.node(current).node_type() == NodeType::Function {
                return Some(current);
            }
            frontier.extend(self.graph.in_edges_of(current, EdgeType::Ast).map(|e| e.src));
        }
        None
    }

    /// Reachability along edges accepted by the filter, answered by a
    /// path search over the filtered digraph.
    pub fn reaches<F>(&self, from: NodeId, to: NodeId, edge_filter: F) -> bool
    where
        F: Fn(&Edge) -> bool,
    {
        let filtered =
            EdgeFiltered::from_fn(self.graph.digraph(), |e| edge_filter(e.weight()));
        has_path_connecting(&filtered, node_index(from), node_index(to), None)
    }

    /// Depth-first traversal carrying a per-path accumulator. The visitor
    /// returns whether to descend further plus the state its successors
    /// inherit. Each node is visited at most once.
    pub fn dfs<T, F, V>(&self, start: NodeId, edge_filter: F, seed: T, mut visit: V)
    where
        T: Clone,
        F: Fn(&Edge) -> bool,
        V: FnMut(NodeId, T) -> (bool, T),
    {
        let mut visited = BTreeSet::new();
        let mut stack: Vec<(NodeId, T)> = Vec::new();

        // seed with the start node's successors; the start itself is not
        // visited
        let mut first: Vec<(NodeId, T)> = self
            .graph
            .out_edges(start)
            .filter(|e| edge_filter(e))
            .map(|e| (e.dst, seed.clone()))
            .collect();
        first.reverse();
        stack.extend(first);

        while let Some((node, state)) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            let (descend, next_state) = visit(node, state);
            if !descend {
                continue;
            }
            let mut successors: Vec<(NodeId, T)> = self
                .graph
                .out_edges(node)
                .filter(|e| edge_filter(e))
                .map(|e| (e.dst, next_state.clone()))
                .collect();
            successors.reverse();
            stack.extend(successors);
        }
    }
}

/// Breadth-first collection helper shared by the stream methods.
fn bfs_collect<N, E>(
    graph: &Graph,
    start: &[NodeId],
    result: &mut BTreeSet<NodeId>,
    node_pred: N,
    edge_filter: E,
    limit: usize,
    reverse: bool,
) where
    N: Fn(&Graph, NodeId) -> bool,
    E: Fn(&Edge) -> bool,
{
    let mut visited: BTreeSet<NodeId> = start.iter().copied().collect();
    let mut queue: VecDeque<NodeId> = start.iter().copied().collect();
    let mut collected = 0usize;

    while let Some(current) = queue.pop_front() {
        let edges: Vec<NodeId> = if reverse {
            graph
                .in_edges(current)
                .filter(|e| edge_filter(e))
                .map(|e| e.src)
                .collect()
        } else {
            graph
                .out_edges(current)
                .filter(|e| edge_filter(e))
                .map(|e| e.dst)
                .collect()
        };
        for next in edges {
            if !visited.insert(next) {
                continue;
            }
            if node_pred(graph, next) {
                if collected >= limit {
                    return;
                }
                result.insert(next);
                collected += 1;
            }
            queue.push_back(next);
        }
    }
}

/// An ordered, deduplicated set of node ids with the fluent algebra.
#[derive(Clone)]
pub struct NodeStream<'g> {
    graph: &'g Graph,
    ids: Vec<NodeId>,
}

impl<'g> NodeStream<'g> {
    pub fn new(graph: &'g Graph, mut ids: Vec<NodeId>) -> NodeStream<'g> {
        ids.sort_unstable();
        ids.dedup();
        NodeStream { graph, ids }
    }

    pub fn of(graph: &'g Graph, id: NodeId) -> NodeStream<'g> {
        NodeStream {
            graph,
            ids: vec![id],
        }
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids.iter().copied()
    }

    pub fn children<E>(&self, edge_filter: E) -> NodeStream<'g>
    where
        E: Fn(&Edge) -> bool,
    {
        let mut ids = Vec::new();
        for id in &self.ids {
            ids.extend(
                self.graph
                    .out_edges(*id)
                    .filter(|e| edge_filter(e))
                    .map(|e| e.dst),
            );
        }
        NodeStream::new(self.graph, ids)
    }

    pub fn parents<E>(&self, edge_filter: E) -> NodeStream<'g>
    where
        E: Fn(&Edge) -> bool,
    {
        let mut ids = Vec::new();
        for id in &self.ids {
            ids.extend(
                self.graph
                    .in_edges(*id)
                    .filter(|e| edge_filter(e))
                    .map(|e| e.src),
            );
        }
        NodeStream::new(self.graph, ids)
    }

    /// Positional child of every node in the stream.
    pub fn child(&self, index: usize, ty: EdgeType) -> NodeStream<'g> {
        let ids = self
            .ids
            .iter()
            .filter_map(|id| self.graph.child(*id, index, ty))
            .collect();
        NodeStream::new(self.graph, ids)
    }

    pub fn filter<F>(&self, pred: F) -> NodeStream<'g>
    where
        F: Fn(&Graph, NodeId) -> bool,
    {
        let ids = self
            .ids
            .iter()
            .copied()
            .filter(|id| pred(self.graph, *id))
            .collect();
        NodeStream::new(self.graph, ids)
    }

    pub fn filter_pred(&self, pred: &Predicate) -> NodeStream<'g> {
        self.filter(|g, id| pred.evaluate(g, id))
    }

    pub fn map<F>(&self, f: F) -> NodeStream<'g>
    where
        F: Fn(&Graph, NodeId) -> Option<NodeId>,
    {
        let ids = self
            .ids
            .iter()
            .filter_map(|id| f(self.graph, *id))
            .collect();
        NodeStream::new(self.graph, ids)
    }

    /// BFS from every node in the stream, collecting nodes accepted by
    /// the predicate, traversing edges accepted by the filter.
    pub fn bfs<N, E>(&self, node_pred: N, edge_filter: E, limit: usize, reverse: bool) -> NodeStream<'g>
    where
        N: Fn(&Graph, NodeId) -> bool,
        E: Fn(&Edge) -> bool,
    {
        let mut result = BTreeSet::new();
        bfs_collect(
            self.graph,
            &self.ids,
            &mut result,
            node_pred,
            edge_filter,
            limit,
            reverse,
        );
        NodeStream::new(self.graph, result.into_iter().collect())
    }

    /// BFS that also tests the start nodes themselves.
    pub fn bfs_includes<N, E>(
        &self,
        node_pred: N,
        edge_filter: E,
        limit: usize,
        reverse: bool,
    ) -> NodeStream<'g>
    where
        N: Fn(&Graph, NodeId) -> bool,
        E: Fn(&Edge) -> bool,
    {
        let mut result: BTreeSet<NodeId> = self
            .ids
            .iter()
            .copied()
            .filter(|id| node_pred(self.graph, *id))
            .collect();
        if result.len() >= limit {
            return NodeStream::new(self.graph, result.into_iter().take(limit).collect());
        }
        let remaining = limit - result.len();
        let mut rest = BTreeSet::new();
        bfs_collect(
            self.graph,
            &self.ids,
            &mut rest,
            node_pred,
            edge_filter,
            remaining,
            reverse,
        );
        result.extend(rest);
        NodeStream::new(self.graph, result.into_iter().collect())
    }

    pub fn find_first(&self) -> Option<NodeId> {
        self.ids.first().copied()
    }

    pub fn find_last(&self) -> Option<NodeId> {
        self.ids.last().copied()
    }

    pub fn contains<F>(&self, pred: F) -> bool
    where
        F: Fn(&Graph, NodeId) -> bool,
    {
        self.ids.iter().any(|id| pred(self.graph, *id))
    }

    pub fn to_set(&self) -> BTreeSet<NodeId> {
        self.ids.iter().copied().collect()
    }

    /// Outgoing edges of every node, in a stream.
    pub fn out_edges(&self) -> EdgeStream<'g> {
        let mut ids = Vec::new();
        for id in &self.ids {
            ids.extend(self.graph.out_edges(*id).map(|e| e.id));
        }
        EdgeStream::new(self.graph, ids)
    }

    pub fn in_edges(&self) -> EdgeStream<'g> {
        let mut ids = Vec::new();
        for id in &self.ids {
            ids.extend(self.graph.in_edges(*id).map(|e| e.id));
        }
        EdgeStream::new(self.graph, ids)
    }
}

/// An ordered, deduplicated set of edge ids.
#[derive(Clone)]
pub struct EdgeStream<'g> {
    graph: &'g Graph,
    ids: Vec<EdgeId>,
}

impl<'g> EdgeStream<'g> {
    pub fn new(graph: &'g Graph, mut ids: Vec<EdgeId>) -> EdgeStream<'g> {
        ids.sort_unstable();
        ids.dedup();
        EdgeStream { graph, ids }
    }

    pub fn from_edges<'a>(graph: &'g Graph, edges: impl Iterator<Item = &'a Edge>) -> EdgeStream<'g> {
        EdgeStream::new(graph, edges.map(|e| e.id).collect())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.ids.iter().map(|id| self.graph.edge(*id))
    }

    pub fn filter<F>(&self, pred: F) -> EdgeStream<'g>
    where
        F: Fn(&Edge) -> bool,
    {
        let ids = self
            .ids
            .iter()
            .copied()
            .filter(|id| pred(self.graph.edge(*id)))
            .collect();
        EdgeStream::new(self.graph, ids)
    }

    /// PDG edges of one category, optionally pinned to a label.
    pub fn filter_pdg(&self, ty: PdgType, label: Option<&str>) -> EdgeStream<'g> {
        self.filter(|e| {
            e.pdg_type() == Some(ty) && label.map_or(true, |l| e.label() == Some(l))
        })
    }

    pub fn set_union(&self, other: &EdgeStream<'g>) -> EdgeStream<'g> {
        let mut ids = self.ids.clone();
        ids.extend(other.ids.iter().copied());
        EdgeStream::new(self.graph, ids)
    }

    /// Keep the first edge of each distinct label.
    pub fn distinct_label(&self) -> EdgeStream<'g> {
        let mut seen = BTreeSet::new();
        let ids = self
            .ids
            .iter()
            .copied()
            .filter(|id| {
                let label = self.graph.edge(*id).label().map(str::to_string);
                seen.insert(label)
            })
            .collect();
        EdgeStream::new(self.graph, ids)
    }

    pub fn map<T, F>(&self, f: F) -> Vec<T>
    where
        F: Fn(&Edge) -> T,
    {
        self.ids.iter().map(|id| f(self.graph.edge(*id))).collect()
    }

    pub fn labels(&self) -> BTreeSet<String> {
        self.ids
            .iter()
            .filter_map(|id| self.graph.edge(*id).label().map(str::to_string))
            .collect()
    }

    pub fn find_first(&self) -> Option<&Edge> {
        self.ids.first().map(|id| self.graph.edge(*id))
    }

    pub fn contains<F>(&self, pred: F) -> bool
    where
        F: Fn(&Edge) -> bool,
    {
        self.ids.iter().any(|id| pred(self.graph.edge(*id)))
    }
}

type NodeTest = Box<dyn Fn(&Graph, NodeId) -> bool>;

/// Conjunction builder over node attributes; `or()` opens a new clause,
/// `test()` is the escape hatch for arbitrary closures.
#[derive(Default)]
pub struct Predicate {
    clauses: Vec<Vec<NodeTest>>,
}

impl Predicate {
    pub fn new() -> Predicate {
        Predicate {
            clauses: vec![Vec::new()],
        }
    }

    fn push(mut self, test: NodeTest) -> Predicate {
        if self.clauses.is_empty() {
            self.clauses.push(Vec::new());
        }
        self.clauses.last_mut().unwrap().push(test);
        self
    }

    /// Start a new disjunction clause.
    pub fn or(mut self) -> Predicate {
        self.clauses.push(Vec::new());
        self
    }

    pub fn node_type(self, ty: NodeType) -> Predicate {
        self.push(Box::new(move |g, id| g.node(id).node_type() == ty))
    }

    pub fn inst_type(self, ty: InstType) -> Predicate {
        self.push(Box::new(move |g, id| g.node(id).inst_type() == Some(ty)))
    }

    pub fn inst_type_not(self, ty: InstType) -> Predicate {
        self.push(Box::new(move |g, id| g.node(id).inst_type() != Some(ty)))
    }

    pub fn name(self, name: &str) -> Predicate {
        let name = name.to_string();
        self.push(Box::new(move |g, id| g.node(id).name() == Some(name.as_str())))
    }

    pub fn label(self, label: &str) -> Predicate {
        let label = label.to_string();
        self.push(Box::new(move |g, id| {
            g.node(id).label() == Some(label.as_str())
        }))
    }

    pub fn opcode(self, opcode: &str) -> Predicate {
        let opcode = opcode.to_string();
        self.push(Box::new(move |g, id| {
            g.node(id).opcode() == Some(opcode.as_str())
        }))
    }

    pub fn index(self, index: u32) -> Predicate {
        self.push(Box::new(move |g, id| g.node(id).index() == Some(index)))
    }

    pub fn has_in_edge(self, ty: EdgeType) -> Predicate {
        self.push(Box::new(move |g, id| {
            g.in_edges_of(id, ty).next().is_some()
        }))
    }

    pub fn no_in_edge(self, ty: EdgeType) -> Predicate {
        self.push(Box::new(move |g, id| g.in_edges_of(id, ty).next().is_none()))
    }

    pub fn has_out_edge(self, ty: EdgeType) -> Predicate {
        self.push(Box::new(move |g, id| {
            g.out_edges_of(id, ty).next().is_some()
        }))
    }

    pub fn in_pdg_edge(self, label: &str, ty: PdgType) -> Predicate {
        let label = label.to_string();
        self.push(Box::new(move |g, id| {
            g.in_edges_of(id, EdgeType::Pdg)
                .any(|e| e.pdg_type() == Some(ty) && e.label() == Some(label.as_str()))
        }))
    }

    pub fn out_pdg_edge(self, ty: PdgType) -> Predicate {
        self.push(Box::new(move |g, id| {
            g.out_edges_of(id, EdgeType::Pdg).any(|e| e.pdg_type() == Some(ty))
        }))
    }

    pub fn test<F>(self, f: F) -> Predicate
    where
        F: Fn(&Graph, NodeId) -> bool + 'static,
    {
        self.push(Box::new(f))
    }

    /// Negate a whole predicate.
    pub fn negate(self) -> Predicate {
        let inner = self;
        let mut outer = Predicate::new();
        outer = outer.push(Box::new(move |g, id| !inner.evaluate(g, id)));
        outer
    }

    pub fn evaluate(&self, graph: &Graph, id: NodeId) -> bool {
        self.clauses
            .iter()
            .any(|clause| clause.iter().all(|t| t(graph, id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::build_cpg;
    use crate::frontend::module_from_wat;

    fn build(wat: &str) -> Graph {
        let module = module_from_wat(wat, true).unwrap();
        let mut graph = Graph::new();
        build_cpg(&mut graph, &module, None);
        graph
    }

    const TWO_FUNCS: &str = r#"(module
        (func $a (param $x i32)
          local.get $x
          drop)
        (func $b
          i32.const 7
          call $a))"#;

    #[test]
    fn test_functions_and_instructions() {
        let graph = build(TWO_FUNCS);
        let q = Query::new(&graph);
        let funcs = q.functions();
        assert_eq!(funcs.len(), 2);
        let insts = q.instructions(&funcs);
        assert!(insts.contains(|g, id| g.node(id).is_inst(InstType::Call)));
        assert!(insts.contains(|g, id| g.node(id).is_inst(InstType::LocalGet)));
    }

    #[test]
    fn test_parameters_and_function_of() {
        let graph = build(TWO_FUNCS);
        let q = Query::new(&graph);
        let func_a = q.functions().filter_pred(&Predicate::new().name("$a"));
        let params = q.parameters(&func_a);
        assert_eq!(params.len(), 1);
        let param = params.find_first().unwrap();
        assert_eq!(graph.node(param).name(), Some("$x"));
        assert_eq!(q.function_of(param), func_a.find_first());
    }

    #[test]
    fn test_predicate_or_clauses() {
        let graph = build(TWO_FUNCS);
        let q = Query::new(&graph);
        let insts = q.instructions(&q.functions());
        let gets_or_consts = insts.filter_pred(
            &Predicate::new()
                .inst_type(InstType::LocalGet)
                .or()
                .inst_type(InstType::Const),
        );
        assert_eq!(gets_or_consts.len(), 2);
    }

    #[test]
    fn test_bfs_limit_and_reverse() {
        let graph = build(TWO_FUNCS);
        let q = Query::new(&graph);
        let call = q
            .instructions(&q.functions())
            .filter_pred(&Predicate::new().inst_type(InstType::Call));
        // the const argument is an AST child of the call
        let children = call.bfs(
            |g, id| g.node(id).is_inst(InstType::Const),
            ast_edges,
            usize::MAX,
            false,
        );
        assert_eq!(children.len(), 1);
        // and the call is findable backwards from the argument
        let back = children.bfs(
            |g, id| g.node(id).is_inst(InstType::Call),
            ast_edges,
            usize::MAX,
            true,
        );
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn test_reaches_along_cfg() {
        let graph = build(TWO_FUNCS);
        let q = Query::new(&graph);
        let konst = q
            .instructions(&q.functions())
            .filter_pred(&Predicate::new().inst_type(InstType::Const))
            .find_first()
            .unwrap();
        let call = q
            .instructions(&q.functions())
            .filter_pred(&Predicate::new().inst_type(InstType::Call))
            .find_first()
            .unwrap();
        assert!(q.reaches(konst, call, cfg_edges));
        assert!(!q.reaches(call, konst, cfg_edges));
    }

    #[test]
    fn test_edge_stream_pdg_filters() {
        let graph = build(TWO_FUNCS);
        let q = Query::new(&graph);
        let drop = q
            .instructions(&q.functions())
            .filter_pred(&Predicate::new().inst_type(InstType::Drop));
        let deps = drop.in_edges().filter_pdg(PdgType::Local, Some("$x"));
        assert_eq!(deps.len(), 1);
        assert_eq!(deps.find_first().unwrap().label(), Some("$x"));
    }
}
