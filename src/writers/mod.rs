//! Graph serializers
//!
//! One trait with a visit method per node and edge kind; writers are
//! plain structs. The driver walks nodes in id order, then edges in
//! insertion order, honoring the layer toggles and the optional loop
//! restriction.

pub mod csv;
pub mod datalog;
pub mod dot;
pub mod json;

pub use self::csv::CsvWriter;
pub use self::datalog::DatalogWriter;
pub use self::dot::DotWriter;
pub use self::json::JsonWriter;

use crate::graph::{Edge, EdgeType, Graph, InstType, Node, NodeId, NodeType};
use crate::query::{ast_edges, Predicate, Query};
use std::collections::BTreeSet;
use std::io;

/// Which layers a dump includes.
#[derive(Debug, Clone, Copy)]
pub struct LayerSet {
    pub ast: bool,
    pub cfg: bool,
    pub pdg: bool,
    pub cg: bool,
    pub pg: bool,
}

impl LayerSet {
    pub fn all() -> LayerSet {
        LayerSet {
            ast: true,
            cfg: true,
            pdg: true,
            cg: true,
            pg: true,
        }
    }

    pub fn none() -> LayerSet {
        LayerSet {
            ast: false,
            cfg: false,
            pdg: false,
            cg: false,
            pg: false,
        }
    }

    pub fn is_all(&self) -> bool {
        self.ast && self.cfg && self.pdg && self.cg && self.pg
    }

    pub fn contains(&self, ty: EdgeType) -> bool {
        match ty {
            EdgeType::Ast => self.ast,
            EdgeType::Cfg => self.cfg,
            EdgeType::Pdg => self.pdg,
            EdgeType::Cg => self.cg,
            EdgeType::Pg => self.pg,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub layers: LayerSet,
    /// Restrict emission to the instructions of one named loop.
    pub loop_filter: Option<String>,
}

impl Default for EmitOptions {
    fn default() -> Self {
        EmitOptions {
            layers: LayerSet::all(),
            loop_filter: None,
        }
    }
}

/// One method per visit kind; the driver does the walking.
pub trait GraphWriter {
    fn start_graph(&mut self, _graph: &Graph) -> io::Result<()> {
        Ok(())
    }
    fn visit_module(&mut self, graph: &Graph, node: &Node) -> io::Result<()>;
    fn visit_function(&mut self, graph: &Graph, node: &Node) -> io::Result<()>;
    fn visit_var(&mut self, graph: &Graph, node: &Node) -> io::Result<()>;
    /// Structural markers: FunctionSignature, Parameters, Locals,
    /// Results, Instructions, Else, Trap, Start.
    fn visit_marker(&mut self, graph: &Graph, node: &Node) -> io::Result<()>;
    fn visit_instruction(&mut self, graph: &Graph, node: &Node) -> io::Result<()>;
    fn visit_ast_edge(&mut self, graph: &Graph, edge: &Edge) -> io::Result<()>;
    fn visit_cfg_edge(&mut self, graph: &Graph, edge: &Edge) -> io::Result<()>;
    fn visit_pdg_edge(&mut self, graph: &Graph, edge: &Edge) -> io::Result<()>;
    fn visit_cg_edge(&mut self, graph: &Graph, edge: &Edge) -> io::Result<()>;
    fn visit_pg_edge(&mut self, graph: &Graph, edge: &Edge) -> io::Result<()>;
    fn finish_graph(&mut self, _graph: &Graph) -> io::Result<()> {
        Ok(())
    }
}

/// Nodes belonging to the named loop, for the `-l` restriction.
pub fn loop_instructions(graph: &Graph, loop_name: &str) -> BTreeSet<NodeId> {
    let query = Query::new(graph);
    let loops = query
        .instructions(&query.functions())
        .filter_pred(&Predicate::new().inst_type(InstType::Loop).label(loop_name));
    let mut result = loops.to_set();
    result.extend(
        loops
            .bfs(|_, _| true, ast_edges, usize::MAX, false)
            .iter(),
    );
    result
}

fn node_included(graph: &Graph, node: &Node, opts: &EmitOptions) -> bool {
    if opts.layers.is_all() {
        return true;
    }
    [
        EdgeType::Ast,
        EdgeType::Cfg,
        EdgeType::Pdg,
        EdgeType::Cg,
        EdgeType::Pg,
    ]
    .iter()
    .any(|ty| opts.layers.contains(*ty) && graph.has_edges_of(node.id, *ty))
}

/// Walk the graph through a writer.
pub fn write_graph(
    writer: &mut dyn GraphWriter,
    graph: &Graph,
    opts: &EmitOptions,
) -> io::Result<()> {
    let loop_nodes = opts
        .loop_filter
        .as_deref()
        .map(|name| loop_instructions(graph, name));

    writer.start_graph(graph)?;

    for node in graph.nodes() {
        if let Some(keep) = &loop_nodes {
            if !keep.contains(&node.id) {
                continue;
            }
        }
        if !node_included(graph, node, opts) {
            continue;
        }
        match node.node_type() {
            NodeType::Module => writer.visit_module(graph, node)?,
            NodeType::Function => writer.visit_function(graph, node)?,
            NodeType::VarNode => writer.visit_var(graph, node)?,
            NodeType::Instruction => writer.visit_instruction(graph, node)?,
            _ => writer.visit_marker(graph, node)?,
        }
    }

    for edge in graph.edges() {
        if !opts.layers.contains(edge.edge_type()) {
            continue;
        }
        if let Some(keep) = &loop_nodes {
            if !keep.contains(&edge.src) || !keep.contains(&edge.dst) {
                continue;
            }
        }
        match edge.edge_type() {
            EdgeType::Ast => writer.visit_ast_edge(graph, edge)?,
            EdgeType::Cfg => writer.visit_cfg_edge(graph, edge)?,
            EdgeType::Pdg => writer.visit_pdg_edge(graph, edge)?,
            EdgeType::Cg => writer.visit_cg_edge(graph, edge)?,
            EdgeType::Pg => writer.visit_pg_edge(graph, edge)?,
        }
    }

    writer.finish_graph(graph)
}

/// The fixed node table layout shared by the tabular formats.
pub(crate) const NODE_COLUMNS: [&str; 17] = [
    "id", "nodeType", "name", "index", "nargs", "nlocals", "nresults", "isImport", "isExport",
    "varType", "instType", "opcode", "constType", "constValue", "label", "offset", "hasElse",
];

/// The fixed edge table layout.
pub(crate) const EDGE_COLUMNS: [&str; 7] =
    ["src", "dest", "edgeType", "label", "pdgType", "constType", "constValue"];

fn flag(b: bool) -> String {
    if b { "1" } else { "0" }.to_string()
}

/// Render one node into the fixed column layout; absent attributes are
/// empty strings.
pub(crate) fn node_columns(node: &Node) -> [String; 17] {
    let mut cols: [String; 17] = Default::default();
    cols[0] = node.id.to_string();
    cols[1] = node.node_type().as_str().to_string();
    if let Some(name) = node.name() {
        cols[2] = name.to_string();
    }
    if let Some(index) = node.index() {
        cols[3] = index.to_string();
    }
    if node.node_type() == NodeType::Function {
        cols[4] = node.nargs().unwrap_or(0).to_string();
        cols[5] = node.nlocals().unwrap_or(0).to_string();
        cols[6] = node.nresults().unwrap_or(0).to_string();
        cols[7] = flag(node.is_import());
        cols[8] = flag(node.is_export());
    }
    if let Some(ty) = node.var_type() {
        cols[9] = ty.to_string();
    }
    if let Some(inst) = node.inst_type() {
        cols[10] = inst.as_str().to_string();
        if let Some(nargs) = node.nargs() {
            cols[4] = nargs.to_string();
        }
        if let Some(nresults) = node.nresults() {
            cols[6] = nresults.to_string();
        }
    }
    if let Some(opcode) = node.opcode() {
        cols[11] = opcode.to_string();
    }
    if let Some(value) = node.const_value() {
        cols[12] = value.value_type().to_string();
        cols[13] = value.to_string();
    }
    if let Some(label) = node.label() {
        cols[14] = label.to_string();
    }
    if let Some(offset) = node.offset() {
        cols[15] = offset.to_string();
    }
    if let Some(has_else) = node.has_else() {
        cols[16] = flag(has_else);
    }
    cols
}

pub(crate) fn edge_columns(edge: &Edge) -> [String; 7] {
    let mut cols: [String; 7] = Default::default();
    cols[0] = edge.src.to_string();
    cols[1] = edge.dst.to_string();
    cols[2] = edge.edge_type().as_str().to_string();
    if let Some(label) = edge.label() {
        cols[3] = label.to_string();
    }
    if let Some(pdg) = edge.pdg_type() {
        cols[4] = pdg.as_str().to_string();
    }
    if let Some(value) = edge.const_value() {
        cols[5] = value.value_type().to_string();
        cols[6] = value.to_string();
    }
    cols
}
