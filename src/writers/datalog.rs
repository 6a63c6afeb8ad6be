//! Datalog writer: Soufflé declarations, layer views and one fact per
//! node and edge

use super::GraphWriter;
use crate::graph::{Edge, Graph, Node, NodeType};
use crate::ir::ConstValue;
use std::fmt::Write as _;
use std::io::{self, Write};

const PREAMBLE: &str = r#"#ifndef WASMATI_DATALOG
#define WASMATI_DATALOG

#define false 0
#define true 1
.type bool <: unsigned

.type Const = [
	type:symbol,
	i:number,
	f:float
]

// Declarations
// -- Edges
.decl edge(x:unsigned, y:unsigned, type:symbol, label:symbol, pdgType:symbol, value:Const)
.decl astEdge(x:unsigned, y:unsigned)
.decl cfgEdge(x:unsigned, y:unsigned, label:symbol)
.decl pdgEdge(x:unsigned, y:unsigned, label:symbol, type:symbol, value:Const)
.decl cgEdge(x:unsigned, y:unsigned)
.decl pgEdge(x:unsigned, y:unsigned)
// -- Nodes
.decl node(x:unsigned, type:symbol, name:symbol, index:unsigned, nargs:unsigned, nlocals:unsigned, \
			nresults:unsigned, isImport:bool, isExport:bool, varType:symbol, instType:symbol, \
			opcode:symbol, value:Const, label:symbol, offset:unsigned, hasElse:bool)
.decl module(x:unsigned, name:symbol)
.decl function(x:unsigned, name:symbol, index:unsigned, nargs:unsigned, nlocals:unsigned, nresults:unsigned, \
				isImport:bool, isExport:bool)
.decl varNode(x:unsigned, type:symbol, index:unsigned, name:symbol)
.decl instruction(x:unsigned, type:symbol)

// Rules
// -- Edges
astEdge(x, y) :- edge(x, y, "AST", _, _, _).
cfgEdge(x, y, label) :- edge(x, y, "CFG", label, _, _).
pdgEdge(x, y, label, type, value) :- edge(x, y, "PDG", label, type, value).
cgEdge(x, y) :- edge(x, y, "CG", _, _, _).
pgEdge(x, y) :- edge(x, y, "PG", _, _, _).

// -- Nodes
module(x, name) :- node(x, "Module", name, _, _, _, _, _, _, _, _, _, _, _, _, _).
function(x, name, index, nargs, nlocals, nresults, isImport, isExport) :- node(x, "Function", name, index, nargs, nlocals, nresults, isImport, isExport, _, _, _, _, _, _, _).
varNode(x, type, index, name) :- node(x, "VarNode", name, index, _, _, _, _, _, type, _, _, _, _, _, _).
instruction(x, instType) :- node(x, "Instruction", _, _, _, _, _, _, _, _, instType, _, _, _, _, _).

// Facts
"#;

pub struct DatalogWriter {
    out: String,
}

impl DatalogWriter {
    pub fn new() -> DatalogWriter {
        DatalogWriter { out: String::new() }
    }

    pub fn into_output<W: Write>(self, mut out: W) -> io::Result<()> {
        out.write_all(self.out.as_bytes())
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    fn fact_node(&mut self, node: &Node) {
        let is_function = node.node_type() == NodeType::Function;
        let _ = writeln!(
            self.out,
            "node({}, \"{}\", \"{}\", {}, {}, {}, {}, {}, {}, \"{}\", \"{}\", \"{}\", {}, \"{}\", {}, {}).",
            node.id,
            node.node_type().as_str(),
            node.name().unwrap_or_default(),
            node.index().unwrap_or(0),
            node.nargs().unwrap_or(0),
            node.nlocals().unwrap_or(0),
            node.nresults().unwrap_or(0),
            (is_function && node.is_import()) as u32,
            (is_function && node.is_export()) as u32,
            node.var_type().map(|t| t.to_string()).unwrap_or_default(),
            node.inst_type().map(|t| t.as_str()).unwrap_or_default(),
            node.opcode().unwrap_or_default(),
            const_record(node.const_value()),
            node.label().unwrap_or_default(),
            node.offset().unwrap_or(0),
            node.has_else().unwrap_or(false) as u32,
        );
    }

    fn fact_edge(&mut self, edge: &Edge) {
        let _ = writeln!(
            self.out,
            "edge({}, {}, \"{}\", \"{}\", \"{}\", {}).",
            edge.src,
            edge.dst,
            edge.edge_type().as_str(),
            edge.label().unwrap_or_default(),
            edge.pdg_type().map(|t| t.as_str()).unwrap_or_default(),
            const_record(edge.const_value()),
        );
    }
}

impl Default for DatalogWriter {
    fn default() -> Self {
        DatalogWriter::new()
    }
}

/// Render a constant as a Soufflé record, nil when absent.
fn const_record(value: Option<ConstValue>) -> String {
    match value {
        None => "nil".to_string(),
        Some(ConstValue::I32(v)) => format!("[\"i32\", {}, 0]", v as i32),
        Some(ConstValue::I64(v)) => format!("[\"i64\", {}, 0]", v as i64),
        Some(ConstValue::F32(bits)) => format!("[\"f32\", 0, {}]", f32::from_bits(bits)),
        Some(ConstValue::F64(bits)) => format!("[\"f64\", 0, {}]", f64::from_bits(bits)),
    }
}

impl GraphWriter for DatalogWriter {
    fn start_graph(&mut self, _graph: &Graph) -> io::Result<()> {
        self.out.push_str(PREAMBLE);
        Ok(())
    }

    fn visit_module(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.fact_node(node);
        Ok(())
    }

    fn visit_function(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.fact_node(node);
        Ok(())
    }

    fn visit_var(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.fact_node(node);
        Ok(())
    }

    fn visit_marker(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.fact_node(node);
        Ok(())
    }

    fn visit_instruction(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.fact_node(node);
        Ok(())
    }

    fn visit_ast_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.fact_edge(edge);
        Ok(())
    }

    fn visit_cfg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.fact_edge(edge);
        Ok(())
    }

    fn visit_pdg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.fact_edge(edge);
        Ok(())
    }

    fn visit_cg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.fact_edge(edge);
        Ok(())
    }

    fn visit_pg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.fact_edge(edge);
        Ok(())
    }

    fn finish_graph(&mut self, _graph: &Graph) -> io::Result<()> {
        self.out.push_str("\n#endif\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::build_cpg;
    use crate::frontend::module_from_wat;
    use crate::writers::{write_graph, EmitOptions};

    #[test]
    fn test_preamble_and_facts() {
        let module = module_from_wat(r#"(module (func $f nop))"#, true).unwrap();
        let mut graph = crate::graph::Graph::new();
        build_cpg(&mut graph, &module, None);

        let mut writer = DatalogWriter::new();
        write_graph(&mut writer, &graph, &EmitOptions::default()).unwrap();
        let text = writer.as_str();

        assert!(text.contains(".decl node("));
        assert!(text.contains("astEdge(x, y) :- edge(x, y, \"AST\", _, _, _)."));
        assert!(text.contains("node(0, \"Module\""));
        assert!(text.contains("\"Function\", \"$f\""));
        assert!(text.contains("edge(0, 1, \"AST\""));
    }
}
