//! DOT writer: colored multi-layer digraph for Graphviz

use super::GraphWriter;
use crate::graph::{Edge, EdgeType, Graph, Node};
use std::fmt::Write as _;
use std::io::{self, Write};

pub struct DotWriter {
    out: String,
}

impl DotWriter {
    pub fn new() -> DotWriter {
        DotWriter { out: String::new() }
    }

    pub fn into_output<W: Write>(self, mut out: W) -> io::Result<()> {
        out.write_all(self.out.as_bytes())
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    fn node_label(&mut self, node: &Node, rows: &[String]) {
        let mut label = String::from("<<TABLE>");
        for row in rows {
            let _ = write!(label, "<TR><TD>{}</TD></TR>", escape_html(row));
        }
        label.push_str("</TABLE>>");
        let _ = writeln!(self.out, "  {} [label={}];", node.id, label);
    }

    fn edge_line(&mut self, edge: &Edge) {
        let color = edge.edge_type().dot_color();
        match edge.label() {
            Some(label) if !label.is_empty() => {
                let _ = writeln!(
                    self.out,
                    "  {} -> {} [color={} fontcolor={} label=\"{}\"];",
                    edge.src,
                    edge.dst,
                    color,
                    color,
                    escape_dot(label)
                );
            }
            _ => {
                let _ = writeln!(self.out, "  {} -> {} [color={}];", edge.src, edge.dst, color);
            }
        }
    }
}

impl Default for DotWriter {
    fn default() -> Self {
        DotWriter::new()
    }
}

fn escape_dot(s: &str) -> String {
    s.replace('"', "\\\"")
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

impl GraphWriter for DotWriter {
    fn start_graph(&mut self, _graph: &Graph) -> io::Result<()> {
        self.out.push_str("digraph G {\n");
        self.out.push_str("  graph [rankdir=TD];\n");
        self.out.push_str("  node [shape=none];\n");
        Ok(())
    }

    fn visit_module(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        let mut rows = vec!["module".to_string()];
        if let Some(name) = node.name().filter(|n| !n.is_empty()) {
            rows.push(format!("name = {}", name));
        }
        self.node_label(node, &rows);
        Ok(())
    }

    fn visit_function(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        let rows = vec![
            "function".to_string(),
            format!("name = {}", node.name().unwrap_or_default()),
            format!(
                "nargs = {} | nlocals = {} | nresults = {}",
                node.nargs().unwrap_or(0),
                node.nlocals().unwrap_or(0),
                node.nresults().unwrap_or(0)
            ),
        ];
        self.node_label(node, &rows);
        Ok(())
    }

    fn visit_var(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        let rows = vec![format!(
            "{} {} @{}",
            node.var_type().map(|t| t.to_string()).unwrap_or_default(),
            node.name().unwrap_or_default(),
            node.index().unwrap_or(0)
        )];
        self.node_label(node, &rows);
        Ok(())
    }

    fn visit_marker(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        let rows = vec![node.node_type().as_str().to_string()];
        self.node_label(node, &rows);
        Ok(())
    }

    fn visit_instruction(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        let inst = node.inst_type().expect("instruction node");
        let mut rows = vec![inst.as_str().to_string()];
        if let Some(opcode) = node.opcode() {
            rows.push(opcode.to_string());
        }
        if let Some(value) = node.const_value() {
            rows.push(format!("{} {}", value.value_type(), value));
        }
        if let Some(label) = node.label() {
            rows.push(label.to_string());
        }
        if let Some(offset) = node.offset().filter(|o| *o > 0) {
            rows.push(format!("offset = {}", offset));
        }
        self.node_label(node, &rows);
        Ok(())
    }

    fn visit_ast_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.edge_line(edge);
        Ok(())
    }

    fn visit_cfg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.edge_line(edge);
        Ok(())
    }

    fn visit_pdg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.edge_line(edge);
        Ok(())
    }

    fn visit_cg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.edge_line(edge);
        Ok(())
    }

    fn visit_pg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.edge_line(edge);
        Ok(())
    }

    fn finish_graph(&mut self, _graph: &Graph) -> io::Result<()> {
        self.out.push_str("}\n");
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
    fn test_dot_structure_and_layer_colors() {
        let module = module_from_wat(
            r#"(module
                 (func $f (result i32)
                   i32.const 1
                   i32.const 2
                   i32.add))"#,
            true,
        )
        .unwrap();
        let mut graph = crate::graph::Graph::new();
        build_cpg(&mut graph, &module, None);

        let mut writer = DotWriter::new();
        write_graph(&mut writer, &graph, &EmitOptions::default()).unwrap();
        let dot = writer.as_str();

        assert!(dot.starts_with("digraph G {"));
        assert!(dot.trim_end().ends_with('}'));
        assert!(dot.contains("color=forestgreen")); // AST
        assert!(dot.contains("color=red")); // CFG
        assert!(dot.contains("color=blue")); // PDG
        assert!(dot.contains("function"));
    }
}
