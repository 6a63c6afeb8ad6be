//! JSON writer: one object with nodes and edges arrays

use super::GraphWriter;
use crate::graph::{Edge, Graph, Node};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Serialize)]
struct NodeExport {
    id: u32,
    #[serde(rename = "nodeType")]
    node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nargs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nlocals: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nresults: Option<u32>,
    #[serde(rename = "isImport", skip_serializing_if = "Option::is_none")]
    is_import: Option<bool>,
    #[serde(rename = "isExport", skip_serializing_if = "Option::is_none")]
    is_export: Option<bool>,
    #[serde(rename = "varType", skip_serializing_if = "Option::is_none")]
    var_type: Option<String>,
    #[serde(rename = "instType", skip_serializing_if = "Option::is_none")]
    inst_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    opcode: Option<String>,
    #[serde(rename = "constType", skip_serializing_if = "Option::is_none")]
    const_type: Option<String>,
    #[serde(rename = "constValue", skip_serializing_if = "Option::is_none")]
    const_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<u32>,
    #[serde(rename = "hasElse", skip_serializing_if = "Option::is_none")]
    has_else: Option<bool>,
}

#[derive(Serialize)]
struct EdgeExport {
    src: u32,
    dest: u32,
    #[serde(rename = "edgeType")]
    edge_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(rename = "pdgType", skip_serializing_if = "Option::is_none")]
    pdg_type: Option<String>,
    #[serde(rename = "constType", skip_serializing_if = "Option::is_none")]
    const_type: Option<String>,
    #[serde(rename = "constValue", skip_serializing_if = "Option::is_none")]
    const_value: Option<String>,
}

#[derive(Serialize)]
struct GraphExport {
    nodes: Vec<NodeExport>,
    edges: Vec<EdgeExport>,
}

pub struct JsonWriter {
    export: GraphExport,
}

impl JsonWriter {
    pub fn new() -> JsonWriter {
        JsonWriter {
            export: GraphExport {
                nodes: Vec::new(),
                edges: Vec::new(),
            },
        }
    }

    pub fn into_output<W: Write>(self, mut out: W) -> io::Result<()> {
        let text = serde_json::to_string_pretty(&self.export)?;
        out.write_all(text.as_bytes())?;
        out.write_all(b"\n")
    }

    fn push_node(&mut self, node: &Node) {
        let is_function = node.node_type() == crate::graph::NodeType::Function;
        self.export.nodes.push(NodeExport {
            id: node.id.0,
            node_type: node.node_type().as_str().to_string(),
            name: node.name().map(str::to_string),
            index: node.index(),
            nargs: node.nargs(),
            nlocals: node.nlocals(),
            nresults: node.nresults(),
            is_import: is_function.then(|| node.is_import()),
            is_export: is_function.then(|| node.is_export()),
            var_type: node.var_type().map(|t| t.to_string()),
            inst_type: node.inst_type().map(|t| t.as_str().to_string()),
            opcode: node.opcode().map(str::to_string),
            const_type: node.const_value().map(|v| v.value_type().to_string()),
            const_value: node.const_value().map(|v| v.to_string()),
            label: node.label().map(str::to_string),
            offset: node.offset(),
            has_else: node.has_else(),
        });
    }

    fn push_edge(&mut self, edge: &Edge) {
        self.export.edges.push(EdgeExport {
            src: edge.src.0,
            dest: edge.dst.0,
            edge_type: edge.edge_type().as_str().to_string(),
            label: edge.label().map(str::to_string),
            pdg_type: edge.pdg_type().map(|t| t.as_str().to_string()),
            const_type: edge.const_value().map(|v| v.value_type().to_string()),
            const_value: edge.const_value().map(|v| v.to_string()),
        });
    }
}

impl Default for JsonWriter {
    fn default() -> Self {
        JsonWriter::new()
    }
}

impl GraphWriter for JsonWriter {
    fn visit_module(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.push_node(node);
        Ok(())
    }

    fn visit_function(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.push_node(node);
        Ok(())
    }

    fn visit_var(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.push_node(node);
        Ok(())
    }

    fn visit_marker(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.push_node(node);
        Ok(())
    }

    fn visit_instruction(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.push_node(node);
        Ok(())
    }

    fn visit_ast_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.push_edge(edge);
        Ok(())
    }

    fn visit_cfg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.push_edge(edge);
        Ok(())
    }

    fn visit_pdg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.push_edge(edge);
        Ok(())
    }

    fn visit_cg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.push_edge(edge);
        Ok(())
    }

    fn visit_pg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.push_edge(edge);
        Ok(())
    }
}
