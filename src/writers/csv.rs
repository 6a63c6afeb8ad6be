//! CSV+zip archive writer
//!
//! Two tables with a fixed column layout plus an `info.json` header with
//! totals; the reader cross-checks the counts on load. Nodes precede
//! edges in the archive.

use super::{edge_columns, node_columns, GraphWriter, EDGE_COLUMNS, NODE_COLUMNS};
use crate::graph::{Edge, Graph, Node};
use serde::Serialize;
use std::io::{self, Write};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

#[derive(Serialize)]
struct ArchiveInfo {
    nodes: usize,
    edges: usize,
}

pub struct CsvWriter {
    nodes: csv::Writer<Vec<u8>>,
    edges: csv::Writer<Vec<u8>>,
    node_rows: usize,
    edge_rows: usize,
}

impl CsvWriter {
    pub fn new() -> io::Result<CsvWriter> {
        let mut nodes = csv::Writer::from_writer(Vec::new());
        nodes.write_record(NODE_COLUMNS).map_err(to_io)?;
        let mut edges = csv::Writer::from_writer(Vec::new());
        edges.write_record(EDGE_COLUMNS).map_err(to_io)?;
        Ok(CsvWriter {
            nodes,
            edges,
            node_rows: 0,
            edge_rows: 0,
        })
    }

    fn node_row(&mut self, node: &Node) -> io::Result<()> {
        self.nodes.write_record(node_columns(node)).map_err(to_io)?;
        self.node_rows += 1;
        Ok(())
    }

    fn edge_row(&mut self, edge: &Edge) -> io::Result<()> {
        self.edges.write_record(edge_columns(edge)).map_err(to_io)?;
        self.edge_rows += 1;
        Ok(())
    }

    /// Assemble the zip archive and write it out.
    pub fn into_archive<W: Write + io::Seek>(self, out: W) -> io::Result<()> {
        let info = ArchiveInfo {
            nodes: self.node_rows,
            edges: self.edge_rows,
        };
        let nodes = self.nodes.into_inner().map_err(|e| e.into_error())?;
        let edges = self.edges.into_inner().map_err(|e| e.into_error())?;

        let mut zip = ZipWriter::new(out);
        let options = SimpleFileOptions::default();
        zip.start_file("info.json", options)?;
        zip.write_all(serde_json::to_string_pretty(&info)?.as_bytes())?;
        zip.start_file("nodes.csv", options)?;
        zip.write_all(&nodes)?;
        zip.start_file("edges.csv", options)?;
        zip.write_all(&edges)?;
        zip.finish()?;
        Ok(())
    }
}

fn to_io(e: csv::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

impl GraphWriter for CsvWriter {
    fn visit_module(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.node_row(node)
    }

    fn visit_function(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.node_row(node)
    }

    fn visit_var(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.node_row(node)
    }

    fn visit_marker(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.node_row(node)
    }

    fn visit_instruction(&mut self, _graph: &Graph, node: &Node) -> io::Result<()> {
        self.node_row(node)
    }

    fn visit_ast_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.edge_row(edge)
    }

    fn visit_cfg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.edge_row(edge)
    }

    fn visit_pdg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.edge_row(edge)
    }

    fn visit_cg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.edge_row(edge)
    }

    fn visit_pg_edge(&mut self, _graph: &Graph, edge: &Edge) -> io::Result<()> {
        self.edge_row(edge)
    }
}
