//! CPG archive reader: rebuild a graph from the csv+zip dump
//!
//! Rows are keyed by the stable ids the writer emitted; the rebuilt
//! store re-assigns the same ids because rows are sorted. `info.json`
//! totals cross-check the load.

use crate::errors::{WasmatiError, WasmatiResult};
use crate::graph::{EdgeKind, Graph, InstKind, NodeId, NodeKind, NodeType, PdgType};
use crate::graph::node::InstType;
use crate::ir::{ConstValue, ValueType};
use serde::Deserialize;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

#[derive(Deserialize)]
struct ArchiveInfo {
    nodes: usize,
    edges: usize,
}

pub fn read_graph_file(path: &Path) -> WasmatiResult<Graph> {
    let file = std::fs::File::open(path)?;
    read_graph(file)
}

pub fn read_graph<R: Read + Seek>(reader: R) -> WasmatiResult<Graph> {
    let mut archive = ZipArchive::new(reader)?;

    let info: ArchiveInfo = {
        let mut file = archive.by_name("info.json")?;
        let mut text = String::new();
        file.read_to_string(&mut text)?;
        serde_json::from_str(&text)?
    };

    let mut graph = Graph::new();

    let node_rows = read_rows(&mut archive, "nodes.csv")?;
    if node_rows.len() != info.nodes {
        return Err(WasmatiError::GraphLoad(format!(
            "info.json declares {} nodes but nodes.csv has {}",
            info.nodes,
            node_rows.len()
        )));
    }
    let mut sorted = node_rows;
    sorted.sort_by_key(|row| row.first().and_then(|c| c.parse::<u32>().ok()).unwrap_or(0));
    for row in &sorted {
        let (id, kind) = parse_node(row)?;
        let assigned = graph.add_node(kind);
        if assigned != id {
            return Err(WasmatiError::GraphLoad(format!(
                "node ids are not contiguous: expected {}, found {}",
                assigned, id
            )));
        }
        graph.note_singleton(assigned);
    }

    let edge_rows = read_rows(&mut archive, "edges.csv")?;
    if edge_rows.len() != info.edges {
        return Err(WasmatiError::GraphLoad(format!(
            "info.json declares {} edges but edges.csv has {}",
            info.edges,
            edge_rows.len()
        )));
    }
    for row in &edge_rows {
        let (src, dst, kind) = parse_edge(row)?;
        if src.0 as usize >= graph.node_count() || dst.0 as usize >= graph.node_count() {
            return Err(WasmatiError::GraphLoad(format!(
                "edge {} -> {} references a missing node",
                src, dst
            )));
        }
        graph.add_edge(src, dst, kind);
    }

    debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "graph loaded from archive"
    );
    Ok(graph)
}

fn read_rows<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> WasmatiResult<Vec<Vec<String>>> {
    let mut file = archive.by_name(name)?;
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn field<'a>(row: &'a [String], index: usize) -> &'a str {
    row.get(index).map(String::as_str).unwrap_or("")
}

fn number(row: &[String], index: usize, what: &str) -> WasmatiResult<u32> {
    let text = field(row, index);
    if text.is_empty() {
        return Ok(0);
    }
    text.parse::<u32>()
        .map_err(|_| WasmatiError::GraphLoad(format!("bad {} value: {:?}", what, text)))
}

fn boolean(row: &[String], index: usize) -> bool {
    matches!(field(row, index), "1" | "true")
}

fn parse_const(row: &[String], ty_index: usize, value_index: usize) -> WasmatiResult<Option<ConstValue>> {
    let ty = field(row, ty_index);
    if ty.is_empty() {
        return Ok(None);
    }
    let ty = ValueType::parse(ty)
        .ok_or_else(|| WasmatiError::GraphLoad(format!("unknown value type {:?}", ty)))?;
    ConstValue::parse(ty, field(row, value_index))
        .map(Some)
        .ok_or_else(|| {
            WasmatiError::GraphLoad(format!("bad constant {:?}", field(row, value_index)))
        })
}

fn parse_node(row: &[String]) -> WasmatiResult<(NodeId, NodeKind)> {
    let id = NodeId(number(row, 0, "node id")?);
    let node_type = NodeType::parse(field(row, 1))
        .ok_or_else(|| WasmatiError::GraphLoad(format!("unknown node type {:?}", field(row, 1))))?;

    let kind = match node_type {
        NodeType::Module => NodeKind::Module {
            name: field(row, 2).to_string(),
        },
        NodeType::Function => NodeKind::Function {
            name: field(row, 2).to_string(),
            index: number(row, 3, "index")?,
            nargs: number(row, 4, "nargs")?,
            nlocals: number(row, 5, "nlocals")?,
            nresults: number(row, 6, "nresults")?,
            is_import: boolean(row, 7),
            is_export: boolean(row, 8),
        },
        NodeType::FunctionSignature => NodeKind::FunctionSignature,
        NodeType::Parameters => NodeKind::Parameters,
        NodeType::Locals => NodeKind::Locals,
        NodeType::Results => NodeKind::Results,
        NodeType::Instructions => NodeKind::Instructions,
        NodeType::Else => NodeKind::Else,
        NodeType::Trap => NodeKind::Trap,
        NodeType::Start => NodeKind::Start,
        NodeType::VarNode => NodeKind::Var {
            ty: ValueType::parse(field(row, 9)).ok_or_else(|| {
                WasmatiError::GraphLoad(format!("unknown var type {:?}", field(row, 9)))
            })?,
            index: number(row, 3, "index")?,
            name: field(row, 2).to_string(),
        },
        NodeType::Instruction => NodeKind::Inst(parse_inst(row)?),
    };
    Ok((id, kind))
}

fn parse_inst(row: &[String]) -> WasmatiResult<InstKind> {
    let inst_type = InstType::parse(field(row, 10)).ok_or_else(|| {
        WasmatiError::GraphLoad(format!("unknown instruction type {:?}", field(row, 10)))
    })?;
    let opcode = || field(row, 11).to_string();
    let label = || field(row, 14).to_string();

    Ok(match inst_type {
        InstType::Nop => InstKind::Nop,
        InstType::Unreachable => InstKind::Unreachable,
        InstType::Return => InstKind::Return,
        InstType::Drop => InstKind::Drop,
        InstType::Select => InstKind::Select,
        InstType::MemorySize => InstKind::MemorySize,
        InstType::MemoryGrow => InstKind::MemoryGrow,
        InstType::BrTable => InstKind::BrTable,
        InstType::Const => InstKind::Const {
            value: parse_const(row, 12, 13)?.ok_or_else(|| {
                WasmatiError::GraphLoad("const instruction without a value".to_string())
            })?,
        },
        InstType::Binary => InstKind::Binary { opcode: opcode() },
        InstType::Compare => InstKind::Compare { opcode: opcode() },
        InstType::Convert => InstKind::Convert { opcode: opcode() },
        InstType::Unary => InstKind::Unary { opcode: opcode() },
        InstType::Load => InstKind::Load {
            opcode: opcode(),
            offset: number(row, 15, "offset")?,
        },
        InstType::Store => InstKind::Store {
            opcode: opcode(),
            offset: number(row, 15, "offset")?,
        },
        InstType::Br => InstKind::Br { label: label() },
        InstType::BrIf => InstKind::BrIf { label: label() },
        InstType::LocalGet => InstKind::LocalGet { label: label() },
        InstType::LocalSet => InstKind::LocalSet { label: label() },
        InstType::LocalTee => InstKind::LocalTee { label: label() },
        InstType::GlobalGet => InstKind::GlobalGet { label: label() },
        InstType::GlobalSet => InstKind::GlobalSet { label: label() },
        InstType::Call => InstKind::Call {
            label: label(),
            nargs: number(row, 4, "nargs")?,
            nresults: number(row, 6, "nresults")?,
        },
        InstType::CallIndirect => InstKind::CallIndirect {
            label: label(),
            nargs: number(row, 4, "nargs")?,
            nresults: number(row, 6, "nresults")?,
        },
        InstType::Block => InstKind::Block {
            label: label(),
            nresults: number(row, 6, "nresults")?,
        },
        InstType::Loop => InstKind::Loop {
            label: label(),
            nresults: number(row, 6, "nresults")?,
        },
        InstType::BeginBlock => InstKind::BeginBlock { label: label() },
        InstType::If => InstKind::If {
            nresults: number(row, 6, "nresults")?,
            has_else: boolean(row, 16),
        },
    })
}

fn parse_edge(row: &[String]) -> WasmatiResult<(NodeId, NodeId, EdgeKind)> {
    let src = NodeId(number(row, 0, "edge source")?);
    let dst = NodeId(number(row, 1, "edge destination")?);
    let edge_type = field(row, 2);
    let label = field(row, 3);

    let kind = match edge_type {
        "AST" => EdgeKind::Ast,
        "CFG" => EdgeKind::Cfg {
            label: (!label.is_empty()).then(|| label.to_string()),
        },
        "PDG" => {
            let pdg_type = PdgType::parse(field(row, 4)).ok_or_else(|| {
                WasmatiError::GraphLoad(format!("unknown PDG category {:?}", field(row, 4)))
            })?;
            EdgeKind::Pdg {
                pdg_type,
                label: label.to_string(),
                value: parse_const(row, 5, 6)?,
            }
        }
        "CG" => EdgeKind::Cg,
        "PG" => EdgeKind::Pg,
        other => {
            return Err(WasmatiError::GraphLoad(format!(
                "unknown edge type {:?}",
                other
            )))
        }
    };
    Ok((src, dst, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::build_cpg;
    use crate::frontend::module_from_wat;
    use crate::writers::{write_graph, CsvWriter, EmitOptions};
    use std::io::Cursor;

    fn roundtrip(wat: &str) -> (Graph, Graph) {
        let module = module_from_wat(wat, true).unwrap();
        let mut graph = Graph::new();
        build_cpg(&mut graph, &module, None);

        let mut writer = CsvWriter::new().unwrap();
        write_graph(&mut writer, &graph, &EmitOptions::default()).unwrap();
        let mut buffer = Cursor::new(Vec::new());
        writer.into_archive(&mut buffer).unwrap();
        buffer.set_position(0);

        let loaded = read_graph(buffer).unwrap();
        (graph, loaded)
    }

    #[test]
    fn test_roundtrip_is_isomorphic() {
        let (original, loaded) = roundtrip(
            r#"(module
                 (import "env" "source" (func $source (result i32)))
                 (func $f (param $x i32) (result i32)
                   (block $b
                     local.get $x
                     br_if $b
                     call $source
                     drop)
                   i32.const 7))"#,
        );
        assert_eq!(original.node_count(), loaded.node_count());
        assert_eq!(original.edge_count(), loaded.edge_count());
        for (a, b) in original.nodes().zip(loaded.nodes()) {
            assert_eq!(a, b);
        }
        // edge multisets match attribute for attribute
        let mut original_edges: Vec<_> = original.edges().cloned().collect();
        let mut loaded_edges: Vec<_> = loaded.edges().cloned().collect();
        let key = |e: &crate::graph::Edge| {
            (
                e.src,
                e.dst,
                e.edge_type().as_str(),
                e.label().map(str::to_string),
                e.pdg_type().map(|t| t.as_str()),
                e.const_value(),
            )
        };
        original_edges.sort_by_key(key);
        loaded_edges.sort_by_key(key);
        for (a, b) in original_edges.iter().zip(loaded_edges.iter()) {
            assert_eq!(key(a), key(b));
        }
    }

    #[test]
    fn test_count_mismatch_is_detected() {
        let module = module_from_wat(r#"(module (func $f nop))"#, true).unwrap();
        let mut graph = Graph::new();
        build_cpg(&mut graph, &module, None);

        let mut writer = CsvWriter::new().unwrap();
        write_graph(&mut writer, &graph, &EmitOptions::default()).unwrap();
        let mut buffer = Cursor::new(Vec::new());
        writer.into_archive(&mut buffer).unwrap();

        // corrupt the archive by rebuilding it with a wrong info.json
        buffer.set_position(0);
        let mut archive = ZipArchive::new(buffer).unwrap();
        let mut nodes = String::new();
        archive
            .by_name("nodes.csv")
            .unwrap()
            .read_to_string(&mut nodes)
            .unwrap();
        let mut edges = String::new();
        archive
            .by_name("edges.csv")
            .unwrap()
            .read_to_string(&mut edges)
            .unwrap();

        let mut corrupted = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut corrupted);
            let options = zip::write::SimpleFileOptions::default();
            use std::io::Write as _;
            zip.start_file("info.json", options).unwrap();
            zip.write_all(br#"{ "nodes": 999, "edges": 0 }"#).unwrap();
            zip.start_file("nodes.csv", options).unwrap();
            zip.write_all(nodes.as_bytes()).unwrap();
            zip.start_file("edges.csv", options).unwrap();
            zip.write_all(edges.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        corrupted.set_position(0);
        let err = read_graph(corrupted).unwrap_err();
        assert!(matches!(err, WasmatiError::GraphLoad(_)));
    }
}
