//! Graph invariants and archive round-trips over a nontrivial module

use std::collections::BTreeSet;
use wasmati::builders::build_cpg;
use wasmati::frontend::module_from_wat;
use wasmati::graph::{EdgeType, InstType, NodeType};
use wasmati::readers::read_graph_file;
use wasmati::writers::{write_graph, CsvWriter, EmitOptions};
use wasmati::Graph;

const FIXTURE: &str = r#"(module
  (import "env" "source" (func $source (result i32)))
  (global $g0 (mut i32) (i32.const 65536))
  (memory 1)
  (func $helper (param $x i32) (result i32)
    local.get $x
    i32.const 1
    i32.add)
  (func $main (export "main") (result i32)
    (local $i i32)
    (block $exit
      (loop $again
        local.get $i
        i32.const 10
        i32.ge_s
        br_if $exit
        local.get $i
        call $helper
        local.set $i
        br $again))
    call $source
    drop
    unreachable))"#;

fn build() -> Graph {
    let module = module_from_wat(FIXTURE, true).unwrap();
    let mut graph = Graph::new();
    build_cpg(&mut graph, &module, None);
    graph
}

#[test]
fn node_ids_form_a_contiguous_range() {
    let graph = build();
    let ids: Vec<u32> = graph.nodes().map(|n| n.id.0).collect();
    let expected: Vec<u32> = (0..graph.node_count() as u32).collect();
    assert_eq!(ids, expected);
}

#[test]
fn every_edge_references_valid_nodes() {
    let graph = build();
    let count = graph.node_count() as u32;
    for edge in graph.edges() {
        assert!(edge.src.0 < count);
        assert!(edge.dst.0 < count);
    }
}

#[test]
fn exactly_one_module_root() {
    let graph = build();
    let modules: Vec<_> = graph
        .nodes()
        .filter(|n| n.node_type() == NodeType::Module)
        .collect();
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].id, graph.module());
}

#[test]
fn functions_and_instructions_reachable_from_module() {
    let graph = build();
    // transitive AST closure from the root
    let mut reachable = BTreeSet::new();
    let mut queue = vec![graph.module()];
    while let Some(current) = queue.pop() {
        if !reachable.insert(current) {
            continue;
        }
        queue.extend(graph.out_edges_of(current, EdgeType::Ast).map(|e| e.dst));
    }
    // every function, import or not, hangs off the module; every
    // instruction except the begin-block join markers hangs off its
    // function
    let funcs: Vec<_> = graph
        .nodes()
        .filter(|n| n.node_type() == NodeType::Function)
        .collect();
    assert_eq!(funcs.len(), 3);
    for func in funcs {
        assert!(reachable.contains(&func.id));
    }
    for node in graph.nodes() {
        if node.node_type() == NodeType::Instruction
            && !node.is_inst(InstType::BeginBlock)
        {
            assert!(
                reachable.contains(&node.id),
                "instruction {} not reachable from module",
                node.id
            );
        }
    }
}

#[test]
fn unreachable_instruction_traps() {
    let graph = build();
    let trap = graph.trap_id().expect("fixture contains unreachable");
    for node in graph.nodes() {
        if node.is_inst(InstType::Unreachable) {
            let out: Vec<_> = graph.out_edges_of(node.id, EdgeType::Cfg).collect();
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].dst, trap);
        }
    }
}

#[test]
fn brif_fans_out_true_and_false() {
    let graph = build();
    let mut checked = 0;
    for node in graph.nodes() {
        if node.is_inst(InstType::BrIf) {
            let labels: BTreeSet<String> = graph
                .out_edges_of(node.id, EdgeType::Cfg)
                .filter_map(|e| e.label().map(str::to_string))
                .collect();
            assert_eq!(
                labels,
                BTreeSet::from(["true".to_string(), "false".to_string()])
            );
            checked += 1;
        }
    }
    assert!(checked > 0);
}

#[test]
fn pdg_edges_are_unique_per_tuple() {
    let graph = build();
    let mut seen = BTreeSet::new();
    for edge in graph.edges() {
        if edge.edge_type() != EdgeType::Pdg {
            continue;
        }
        let key = (
            edge.src,
            edge.dst,
            edge.pdg_type().unwrap().as_str(),
            edge.label().map(str::to_string),
        );
        assert!(seen.insert(key), "duplicate PDG edge {:?}", edge);
    }
}

#[test]
fn csv_zip_roundtrip_preserves_the_graph() {
    let graph = build();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cpg.zip");

    let mut writer = CsvWriter::new().unwrap();
    write_graph(&mut writer, &graph, &EmitOptions::default()).unwrap();
    writer
        .into_archive(std::fs::File::create(&path).unwrap())
        .unwrap();

    let loaded = read_graph_file(&path).unwrap();
    assert_eq!(graph.node_count(), loaded.node_count());
    assert_eq!(graph.edge_count(), loaded.edge_count());

    for (a, b) in graph.nodes().zip(loaded.nodes()) {
        assert_eq!(a, b, "node {} changed across the roundtrip", a.id);
    }

    let key = |g: &Graph| -> BTreeSet<String> {
        g.edges()
            .map(|e| {
                format!(
                    "{}->{} {} {:?} {:?} {:?}",
                    e.src,
                    e.dst,
                    e.edge_type().as_str(),
                    e.label(),
                    e.pdg_type(),
                    e.const_value()
                )
            })
            .collect()
    };
    assert_eq!(key(&graph), key(&loaded));

    // the loaded graph answers queries identically
    let q = wasmati::query::Query::new(&loaded);
    assert_eq!(q.functions().len(), 3);
}
