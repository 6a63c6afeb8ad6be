//! Use-after-free and double-free over configured alloc/free pairs
//!
//! An allocation is worth walking only when a matching release call that
//! consumes its value is CFG-reachable from it; the layer-reachability
//! cache answers that. From each such allocation, a depth-first CFG walk
//! then carries one bit: has the release fired on the current path. A
//! later consumer of the same value is a use-after-free; a second
//! release is a double-free.

use super::{walk_functions, VulnType, Vulnerability};
use crate::config::AnalysisConfig;
use crate::graph::{EdgeType, Graph, InstType, NodeId, PdgType};
use crate::query::reachability::LayerReachability;
use crate::query::{cfg_edges, NodeStream, Predicate, Query};

pub fn check(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    if config.control_flow.is_empty() {
        return;
    }
    let graph = query.graph();
    let mut cfg_reach = LayerReachability::new(graph, EdgeType::Cfg);

    for (func, name) in walk_functions(query, config) {
        for pair in &config.control_flow {
            let insts = query.instructions(&NodeStream::of(graph, func));
            let allocs = insts.filter_pred(
                &Predicate::new()
                    .inst_type(InstType::Call)
                    .label(&pair.source),
            );
            if allocs.is_empty() {
                continue;
            }
            let frees = insts.filter_pred(
                &Predicate::new()
                    .inst_type(InstType::Call)
                    .label(&pair.dest),
            );
            for alloc in allocs.iter() {
                let alloc_label = graph.node(alloc).label().unwrap_or_default().to_string();
                let released = frees.iter().any(|free| {
                    carries_allocation(graph, free, &alloc_label)
                        && cfg_reach.can_reach(alloc, free)
                });
                if !released {
                    continue;
                }
                walk_from_alloc(query, alloc, &pair.dest, &name, vulns);
            }
        }
    }
}

/// Does this allocation's value flow through the node?
fn carries_allocation(graph: &Graph, node: NodeId, alloc_label: &str) -> bool {
    graph
        .in_edges_of(node, EdgeType::Pdg)
        .chain(graph.out_edges_of(node, EdgeType::Pdg))
        .any(|e| {
            e.pdg_type() == Some(PdgType::Function) && e.label() == Some(alloc_label)
        })
}

fn walk_from_alloc(
    query: Query,
    alloc: NodeId,
    free_label: &str,
    func_name: &str,
    vulns: &mut Vec<Vulnerability>,
) {
    let graph = query.graph();
    let alloc_label = graph.node(alloc).label().unwrap_or_default().to_string();

    query.dfs(alloc, cfg_edges, false, |node, seen_free| {
        let carries = carries_allocation(graph, node, &alloc_label);
        let n = graph.node(node);

        if n.is_inst(InstType::Call) && n.label() == Some(free_label) {
            if seen_free && carries {
                vulns.push(Vulnerability::new(
                    VulnType::DoubleFree,
                    func_name.to_string(),
                    Some(free_label.to_string()),
                    Some(format!("{} called again.", free_label)),
                ));
            }
            return (true, carries);
        }
        if seen_free && carries {
            vulns.push(Vulnerability::new(
                VulnType::UseAfterFree,
                func_name.to_string(),
                n.label().map(str::to_string),
                Some(format!(
                    "Value from call {} used after call to {}",
                    alloc_label, free_label
                )),
            ));
            return (false, seen_free);
        }
        (true, seen_free)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::build_cpg;
    use crate::frontend::module_from_wat;

    const HEAP_IMPORTS: &str = r#"
        (import "env" "malloc" (func $malloc (param i32) (result i32)))
        (import "env" "free" (func $free (param i32)))"#;

    fn run(body: &str) -> Vec<Vulnerability> {
        let wat = format!(
            "(module {} (memory 1) (func $f (local $p i32) {}))",
            HEAP_IMPORTS, body
        );
        let module = module_from_wat(&wat, true).unwrap();
        let mut graph = Graph::new();
        build_cpg(&mut graph, &module, None);
        let mut vulns = Vec::new();
        check(
            Query::new(&graph),
            &AnalysisConfig::default(),
            &mut vulns,
        );
        vulns
    }

    #[test]
    fn test_load_after_free() {
        let vulns = run(
            r#"i32.const 16
               call $malloc
               local.set $p
               local.get $p
               call $free
               local.get $p
               i32.load
               drop"#,
        );
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].vuln_type, VulnType::UseAfterFree);
        assert_eq!(
            vulns[0].description.as_deref(),
            Some("Value from call $malloc used after call to $free")
        );
    }

    #[test]
    fn test_double_free() {
        let vulns = run(
            r#"i32.const 16
               call $malloc
               local.set $p
               local.get $p
               call $free
               local.get $p
               call $free"#,
        );
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].vuln_type, VulnType::DoubleFree);
        assert_eq!(vulns[0].caller.as_deref(), Some("$free"));
    }

    #[test]
    fn test_single_free_is_clean() {
        let vulns = run(
            r#"i32.const 16
               call $malloc
               local.set $p
               local.get $p
               call $free"#,
        );
        assert!(vulns.is_empty());
    }
}
