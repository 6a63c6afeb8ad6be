//! Format-string argument that no constant can account for

use super::{walk_functions, VulnType, Vulnerability};
use crate::config::AnalysisConfig;
use crate::graph::{EdgeType, InstType, PdgType};
use crate::query::{NodeStream, Predicate, Query};

pub fn check(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    if config.format_string.is_empty() {
        return;
    }
    for (func, name) in walk_functions(query, config) {
        // the printf-family functions themselves pass their argument on
        if config.format_string.contains_key(&name) {
            continue;
        }
        let calls = query
            .instructions(&NodeStream::of(query.graph(), func))
            .filter_pred(&Predicate::new().inst_type(InstType::Call));
        for call in calls.iter() {
            let graph = query.graph();
            let Some(callee) = graph.node(call).label() else {
                continue;
            };
            let Some(&position) = config.format_string.get(callee) else {
                continue;
            };
            let Some(arg) = graph.child(call, position as usize, EdgeType::Ast) else {
                continue;
            };
            let constant = graph
                .out_edges_of(arg, EdgeType::Pdg)
                .any(|e| e.pdg_type() == Some(PdgType::Const));
            if !constant {
                vulns.push(Vulnerability::new(
                    VulnType::FormatStrings,
                    name.clone(),
                    Some(callee.to_string()),
                    None,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::build_cpg;
    use crate::frontend::module_from_wat;
    use crate::graph::Graph;

    fn run(wat: &str) -> Vec<Vulnerability> {
        let module = module_from_wat(wat, true).unwrap();
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
    fn test_non_constant_format_argument() {
        let vulns = run(
            r#"(module
                 (import "env" "printf" (func $printf (param i32) (result i32)))
                 (memory 1)
                 (func $f (param $fmt i32)
                   local.get $fmt
                   i32.load
                   call $printf
                   drop))"#,
        );
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].vuln_type, VulnType::FormatStrings);
        assert_eq!(vulns[0].function, "$f");
        assert_eq!(vulns[0].caller.as_deref(), Some("$printf"));
    }

    #[test]
    fn test_constant_format_argument_is_clean() {
        let vulns = run(
            r#"(module
                 (import "env" "printf" (func $printf (param i32) (result i32)))
                 (func $f
                   i32.const 1024
                   call $printf
                   drop))"#,
        );
        assert!(vulns.is_empty());
    }
}
