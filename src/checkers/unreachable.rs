//! Dead code: instructions no control flow can reach

use super::{walk_functions, VulnType, Vulnerability};
use crate::config::AnalysisConfig;
use crate::graph::{EdgeType, InstType};
use crate::query::{NodeStream, Predicate, Query};

pub fn check(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    // structural nodes and branch joins legitimately lack incoming CFG
    // edges; everything else without one is dead
    let dead = Predicate::new()
        .inst_type_not(InstType::Return)
        .inst_type_not(InstType::Block)
        .inst_type_not(InstType::BeginBlock)
        .inst_type_not(InstType::Loop)
        .inst_type_not(InstType::Unreachable)
        .no_in_edge(EdgeType::Cfg);

    for (func, name) in walk_functions(query, config) {
        let insts = query.instructions(&NodeStream::of(query.graph(), func));
        if !insts.filter_pred(&dead).is_empty() {
            vulns.push(Vulnerability::new(VulnType::Unreachable, name, None, None));
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
    fn test_code_after_return_is_reported_once_per_function() {
        let vulns = run(
            r#"(module
                 (func $f (result i32)
                   i32.const 0
                   return
                   i32.const 1
                   drop))"#,
        );
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].vuln_type, VulnType::Unreachable);
        assert_eq!(vulns[0].function, "$f");
    }

    #[test]
    fn test_straight_line_code_is_clean() {
        let vulns = run(
            r#"(module
                 (func $f (result i32)
                   i32.const 0))"#,
        );
        assert!(vulns.is_empty());
    }
}
