//! Calls into a configured blacklist of unsafe functions

use super::{walk_functions, VulnType, Vulnerability};
use crate::config::AnalysisConfig;
use crate::graph::InstType;
use crate::query::{NodeStream, Predicate, Query};

pub fn check(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    if config.dangerous_functions.is_empty() {
        return;
    }
    for (func, name) in walk_functions(query, config) {
        let blacklist = config.dangerous_functions.clone();
        let calls = query
            .instructions(&NodeStream::of(query.graph(), func))
            .filter_pred(&Predicate::new().inst_type(InstType::Call).test(move |g, id| {
                g.node(id)
                    .label()
                    .map_or(false, |l| blacklist.contains(l))
            }));
        for call in calls.iter() {
            let callee = query.graph().node(call).label().unwrap_or_default().to_string();
            vulns.push(Vulnerability::new(
                VulnType::DangerousFunction,
                name.clone(),
                Some(callee),
                None,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::build_cpg;
    use crate::frontend::module_from_wat;
    use crate::graph::Graph;

    #[test]
    fn test_blacklisted_call_is_flagged() {
        let module = module_from_wat(
            r#"(module
                 (import "env" "gets" (func $gets (param i32) (result i32)))
                 (func $f
                   i32.const 16
                   call $gets
                   drop))"#,
            true,
        )
        .unwrap();
        let mut graph = Graph::new();
        build_cpg(&mut graph, &module, None);
        let mut vulns = Vec::new();
        check(
            Query::new(&graph),
            &AnalysisConfig::default(),
            &mut vulns,
        );
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].vuln_type, VulnType::DangerousFunction);
        assert_eq!(vulns[0].caller.as_deref(), Some("$gets"));
    }
}
