//! Taint propagation: configured sources reaching configured sinks
//!
//! A parameter is tainted if the config says so, if its function is an
//! exported implicit sink, or if a caller passes it a value that depends
//! on one of the caller's own tainted parameters. The recursion visits
//! each function at most once.

use super::{effective_sinks, effective_sources, walk_functions, VulnType, Vulnerability};
use crate::config::AnalysisConfig;
use crate::graph::{EdgeType, InstType, NodeId, PdgType};
use crate::query::{ast_edges, NodeStream, Predicate, Query};
use std::collections::{BTreeMap, BTreeSet};

pub fn check(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    func_to_func(query, config, vulns);
    local_to_func(query, config, vulns);
    call_indirect(query, config, vulns);
}

/// Is this parameter fed untrusted data on some call path?
/// Returns the originally tainted parameter and its function.
pub(super) fn is_tainted(
    query: Query,
    config: &AnalysisConfig,
    param: NodeId,
    visited: &mut BTreeSet<String>,
) -> Option<(String, String)> {
    let graph = query.graph();
    let func = query.function_of(param)?;
    let func_name = graph.node(func).name()?.to_string();
    if !visited.insert(func_name.clone()) {
        return None;
    }
    let param_name = graph.node(param).name().unwrap_or_default().to_string();
    let param_index = graph.node(param).index()?;

    if let Some(entry) = config.tainted.get(&func_name) {
        if entry.params.contains(&param_index) {
            return Some((param_name, func_name));
        }
    } else if config.exported_as_sinks
        && graph.node(func).is_export()
        && !config.white_list.contains(&func_name)
    {
        return Some((param_name, func_name));
    }

    // arguments handed to this parameter position at every call site
    let call_sites = NodeStream::of(graph, func).parents(|e| {
        e.edge_type() == EdgeType::Cg
    });
    let args = call_sites.child(param_index as usize, EdgeType::Ast);

    for arg in args.iter() {
        let local_vars: BTreeSet<String> = graph
            .out_edges_of(arg, EdgeType::Pdg)
            .chain(graph.in_edges_of(arg, EdgeType::Pdg))
            .filter(|e| e.pdg_type() == Some(PdgType::Local))
            .filter_map(|e| e.label().map(str::to_string))
            .collect();
        if local_vars.is_empty() {
            continue;
        }
        let Some(caller) = query.function_of(arg) else {
            continue;
        };
        let caller_params = query
            .parameters(&NodeStream::of(graph, caller))
            .filter(|g, id| {
                g.node(id)
                    .name()
                    .map_or(false, |n| local_vars.contains(n))
            });
        for caller_param in caller_params.iter() {
            if let Some(found) = is_tainted(query, config, caller_param, visited) {
                return Some(found);
            }
        }
    }
    None
}

fn func_to_func(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    let sources = effective_sources(query, config);
    let sinks = effective_sinks(query, config);
    let graph = query.graph();

    for (func, name) in walk_functions(query, config) {
        if sinks.contains(&name) {
            continue;
        }
        let calls = query
            .instructions(&NodeStream::of(graph, func))
            .filter(|g, id| {
                g.node(id).is_inst(InstType::Call)
                    && g.node(id).label().map_or(false, |l| sinks.contains(l))
            });
        for call in calls.iter() {
            for edge in graph.in_edges_of(call, EdgeType::Pdg) {
                if edge.pdg_type() != Some(PdgType::Function) {
                    continue;
                }
                let Some(source) = edge.label() else { continue };
                if !sources.contains(source) {
                    continue;
                }
                let sink = graph.node(call).label().unwrap_or_default();
                vulns.push(Vulnerability::new(
                    VulnType::Tainted,
                    name.clone(),
                    Some(sink.to_string()),
                    Some(format!("Source {} reaches sink {}", source, sink)),
                ));
            }
        }
    }
}

fn local_to_func(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    let sinks = effective_sinks(query, config);
    let graph = query.graph();

    for (func, name) in walk_functions(query, config) {
        if sinks.contains(&name) {
            continue;
        }

        let mut tainted_params: BTreeMap<String, Option<(String, String)>> = BTreeMap::new();
        for param in query.parameters(&NodeStream::of(graph, func)).iter() {
            let Some(param_name) = graph.node(param).name().map(str::to_string) else {
                continue;
            };
            let mut visited = BTreeSet::new();
            tainted_params.insert(param_name, is_tainted(query, config, param, &mut visited));
        }

        let calls = query
            .instructions(&NodeStream::of(graph, func))
            .filter(|g, id| {
                g.node(id).is_inst(InstType::Call)
                    && g.node(id).label().map_or(false, |l| sinks.contains(l))
            });
        for call in calls.iter() {
            let mut local_deps: BTreeSet<String> = graph
                .in_edges_of(call, EdgeType::Pdg)
                .filter(|e| e.pdg_type() == Some(PdgType::Local))
                .filter_map(|e| e.label().map(str::to_string))
                .collect();
            for arg in NodeStream::of(graph, call).children(ast_edges).iter() {
                local_deps.extend(
                    graph
                        .in_edges_of(arg, EdgeType::Pdg)
                        .filter(|e| e.pdg_type() == Some(PdgType::Local))
                        .filter_map(|e| e.label().map(str::to_string)),
                );
            }

            for local in &local_deps {
                match tainted_params.get(local) {
                    Some(Some((param, via))) => {
                        let sink = graph.node(call).label().unwrap_or_default();
                        vulns.push(Vulnerability::new(
                            VulnType::Tainted,
                            name.clone(),
                            Some(sink.to_string()),
                            Some(format!(
                                "{} tainted from param {} in {}",
                                local, param, via
                            )),
                        ));
                    }
                    _ => continue,
                }
            }
        }
    }
}

fn call_indirect(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    let sources = effective_sources(query, config);
    let graph = query.graph();

    for (func, name) in walk_functions(query, config) {
        let indirects = query
            .instructions(&NodeStream::of(graph, func))
            .filter_pred(&Predicate::new().inst_type(InstType::CallIndirect));
        for call in indirects.iter() {
            // the function-index operand is the last child
            let Some(last_arg) = NodeStream::of(graph, call)
                .children(ast_edges)
                .find_last()
            else {
                continue;
            };
            let edge = graph
                .in_edges_of(last_arg, EdgeType::Pdg)
                .chain(graph.out_edges_of(last_arg, EdgeType::Pdg))
                .next();
            let Some(edge) = edge else { continue };

            if edge.pdg_type() == Some(PdgType::Function)
                && edge.label().map_or(false, |l| sources.contains(l))
            {
                vulns.push(Vulnerability::new(
                    VulnType::Tainted,
                    name.clone(),
                    Some("call_indirect".to_string()),
                    Some(format!(
                        "Source {} reaches last argument from call_indirect.",
                        edge.label().unwrap_or_default()
                    )),
                ));
            } else if edge.pdg_type() == Some(PdgType::Local) {
                let Some(label) = edge.label().map(str::to_string) else {
                    continue;
                };
                let param = query
                    .parameters(&NodeStream::of(graph, func))
                    .filter_pred(&Predicate::new().name(&label))
                    .find_first();
                let Some(param) = param else { continue };
                let mut visited = BTreeSet::new();
                if let Some((tainted_param, via)) = is_tainted(query, config, param, &mut visited)
                {
                    vulns.push(Vulnerability::new(
                        VulnType::Tainted,
                        name.clone(),
                        Some("call_indirect".to_string()),
                        Some(format!(
                            "{} tainted from param {} in {}",
                            label, tainted_param, via
                        )),
                    ));
                }
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

    fn run(wat: &str, config: &AnalysisConfig) -> Vec<Vulnerability> {
        let module = module_from_wat(wat, true).unwrap();
        let mut graph = Graph::new();
        build_cpg(&mut graph, &module, None);
        let mut vulns = Vec::new();
        check(Query::new(&graph), config, &mut vulns);
        vulns
    }

    #[test]
    fn test_source_flows_into_sink() {
        let config = AnalysisConfig {
            import_as_sources: false,
            import_as_sinks: false,
            sources: BTreeSet::from(["$source".to_string()]),
            sinks: BTreeSet::from(["$sink".to_string()]),
            ..AnalysisConfig::default()
        };
        let vulns = run(
            r#"(module
                 (import "env" "source" (func $source (result i32)))
                 (import "env" "sink" (func $sink (param i32)))
                 (func $foo
                   call $source
                   call $sink))"#,
            &config,
        );
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].vuln_type, VulnType::Tainted);
        assert_eq!(vulns[0].function, "$foo");
        assert_eq!(vulns[0].caller.as_deref(), Some("$sink"));
        assert!(vulns[0]
            .description
            .as_deref()
            .unwrap()
            .contains("$source"));
    }

    #[test]
    fn test_explicitly_tainted_parameter_reaches_sink() {
        let config = AnalysisConfig {
            import_as_sources: false,
            import_as_sinks: true,
            tainted: BTreeMap::from([(
                "$handler".to_string(),
                crate::config::TaintedParams { params: vec![0] },
            )]),
            ..AnalysisConfig::default()
        };
        let vulns = run(
            r#"(module
                 (import "env" "write" (func $write (param i32)))
                 (func $handler (param $data i32)
                   local.get $data
                   call $write))"#,
            &config,
        );
        let tainted: Vec<_> = vulns
            .iter()
            .filter(|v| v.vuln_type == VulnType::Tainted)
            .collect();
        assert_eq!(tainted.len(), 1);
        assert_eq!(tainted[0].function, "$handler");
        assert!(tainted[0]
            .description
            .as_deref()
            .unwrap()
            .contains("tainted from param $data in $handler"));
    }

    #[test]
    fn test_taint_crosses_call_boundary() {
        // $outer's tainted parameter flows into $inner's parameter, which
        // then reaches the sink inside $inner
        let config = AnalysisConfig {
            import_as_sources: false,
            import_as_sinks: true,
            tainted: BTreeMap::from([(
                "$outer".to_string(),
                crate::config::TaintedParams { params: vec![0] },
            )]),
            ..AnalysisConfig::default()
        };
        let vulns = run(
            r#"(module
                 (import "env" "write" (func $write (param i32)))
                 (func $inner (param $v i32)
                   local.get $v
                   call $write)
                 (func $outer (param $data i32)
                   local.get $data
                   call $inner))"#,
            &config,
        );
        assert!(vulns.iter().any(|v| v.function == "$inner"
            && v.description
                .as_deref()
                .map_or(false, |d| d.contains("in $outer"))));
    }
}
