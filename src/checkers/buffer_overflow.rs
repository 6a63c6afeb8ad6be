//! Buffer-overflow detectors
//!
//! Four flavors: shadow-stack buffers with constant sink sizes, heap
//! buffers sized by an allocator constant, unbounded writes inside
//! loops, and memcpy-family calls whose source traces to a tainted
//! parameter.

use super::tainted::is_tainted;
use super::{walk_functions, VulnType, Vulnerability};
use crate::config::AnalysisConfig;
use crate::graph::{EdgeType, Graph, InstType, NodeId, PdgType};
use crate::query::{ast_edges, NodeStream, Predicate, Query};
use std::collections::{BTreeMap, BTreeSet};

/// The reserved global addressing the shadow stack.
const STACK_POINTER: &str = "$g0";

pub fn check(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    check_static(query, config, vulns);
    check_malloc(query, config, vulns);
    check_loops(query, config, vulns);
    check_scanf_loops(query, config, vulns);
    check_memcpy(query, config, vulns);
}

/// First constant reaching the node: its own outgoing Const dependency,
/// falling back to an incoming one.
fn const_of(graph: &Graph, node: NodeId) -> Option<u32> {
    graph
        .out_edges_of(node, EdgeType::Pdg)
        .find(|e| e.pdg_type() == Some(PdgType::Const))
        .or_else(|| {
            graph
                .in_edges_of(node, EdgeType::Pdg)
                .find(|e| e.pdg_type() == Some(PdgType::Const))
        })
        .and_then(|e| e.const_value())
        .and_then(|v| v.as_u32())
}

fn has_sp_dependency(graph: &Graph, node: NodeId) -> bool {
    graph
        .in_edges_of(node, EdgeType::Pdg)
        .any(|e| e.pdg_type() == Some(PdgType::Global) && e.label() == Some(STACK_POINTER))
}

fn first_const_in(graph: &Graph, node: NodeId) -> Option<u32> {
    graph
        .in_edges_of(node, EdgeType::Pdg)
        .filter(|e| e.pdg_type() == Some(PdgType::Const))
        .find_map(|e| e.const_value().and_then(|v| v.as_u32()))
}

/// Offset into the shadow-stack frame this add/sub computes, if it is a
/// frame-pointer adjustment at all.
fn buffer_position(graph: &Graph, node: NodeId, total_alloc: u32) -> Option<u32> {
    let n = graph.node(node);
    if !n.is_inst(InstType::Binary) {
        return None;
    }
    let opcode = n.opcode()?;
    let is_add = match opcode {
        "i32.add" => true,
        "i32.sub" => false,
        _ => return None,
    };
    if !has_sp_dependency(graph, node) {
        return None;
    }
    let value = first_const_in(graph, node)? as i32;
    let in_bounds = if is_add { value > 0 } else { value < 0 };
    let magnitude = value.unsigned_abs();
    if !is_add && !in_bounds && magnitude == total_alloc {
        // pointing at the allocation itself
        return Some(0);
    }
    if in_bounds {
        Some(magnitude)
    } else {
        None
    }
}

/// Shadow-stack layout of a function: total allocation plus the offset
/// table derived from `sp + K` computations.
fn buffer_sizes(query: Query, func: NodeId) -> (u32, BTreeMap<u32, u32>) {
    let graph = query.graph();
    let insts = query.instructions(&NodeStream::of(graph, func));

    let frame_edge = |g: &Graph, id: NodeId| {
        g.in_edges_of(id, EdgeType::Pdg)
            .filter(|e| {
                matches!(e.pdg_type(), Some(PdgType::Const))
                    && e.const_value().and_then(|v| v.as_u32()).map_or(false, |v| (v as i32) > 0)
                    || (e.pdg_type() == Some(PdgType::Global) && e.label() == Some(STACK_POINTER))
            })
            .count()
    };

    let allocs = insts.filter(|g, id| {
        g.node(id).is_inst(InstType::Binary)
            && g.node(id).opcode() == Some("i32.sub")
            && frame_edge(g, id) == 2
    });
    if allocs.len() != 1 {
        return (0, BTreeMap::new());
    }
    let alloc = allocs.find_first().unwrap();
    let Some(total) = first_const_in(graph, alloc) else {
        return (0, BTreeMap::new());
    };

    let mut offsets: BTreeSet<u32> = BTreeSet::from([0]);
    let adds = insts.filter(|g, id| {
        if !(g.node(id).is_inst(InstType::Binary) && g.node(id).opcode() == Some("i32.add")) {
            return false;
        }
        let qualified = g
            .in_edges_of(id, EdgeType::Pdg)
            .filter(|e| {
                (e.pdg_type() == Some(PdgType::Const)
                    && e.const_value()
                        .and_then(|v| v.as_u32())
                        .map_or(false, |v| (v as i32) > 0 && v < total))
                    || (e.pdg_type() == Some(PdgType::Global) && e.label() == Some(STACK_POINTER))
            })
            .count();
        qualified == 2
            && NodeStream::of(g, id)
                .bfs(|_, n| n == alloc, crate::query::pdg_edges, 1, true)
                .len()
                == 1
    });
    for add in adds.iter() {
        if let Some(v) = first_const_in(graph, add) {
            if v < total {
                offsets.insert(v);
            }
        }
    }

    let sorted: Vec<u32> = offsets.into_iter().collect();
    let mut buffers = BTreeMap::new();
    for (i, offset) in sorted.iter().enumerate() {
        let size = match sorted.get(i + 1) {
            Some(next) => next - offset,
            None => total - offset,
        };
        buffers.insert(*offset, size);
    }
    (total, buffers)
}

fn check_static(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    if config.buffer_overflow.is_empty() {
        return;
    }
    let graph = query.graph();
    for (func, name) in walk_functions(query, config) {
        let (total, buffers) = buffer_sizes(query, func);

        let calls = query
            .instructions(&NodeStream::of(graph, func))
            .filter_pred(&Predicate::new().inst_type(InstType::Call));
        for call in calls.iter() {
            let Some(callee) = graph.node(call).label().map(str::to_string) else {
                continue;
            };
            let Some(sink) = config.buffer_overflow.get(&callee) else {
                continue;
            };
            let Some(buffer_arg) = graph.child(call, sink.buffer as usize, EdgeType::Ast) else {
                continue;
            };
            let Some(size_index) = sink.size else {
                // a sink with no size argument is unbounded by definition
                vulns.push(Vulnerability::new(
                    VulnType::BufferOverflow,
                    name.clone(),
                    Some(callee),
                    None,
                ));
                continue;
            };
            if buffers.is_empty() {
                continue;
            }
            let Some(limit_arg) = graph.child(call, size_index as usize, EdgeType::Ast) else {
                continue;
            };

            // walk the frame-pointer dependencies back to the add/sub
            // that positioned this buffer
            let position = NodeStream::of(graph, buffer_arg)
                .bfs_includes(
                    |g, id| buffer_position(g, id, total).is_some(),
                    |e| {
                        e.pdg_type() == Some(PdgType::Global)
                            && e.label() == Some(STACK_POINTER)
                    },
                    1,
                    true,
                )
                .find_first()
                .and_then(|id| buffer_position(graph, id, total));
            let Some(position) = position else {
                continue;
            };

            let Some(size_to_write) = graph
                .out_edges_of(limit_arg, EdgeType::Pdg)
                .find(|e| e.pdg_type() == Some(PdgType::Const))
                .and_then(|e| e.const_value())
                .and_then(|v| v.as_u32())
            else {
                continue;
            };

            let total_span = buffers
                .iter()
                .next_back()
                .map(|(offset, size)| offset + size)
                .unwrap_or(total);
            let available = if position < 32 {
                total_span.saturating_sub(position)
            } else {
                buffers.get(&position).copied().unwrap_or(0)
            };
            if size_to_write > available {
                vulns.push(Vulnerability::new(
                    VulnType::BufferOverflow,
                    name.clone(),
                    Some(callee),
                    Some(format!(
                        "buffer @+{} is {} and is expecting {}",
                        position, available, size_to_write
                    )),
                ));
            }
        }
    }
}

/// Resolve a buffer argument to an allocator call and its constant size.
fn verify_malloc_const(query: Query, config: &AnalysisConfig, node: NodeId) -> Option<u32> {
    let graph = query.graph();
    let n = graph.node(node);
    if n.is_inst(InstType::Call)
        && n.label().map_or(false, |l| config.malloc.contains(l))
    {
        return first_const_in(graph, node);
    }

    let edge = graph
        .out_edges_of(node, EdgeType::Pdg)
        .find(|e| {
            e.pdg_type() == Some(PdgType::Function)
                && e.label().map_or(false, |l| config.malloc.contains(l))
        })?;
    let alloc_label = edge.label()?.to_string();
    let alloc_call = NodeStream::of(graph, node)
        .bfs(
            |g, id| {
                g.node(id).is_inst(InstType::Call)
                    && g.node(id).label() == Some(alloc_label.as_str())
            },
            |e| {
                e.pdg_type() == Some(PdgType::Function)
                    && e.label() == Some(alloc_label.as_str())
            },
            1,
            true,
        )
        .find_first()?;
    first_const_in(graph, alloc_call)
}

fn check_malloc(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    if config.buffer_overflow.is_empty() || config.malloc.is_empty() {
        return;
    }
    let graph = query.graph();
    for (func, name) in walk_functions(query, config) {
        let calls = query
            .instructions(&NodeStream::of(graph, func))
            .filter_pred(&Predicate::new().inst_type(InstType::Call));
        for call in calls.iter() {
            let Some(callee) = graph.node(call).label().map(str::to_string) else {
                continue;
            };
            let Some(sink) = config.buffer_overflow.get(&callee) else {
                continue;
            };
            let Some(size_index) = sink.size else {
                continue;
            };
            let Some(buffer_arg) = graph.child(call, sink.buffer as usize, EdgeType::Ast) else {
                continue;
            };
            let Some(size_arg) = graph.child(call, size_index as usize, EdgeType::Ast) else {
                continue;
            };
            let Some(buffer_size) = verify_malloc_const(query, config, buffer_arg) else {
                continue;
            };
            let Some(size_to_write) = const_of(graph, size_arg) else {
                continue;
            };
            if buffer_size < size_to_write {
                vulns.push(Vulnerability::new(
                    VulnType::BufferOverflow,
                    name.clone(),
                    Some(callee),
                    Some(format!(
                        "buffer is {} and is expecting {}",
                        buffer_size, size_to_write
                    )),
                ));
            }
        }
    }
}

fn check_loops(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    let graph = query.graph();
    for (func, name) in walk_functions(query, config) {
        let loops = query
            .instructions(&NodeStream::of(graph, func))
            .filter_pred(&Predicate::new().inst_type(InstType::Loop));
        for loop_node in loops.iter() {
            let loop_label = graph.node(loop_node).label().unwrap_or_default().to_string();
            let insts = NodeStream::of(graph, loop_node).bfs(
                |g, id| g.node(id).node_type() == crate::graph::NodeType::Instruction,
                ast_edges,
                usize::MAX,
                false,
            );

            // locals used as store addresses through `base + offset`
            let mut vars: BTreeSet<String> = BTreeSet::new();
            let pointer_adds = insts
                .filter_pred(&Predicate::new().inst_type(InstType::Store))
                .child(0, EdgeType::Ast)
                .filter_pred(&Predicate::new().inst_type(InstType::Binary).opcode("i32.add"))
                .children(ast_edges)
                .filter_pred(
                    &Predicate::new()
                        .inst_type(InstType::LocalGet)
                        .or()
                        .inst_type(InstType::LocalTee),
                );
            for node in pointer_adds.iter() {
                if let Some(label) = graph.node(node).label() {
                    vars.insert(label.to_string());
                }
            }

            for var in vars {
                let add_children = insts
                    .filter_pred(&Predicate::new().inst_type(InstType::Binary).opcode("i32.add"))
                    .children(ast_edges);
                let walks_pointer = add_children.filter_pred(
                    &Predicate::new()
                        .inst_type(InstType::LocalGet)
                        .label(&var)
                        .or()
                        .inst_type(InstType::LocalTee)
                        .label(&var),
                );
                let with_const = add_children
                    .filter_pred(&Predicate::new().inst_type(InstType::Const));
                if walks_pointer.is_empty() || with_const.is_empty() {
                    continue;
                }

                let bounded = insts
                    .filter_pred(&Predicate::new().inst_type(InstType::BrIf))
                    .child(0, EdgeType::Ast)
                    .filter_pred(&Predicate::new().inst_type(InstType::Compare))
                    .children(ast_edges)
                    .filter_pred(
                        &Predicate::new()
                            .inst_type(InstType::LocalGet)
                            .label(&var)
                            .or()
                            .inst_type(InstType::LocalTee)
                            .label(&var),
                    );
                if bounded.is_empty() {
                    vulns.push(Vulnerability::new(
                        VulnType::BufferOverflow,
                        name.clone(),
                        None,
                        Some(format!(
                            "In loop {}: a buffer is assigned without bound check.",
                            loop_label
                        )),
                    ));
                    break;
                }
            }
        }
    }
}

fn check_scanf_loops(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    let graph = query.graph();
    for (func, name) in walk_functions(query, config) {
        let loops = query
            .instructions(&NodeStream::of(graph, func))
            .filter_pred(&Predicate::new().inst_type(InstType::Loop));
        for loop_node in loops.iter() {
            let loop_label = graph.node(loop_node).label().unwrap_or_default().to_string();
            let insts = NodeStream::of(graph, loop_node).bfs(
                |g, id| g.node(id).node_type() == crate::graph::NodeType::Instruction,
                ast_edges,
                usize::MAX,
                false,
            );

            let scanf_calls = insts.filter(|g, id| {
                g.node(id).is_inst(InstType::Call)
                    && g.node(id).label() == Some("$scanf")
                    && g.child(id, 1, EdgeType::Ast)
                        .map_or(false, |c| g.node(c).is_inst(InstType::LocalGet))
            });
            if scanf_calls.is_empty() {
                continue;
            }

            // variables the scanf destination depends on
            let mut var_depend: BTreeSet<String> = BTreeSet::new();
            for call in scanf_calls.iter() {
                let Some(dest) = graph.child(call, 1, EdgeType::Ast) else {
                    continue;
                };
                for edge in graph.out_edges_of(dest, EdgeType::Pdg) {
                    if matches!(edge.pdg_type(), Some(PdgType::Global) | Some(PdgType::Local)) {
                        if let Some(label) = edge.label() {
                            var_depend.insert(label.to_string());
                        }
                    }
                }
            }

            let brifs = insts.filter(|g, id| {
                if !(g.node(id).is_inst(InstType::BrIf)
                    && g.node(id).label() == Some(loop_label.as_str()))
                {
                    return false;
                }
                match g.child(id, 0, EdgeType::Ast) {
                    Some(child) => {
                        g.node(child).is_inst(InstType::Compare)
                            && g.node(child).opcode() != Some("i32.eq")
                            && g.node(child).opcode() != Some("i32.eqz")
                    }
                    None => false,
                }
            });

            for brif in brifs.iter() {
                let below = NodeStream::of(graph, brif).bfs(
                    |_, _| true,
                    ast_edges,
                    usize::MAX,
                    false,
                );
                let loads = below.filter(|g, id| {
                    g.node(id).is_inst(InstType::Load)
                        && g.in_edges_of(id, EdgeType::Pdg)
                            .any(|e| e.label().map_or(false, |l| var_depend.contains(l)))
                });
                let Some(load) = loads.find_first() else {
                    continue;
                };
                let Some(pointer) = graph.child(load, 0, EdgeType::Ast) else {
                    continue;
                };
                if !graph.node(pointer).is_inst(InstType::LocalGet) {
                    break;
                }
                let Some(compare) = graph.child(brif, 0, EdgeType::Ast) else {
                    continue;
                };
                let Some(sentinel) = first_const_in(graph, compare) else {
                    continue;
                };
                let pointer_label = graph.node(pointer).label().unwrap_or_default();
                vulns.push(Vulnerability::new(
                    VulnType::BufferOverflow,
                    name.clone(),
                    None,
                    Some(format!(
                        "In loop {}: buffer pointed by {} reaches $scanf until *{} = {}",
                        loop_label, pointer_label, pointer_label, sentinel
                    )),
                ));
            }
        }
    }
}

fn check_memcpy(query: Query, config: &AnalysisConfig, vulns: &mut Vec<Vulnerability>) {
    if config.bo_memcpy.is_empty() {
        return;
    }
    let graph = query.graph();
    for (func, name) in walk_functions(query, config) {
        if config.bo_memcpy.contains(&name) {
            continue;
        }
        let calls = query
            .instructions(&NodeStream::of(graph, func))
            .filter(|g, id| {
                g.node(id).is_inst(InstType::Call)
                    && g.node(id)
                        .label()
                        .map_or(false, |l| config.bo_memcpy.contains(l))
            });
        for call in calls.iter() {
            let Some(dest) = graph.child(call, 0, EdgeType::Ast) else {
                continue;
            };
            let dest_known = has_sp_dependency(graph, dest)
                || graph
                    .out_edges_of(dest, EdgeType::Pdg)
                    .any(|e| e.pdg_type() == Some(PdgType::Const));
            if !dest_known {
                continue;
            }
            let Some(src) = graph.child(call, 1, EdgeType::Ast) else {
                continue;
            };

            let local_deps: BTreeSet<String> = graph
                .out_edges_of(src, EdgeType::Pdg)
                .chain(graph.in_edges_of(src, EdgeType::Pdg))
                .filter(|e| e.pdg_type() == Some(PdgType::Local))
                .filter_map(|e| e.label().map(str::to_string))
                .collect();

            let params = query.parameters(&NodeStream::of(graph, func));
            for param in params.iter() {
                let Some(param_name) = graph.node(param).name() else {
                    continue;
                };
                if !local_deps.contains(param_name) {
                    continue;
                }
                let mut visited = BTreeSet::new();
                if let Some((tainted_param, via)) = is_tainted(query, config, param, &mut visited)
                {
                    let callee = graph.node(call).label().unwrap_or_default().to_string();
                    vulns.push(Vulnerability::new(
                        VulnType::BufferOverflow,
                        name.clone(),
                        Some(callee),
                        Some(format!(
                            "{} tainted from param {} in {}",
                            param_name, tainted_param, via
                        )),
                    ));
                    break;
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
    fn test_static_shadow_stack_overflow() {
        let vulns = run(
            r#"(module
                 (import "env" "read" (func $read (param i32 i32 i32) (result i32)))
                 (global $g0 (mut i32) (i32.const 65536))
                 (func $f (param $fd i32)
                   (local $sp i32)
                   global.get $g0
                   i32.const 32
                   i32.sub
                   local.set $sp
                   local.get $fd
                   local.get $sp
                   i32.const 0
                   i32.add
                   i32.const 64
                   call $read
                   drop))"#,
        );
        let record = vulns
            .iter()
            .find(|v| v.vuln_type == VulnType::BufferOverflow)
            .expect("missing overflow record");
        assert_eq!(record.function, "$f");
        assert_eq!(
            record.description.as_deref(),
            Some("buffer @+0 is 32 and is expecting 64")
        );
    }

    #[test]
    fn test_write_within_bounds_is_clean() {
        let vulns = run(
            r#"(module
                 (import "env" "read" (func $read (param i32 i32 i32) (result i32)))
                 (global $g0 (mut i32) (i32.const 65536))
                 (func $f (param $fd i32)
                   (local $sp i32)
                   global.get $g0
                   i32.const 32
                   i32.sub
                   local.set $sp
                   local.get $fd
                   local.get $sp
                   i32.const 0
                   i32.add
                   i32.const 16
                   call $read
                   drop))"#,
        );
        assert!(vulns.is_empty());
    }

    #[test]
    fn test_malloc_sized_buffer_overflow() {
        let vulns = run(
            r#"(module
                 (import "env" "read" (func $read (param i32 i32 i32) (result i32)))
                 (import "env" "malloc" (func $malloc (param i32) (result i32)))
                 (func $f (param $fd i32)
                   local.get $fd
                   i32.const 32
                   call $malloc
                   i32.const 128
                   call $read
                   drop))"#,
        );
        let record = vulns
            .iter()
            .find(|v| v.description.as_deref() == Some("buffer is 32 and is expecting 128"))
            .expect("missing malloc overflow record");
        assert_eq!(record.function, "$f");
    }

    #[test]
    fn test_unbounded_pointer_walk_in_loop() {
        let vulns = run(
            r#"(module
                 (memory 1)
                 (func $f (param $p i32)
                   (local $i i32)
                   (loop $l
                     local.get $p
                     local.get $i
                     i32.add
                     i32.const 65
                     i32.store
                     local.get $i
                     i32.const 1
                     i32.add
                     local.set $i
                     br $l)))"#,
        );
        // binary label names are synthesized, so match on the message body
        assert!(vulns.iter().any(|v| v
            .description
            .as_deref()
            .map_or(false, |d| d.ends_with("a buffer is assigned without bound check."))));
    }
}
