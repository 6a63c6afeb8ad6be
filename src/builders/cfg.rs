//! Control-flow overlay on the AST instruction nodes
//!
//! A second walk over each function's expression list threads three pieces
//! of state: the previous live instruction, a stack of in-scope branch
//! labels, and the if-branch flag that labels the first edge out of an
//! `if`. Branches resolve against the label stack; the function level
//! itself is a branch target mapped to the canonical Return sink.

use crate::builders::ast::AstInfo;
use crate::frontend::FUNC_LEVEL_LABEL;
use crate::graph::{EdgeId, EdgeKind, EdgeType, Graph, InstType, NodeId};
use crate::ir::{Expr, ExprKind, FuncIr, ModuleIr};
use std::collections::HashSet;
use tracing::debug;

/// Facts the PDG fixpoint needs from CFG construction.
#[derive(Debug, Default)]
pub struct CfgInfo {
    /// Edges that close a loop: branch instruction back to its Loop header.
    pub back_edges: HashSet<EdgeId>,
}

pub fn build_cfg(
    graph: &mut Graph,
    module: &ModuleIr,
    ast: &AstInfo,
    func_filter: Option<&str>,
) -> CfgInfo {
    let mut builder = CfgBuilder {
        graph,
        ast,
        labels: Vec::new(),
        info: CfgInfo::default(),
    };
    for func in &module.funcs {
        if func.is_import {
            continue;
        }
        if let Some(only) = func_filter {
            if func.name != only {
                continue;
            }
        }
        builder.build_function(func);
    }
    builder.info
}

struct CfgBuilder<'a> {
    graph: &'a mut Graph,
    ast: &'a AstInfo,
    /// In-scope branch targets, innermost first: (label, target, is_loop).
    labels: Vec<(String, NodeId, bool)>,
    info: CfgInfo,
}

impl<'a> CfgBuilder<'a> {
    fn build_function(&mut self, func: &FuncIr) {
        let holder = self.ast.instructions[&func.index];
        let sink = self.ast.return_sink[&func.index];
        debug!(name = %func.name, "building CFG");

        self.labels.clear();
        self.labels
            .push((FUNC_LEVEL_LABEL.to_string(), sink, false));

        if let Some(last) = self.construct_list(&func.body, holder, None) {
            self.link(last, sink, None);
        }
        self.labels.pop();
    }

    /// Straight-line edge from `from` to `to`. The edge label comes from
    /// the source node: a BrIf falls through on "false", an If enters a
    /// branch on the carried condition flag.
    fn link(&mut self, from: NodeId, to: NodeId, branch: Option<bool>) {
        let label = if self.graph.node(from).is_inst(InstType::BrIf) {
            Some("false".to_string())
        } else if self.graph.node(from).is_inst(InstType::If) {
            match branch {
                Some(true) => Some("true".to_string()),
                _ => Some("false".to_string()),
            }
        } else {
            None
        };
        self.graph.add_edge(from, to, EdgeKind::Cfg { label });
    }

    fn branch_target(&self, label: &str) -> (NodeId, bool) {
        // innermost scope wins
        for (name, target, is_loop) in self.labels.iter().rev() {
            if name == label {
                return (*target, *is_loop);
            }
        }
        panic!("branch to unknown label {}", label);
    }

    fn branch_edge(&mut self, from: NodeId, label: &str, edge_label: Option<String>) {
        let (target, is_loop) = self.branch_target(label);
        let edge = self
            .graph
            .add_edge(from, target, EdgeKind::Cfg { label: edge_label });
        if is_loop {
            if let Some(edge) = edge {
                self.info.back_edges.insert(edge);
            }
        }
    }

    fn construct_list(
        &mut self,
        exprs: &[Expr],
        mut last: NodeId,
        mut branch: Option<bool>,
    ) -> Option<NodeId> {
        for e in exprs {
            match self.construct_expr(e, last, branch) {
                Some(next) => last = next,
                // no successor: the rest of the list is unreachable
                None => return None,
            }
            branch = None;
        }
        Some(last)
    }

    fn construct_expr(
        &mut self,
        e: &Expr,
        last: NodeId,
        branch: Option<bool>,
    ) -> Option<NodeId> {
        let current = self.ast.expr_nodes[&e.id];

        match &e.kind {
            ExprKind::Br { label } => {
                self.link(last, current, branch);
                self.branch_edge(current, label, None);
                None
            }
            ExprKind::BrIf { label } => {
                self.link(last, current, branch);
                self.branch_edge(current, label, Some("true".to_string()));
                // the "false" edge is the next straight-line step
                Some(current)
            }
            ExprKind::BrTable { targets, default } => {
                self.link(last, current, branch);
                for (i, target) in targets.iter().enumerate() {
                    self.branch_edge(current, target, Some(i.to_string()));
                }
                self.branch_edge(current, default, Some("default".to_string()));
                None
            }
            ExprKind::Unreachable => {
                self.link(last, current, branch);
                let trap = self.graph.trap();
                self.graph.add_edge(current, trap, EdgeKind::Cfg { label: None });
                None
            }
            ExprKind::Return => {
                // `current` is the canonical sink here
                self.link(last, current, branch);
                None
            }
            ExprKind::Block { label, body, .. } => {
                // `current` is the begin-block join node; entry edges flow
                // straight into the body
                self.labels.push((label.clone(), current, false));
                let body_last = self.construct_list(body, last, branch);
                self.labels.pop();
                match body_last {
                    Some(body_last) => {
                        self.link(body_last, current, None);
                        Some(current)
                    }
                    None => {
                        // live only if some branch targeted the join
                        if self.graph.in_edges_of(current, EdgeType::Cfg).next().is_some() {
                            Some(current)
                        } else {
                            None
                        }
                    }
                }
            }
            ExprKind::Loop { label, body, .. } => {
                self.link(last, current, branch);
                self.labels.push((label.clone(), current, true));
                let body_last = self.construct_list(body, current, None);
                self.labels.pop();
                body_last
            }
            ExprKind::If {
                label,
                true_body,
                false_body,
                ..
            } => {
                self.link(last, current, branch);
                let join = self.ast.if_join[&e.id];
                self.labels.push((label.clone(), join, false));

                let true_last = self.construct_list(true_body, current, Some(true));
                if let Some(true_last) = true_last {
                    self.link(true_last, join, Some(true));
                }

                let false_last = if false_body.is_empty() {
                    // condition false skips straight to the join
                    self.link(current, join, Some(false));
                    Some(current)
                } else {
                    let false_last = self.construct_list(false_body, current, Some(false));
                    if let Some(false_last) = false_last {
                        self.link(false_last, join, Some(false));
                    }
                    false_last
                };
                self.labels.pop();

                if true_last.is_none() && false_last.is_none() {
                    if self.graph.in_edges_of(join, EdgeType::Cfg).next().is_some() {
                        Some(join)
                    } else {
                        None
                    }
                } else {
                    Some(join)
                }
            }
            _ => {
                self.link(last, current, branch);
                Some(current)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::ast::build_ast;
    use crate::frontend::module_from_wat;
    use crate::graph::NodeType;

    fn build(wat: &str) -> (Graph, AstInfo, CfgInfo) {
        let module = module_from_wat(wat, true).unwrap();
        let mut graph = Graph::new();
        let ast = build_ast(&mut graph, &module, None);
        let cfg = build_cfg(&mut graph, &module, &ast, None);
        (graph, ast, cfg)
    }

    fn find_inst(graph: &Graph, ty: InstType) -> NodeId {
        graph.nodes().find(|n| n.is_inst(ty)).unwrap().id
    }

    #[test]
    fn test_straight_line_chain() {
        let (graph, ast, _) = build(
            r#"(module
                 (func $f
                   nop
                   nop))"#,
        );
        let holder = ast.instructions[&0];
        let first = graph.child(holder, 0, EdgeType::Cfg).unwrap();
        assert!(graph.node(first).is_inst(InstType::Nop));
        let second = graph
            .out_edges_of(first, EdgeType::Cfg)
            .next()
            .unwrap()
            .dst;
        assert!(graph.node(second).is_inst(InstType::Nop));
        // last live instruction links to the return sink
        let sink = ast.return_sink[&0];
        assert!(graph.out_edges_of(second, EdgeType::Cfg).any(|e| e.dst == sink));
    }

    #[test]
    fn test_brif_has_true_and_false_edges() {
        let (graph, _, _) = build(
            r#"(module
                 (func $f
                   (block $b
                     i32.const 1
                     br_if $b
                     nop)))"#,
        );
        let brif = find_inst(&graph, InstType::BrIf);
        let labels: Vec<_> = graph
            .out_edges_of(brif, EdgeType::Cfg)
            .map(|e| e.label().unwrap().to_string())
            .collect();
        assert_eq!(labels.len(), 2);
        assert!(labels.contains(&"true".to_string()));
        assert!(labels.contains(&"false".to_string()));
    }

    #[test]
    fn test_unreachable_links_to_trap() {
        let (graph, _, _) = build(
            r#"(module
                 (func $f
                   unreachable))"#,
        );
        let unreachable = find_inst(&graph, InstType::Unreachable);
        let out: Vec<_> = graph.out_edges_of(unreachable, EdgeType::Cfg).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(graph.node(out[0].dst).node_type(), NodeType::Trap);
    }

    #[test]
    fn test_code_after_return_is_cfg_orphaned() {
        let (graph, _, _) = build(
            r#"(module
                 (func $f (result i32)
                   i32.const 0
                   return
                   i32.const 1
                   drop))"#,
        );
        let drop = find_inst(&graph, InstType::Drop);
        assert_eq!(graph.in_edges_of(drop, EdgeType::Cfg).count(), 0);
        assert_eq!(graph.out_edges_of(drop, EdgeType::Cfg).count(), 0);
    }

    #[test]
    fn test_loop_branch_is_back_edge() {
        let (graph, _, cfg) = build(
            r#"(module
                 (func $f
                   (loop $l
                     i32.const 1
                     br_if $l)))"#,
        );
        let brif = find_inst(&graph, InstType::BrIf);
        let loop_node = find_inst(&graph, InstType::Loop);
        let back = graph
            .out_edges_of(brif, EdgeType::Cfg)
            .find(|e| e.dst == loop_node)
            .unwrap();
        assert!(cfg.back_edges.contains(&back.id));
    }

    #[test]
    fn test_br_table_edges_carry_indices_and_default() {
        let (graph, _, _) = build(
            r#"(module
                 (func $f
                   (block $a
                     (block $b
                       i32.const 0
                       br_table $a $b $a))))"#,
        );
        let table = find_inst(&graph, InstType::BrTable);
        let mut labels: Vec<_> = graph
            .out_edges_of(table, EdgeType::Cfg)
            .map(|e| e.label().unwrap().to_string())
            .collect();
        labels.sort();
        assert_eq!(labels, vec!["0", "1", "2", "default"]);
    }

    #[test]
    fn test_if_without_else_has_false_edge_to_join() {
        let (graph, _, _) = build(
            r#"(module
                 (func $f
                   i32.const 1
                   (if (then nop))))"#,
        );
        let if_node = find_inst(&graph, InstType::If);
        let labels: Vec<_> = graph
            .out_edges_of(if_node, EdgeType::Cfg)
            .map(|e| e.label().unwrap().to_string())
            .collect();
        assert!(labels.contains(&"true".to_string()));
        assert!(labels.contains(&"false".to_string()));
    }
}
