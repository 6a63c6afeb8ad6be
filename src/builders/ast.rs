//! AST construction: module IR to the Module-rooted structural tree
//!
//! Walks each function's expression list with a symbolic operand stack of
//! already-emitted nodes. Operands pop off the stack and attach as AST
//! children in source order; statement-level nodes collect in an orphan
//! list and attach to the enclosing holder. Results flow through one
//! canonical Return sink per function, created at function entry.

use crate::graph::{Graph, InstKind, NodeId, NodeKind, EdgeKind};
use crate::ir::{Expr, ExprId, ExprKind, FuncIr, ModuleIr};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Side tables produced alongside the tree; the CFG and PDG builders and
/// the call-graph overlay all key off these.
#[derive(Debug, Default)]
pub struct AstInfo {
    /// Expression to the Instruction node it produced. `return`
    /// expressions map to the function's canonical Return sink; `block`
    /// expressions map to their begin-block join node.
    pub expr_nodes: HashMap<ExprId, NodeId>,
    /// `if` expression to the begin-block join node of its true branch.
    pub if_join: HashMap<ExprId, NodeId>,
    /// Function index to canonical Return sink.
    pub return_sink: HashMap<u32, NodeId>,
    /// Function index to its Instructions holder.
    pub instructions: HashMap<u32, NodeId>,
    /// Function name to Function node.
    pub funcs_by_name: HashMap<String, NodeId>,
    /// Function index to parameter Var nodes, in parameter order.
    pub params: HashMap<u32, Vec<NodeId>>,
}

pub fn build_ast(graph: &mut Graph, module: &ModuleIr, func_filter: Option<&str>) -> AstInfo {
    let mut builder = AstBuilder {
        graph,
        info: AstInfo::default(),
        calls: Vec::new(),
        func_nresults: 0,
        return_node: None,
    };
    builder.build_module(module, func_filter);
    builder.overlay_call_graph();
    builder.info
}

struct AstBuilder<'a> {
    graph: &'a mut Graph,
    info: AstInfo,
    /// Call instruction nodes with callee label and argument count,
    /// resolved into CG/PG edges once every function exists.
    calls: Vec<(NodeId, String, u32)>,
    func_nresults: u32,
    return_node: Option<NodeId>,
}

impl<'a> AstBuilder<'a> {
    fn build_module(&mut self, module: &ModuleIr, func_filter: Option<&str>) {
        let module_node = self.graph.add_node(NodeKind::Module {
            name: module.name.clone().unwrap_or_default(),
        });

        for func in &module.funcs {
            if let Some(only) = func_filter {
                if func.name != only {
                    continue;
                }
            }
            debug!(name = %func.name, index = func.index, "building function subtree");
            let func_node = self.build_function(func);
            self.graph.add_edge(module_node, func_node, EdgeKind::Ast);

            if module.start == Some(func.index) {
                let start = self.graph.start();
                self.graph.add_edge(module_node, start, EdgeKind::Ast);
                self.graph.add_edge(start, func_node, EdgeKind::Ast);
            }
        }
    }

    fn build_function(&mut self, func: &FuncIr) -> NodeId {
        let func_node = self.graph.add_node(NodeKind::Function {
            name: func.name.clone(),
            index: func.index,
            nargs: func.nargs(),
            nlocals: func.nlocals(),
            nresults: func.nresults(),
            is_import: func.is_import,
            is_export: func.is_export,
        });
        self.info.funcs_by_name.insert(func.name.clone(), func_node);

        let signature = self.graph.add_node(NodeKind::FunctionSignature);
        self.graph.add_edge(func_node, signature, EdgeKind::Ast);

        if !func.params.is_empty() {
            let holder = self.graph.add_node(NodeKind::Parameters);
            self.graph.add_edge(signature, holder, EdgeKind::Ast);
            let mut param_nodes = Vec::with_capacity(func.params.len());
            for (i, (name, ty)) in func.params.iter().enumerate() {
                let var = self.graph.add_node(NodeKind::Var {
                    ty: *ty,
                    index: i as u32,
                    name: name.clone(),
                });
                self.graph.add_edge(holder, var, EdgeKind::Ast);
                param_nodes.push(var);
            }
            self.info.params.insert(func.index, param_nodes);
        }

        if !func.locals.is_empty() {
            let holder = self.graph.add_node(NodeKind::Locals);
            self.graph.add_edge(signature, holder, EdgeKind::Ast);
            for (i, (name, ty)) in func.locals.iter().enumerate() {
                let var = self.graph.add_node(NodeKind::Var {
                    ty: *ty,
                    index: (func.params.len() + i) as u32,
                    name: name.clone(),
                });
                self.graph.add_edge(holder, var, EdgeKind::Ast);
            }
        }

        if !func.results.is_empty() {
            let holder = self.graph.add_node(NodeKind::Results);
            self.graph.add_edge(signature, holder, EdgeKind::Ast);
            for (i, ty) in func.results.iter().enumerate() {
                let var = self.graph.add_node(NodeKind::Var {
                    ty: *ty,
                    index: i as u32,
                    name: String::new(),
                });
                self.graph.add_edge(holder, var, EdgeKind::Ast);
            }
        }

        if func.is_import {
            return func_node;
        }

        let instructions = self.graph.add_node(NodeKind::Instructions);
        self.graph.add_edge(func_node, instructions, EdgeKind::Ast);
        self.info.instructions.insert(func.index, instructions);

        // canonical Return sink, allocated at function entry
        let sink = self.graph.add_node(NodeKind::Inst(InstKind::Return));
        self.info.return_sink.insert(func.index, sink);

        self.func_nresults = func.nresults();
        self.return_node = Some(sink);
        self.construct_list(&func.body, func.nresults(), instructions, true);
        self.return_node = None;

        func_node
    }

    /// Build one expression; operands come off `stack`, statement nodes
    /// land in `orphans`.
    fn construct_expr(&mut self, e: &Expr, stack: &mut Vec<NodeId>, orphans: &mut Vec<NodeId>) {
        let arity = e.arity(self.func_nresults);
        assert!(
            stack.len() >= arity.nargs as usize,
            "operand stack underflow at reachable instruction"
        );
        assert!(arity.nresults <= 1, "multi-value results are not modelled");

        let node = match &e.kind {
            ExprKind::Nop => self.inst(InstKind::Nop),
            ExprKind::Unreachable => self.inst(InstKind::Unreachable),
            ExprKind::Return => self.inst(InstKind::Return),
            ExprKind::Drop => self.inst(InstKind::Drop),
            ExprKind::Select => self.inst(InstKind::Select),
            ExprKind::MemorySize => self.inst(InstKind::MemorySize),
            ExprKind::MemoryGrow => self.inst(InstKind::MemoryGrow),
            ExprKind::BrTable { .. } => self.inst(InstKind::BrTable),
            ExprKind::Const(value) => self.inst(InstKind::Const { value: *value }),
            ExprKind::Binary { opcode } => self.inst(InstKind::Binary {
                opcode: opcode.clone(),
            }),
            ExprKind::Compare { opcode } => self.inst(InstKind::Compare {
                opcode: opcode.clone(),
            }),
            ExprKind::Convert { opcode } => self.inst(InstKind::Convert {
                opcode: opcode.clone(),
            }),
            ExprKind::Unary { opcode } => self.inst(InstKind::Unary {
                opcode: opcode.clone(),
            }),
            ExprKind::Load { opcode, offset } => self.inst(InstKind::Load {
                opcode: opcode.clone(),
                offset: *offset,
            }),
            ExprKind::Store { opcode, offset } => self.inst(InstKind::Store {
                opcode: opcode.clone(),
                offset: *offset,
            }),
            ExprKind::Br { label } => self.inst(InstKind::Br {
                label: label.clone(),
            }),
            ExprKind::BrIf { label } => self.inst(InstKind::BrIf {
                label: label.clone(),
            }),
            ExprKind::LocalGet { label } => self.inst(InstKind::LocalGet {
                label: label.clone(),
            }),
            ExprKind::LocalSet { label } => self.inst(InstKind::LocalSet {
                label: label.clone(),
            }),
            ExprKind::LocalTee { label } => self.inst(InstKind::LocalTee {
                label: label.clone(),
            }),
            ExprKind::GlobalGet { label } => self.inst(InstKind::GlobalGet {
                label: label.clone(),
            }),
            ExprKind::GlobalSet { label } => self.inst(InstKind::GlobalSet {
                label: label.clone(),
            }),
            ExprKind::Call {
                label,
                nargs,
                nresults,
            } => {
                let node = self.inst(InstKind::Call {
                    label: label.clone(),
                    nargs: *nargs,
                    nresults: *nresults,
                });
                self.calls.push((node, label.clone(), *nargs));
                node
            }
            ExprKind::CallIndirect {
                label,
                nargs,
                nresults,
            } => self.inst(InstKind::CallIndirect {
                label: label.clone(),
                nargs: *nargs,
                nresults: *nresults,
            }),
            ExprKind::Block {
                label,
                nresults,
                body,
            } => {
                let node = self.inst(InstKind::Block {
                    label: label.clone(),
                    nresults: *nresults,
                });
                self.construct_list(body, *nresults, node, false);
                let begin = self.inst(InstKind::BeginBlock {
                    label: label.clone(),
                });
                self.info.expr_nodes.insert(e.id, begin);
                // the value node, not the join node, is the operand
                if arity.nresults == 0 {
                    orphans.push(node);
                } else {
                    stack.push(node);
                }
                return;
            }
            ExprKind::Loop {
                label,
                nresults,
                body,
            } => {
                let node = self.inst(InstKind::Loop {
                    label: label.clone(),
                    nresults: *nresults,
                });
                self.info.expr_nodes.insert(e.id, node);
                self.construct_list(body, *nresults, node, false);
                if arity.nresults == 0 {
                    orphans.push(node);
                } else {
                    stack.push(node);
                }
                return;
            }
            ExprKind::If {
                label,
                nresults,
                true_body,
                false_body,
            } => {
                let node = self.inst(InstKind::If {
                    nresults: *nresults,
                    has_else: !false_body.is_empty(),
                });
                self.info.expr_nodes.insert(e.id, node);

                let condition = stack.pop().expect("if condition missing from operand stack");
                self.graph.add_edge(node, condition, EdgeKind::Ast);

                let true_block = self.inst(InstKind::Block {
                    label: label.clone(),
                    nresults: *nresults,
                });
                let begin = self.inst(InstKind::BeginBlock {
                    label: label.clone(),
                });
                self.graph.add_edge(node, true_block, EdgeKind::Ast);
                self.info.if_join.insert(e.id, begin);
                self.construct_list(true_body, *nresults, true_block, false);

                if !false_body.is_empty() {
                    let else_node = self.graph.add_node(NodeKind::Else);
                    self.graph.add_edge(node, else_node, EdgeKind::Ast);
                    self.construct_list(false_body, *nresults, else_node, false);
                }

                if arity.nresults == 0 {
                    orphans.push(node);
                } else {
                    stack.push(node);
                }
                return;
            }
        };

        if matches!(e.kind, ExprKind::Return) {
            // the expression routes through the canonical sink
            let sink = self.return_node.expect("return outside of a function");
            self.info.expr_nodes.insert(e.id, sink);
        } else {
            self.info.expr_nodes.insert(e.id, node);
        }

        // pop operands, attach in source order
        let nargs = arity.nargs as usize;
        let args = stack.split_off(stack.len() - nargs);
        for arg in args {
            self.graph.add_edge(node, arg, EdgeKind::Ast);
        }

        if arity.nresults == 0 || arity.unreachable {
            orphans.push(node);
        } else {
            stack.push(node);
        }
    }

    /// Build a list into `holder`; residual stack entries drain to the
    /// holder when the list ends (feeding the Return sink first at
    /// function level).
    fn construct_list(&mut self, exprs: &[Expr], nresults: u32, holder: NodeId, func_level: bool) {
        let mut stack: Vec<NodeId> = Vec::new();
        let mut orphans: Vec<NodeId> = Vec::new();

        for e in exprs {
            self.construct_expr(e, &mut stack, &mut orphans);
        }

        for orphan in orphans {
            self.graph.add_edge(holder, orphan, EdgeKind::Ast);
        }

        let ends_unreachable = matches!(
            exprs.last().map(|e| &e.kind),
            Some(ExprKind::Unreachable)
        );
        if ends_unreachable && (stack.len() as u32) < nresults {
            // stack underflow relative to declared results is legal here
            while let Some(node) = stack.pop() {
                self.graph.add_edge(holder, node, EdgeKind::Ast);
            }
            if func_level {
                let sink = self.return_node.expect("function body without sink");
                self.graph.add_edge(holder, sink, EdgeKind::Ast);
            }
            return;
        }

        if (stack.len() as u32) < nresults {
            warn!("operand stack short of declared results at block end");
        }
        if func_level {
            let sink = self.return_node.expect("function body without sink");
            if nresults == 1 {
                if let Some(top) = stack.pop() {
                    self.graph.add_edge(sink, top, EdgeKind::Ast);
                }
            }
            while let Some(node) = stack.pop() {
                self.graph.add_edge(holder, node, EdgeKind::Ast);
            }
            self.graph.add_edge(holder, sink, EdgeKind::Ast);
        } else {
            for node in stack {
                self.graph.add_edge(holder, node, EdgeKind::Ast);
            }
        }
    }

    /// CG edges from call sites to callees, PG edges from argument
    /// positions to the callee's parameters.
    fn overlay_call_graph(&mut self) {
        for (call, label, nargs) in std::mem::take(&mut self.calls) {
            let Some(&callee) = self.info.funcs_by_name.get(&label) else {
                continue;
            };
            self.graph.add_edge(call, callee, EdgeKind::Cg);

            let callee_index = match self.graph.node(callee).index() {
                Some(i) => i,
                None => continue,
            };
            if let Some(params) = self.info.params.get(&callee_index) {
                let args: Vec<NodeId> = self
                    .graph
                    .out_edges_of(call, crate::graph::EdgeType::Ast)
                    .take(nargs as usize)
                    .map(|edge| edge.dst)
                    .collect();
                for (arg, param) in args.into_iter().zip(params.iter()) {
                    self.graph.add_edge(arg, *param, EdgeKind::Pg);
                }
            }
        }
    }

    fn inst(&mut self, kind: InstKind) -> NodeId {
        self.graph.add_node(NodeKind::Inst(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::module_from_wat;
    use crate::graph::{EdgeType, InstType, NodeType};

    fn build(wat: &str) -> (Graph, AstInfo) {
        let module = module_from_wat(wat, true).unwrap();
        let mut graph = Graph::new();
        let info = build_ast(&mut graph, &module, None);
        (graph, info)
    }

    #[test]
    fn test_module_is_root_and_functions_hang_off_it() {
        let (graph, info) = build(
            r#"(module
                 (func $a)
                 (func $b))"#,
        );
        let module = graph.module();
        let children: Vec<_> = graph
            .out_edges_of(module, EdgeType::Ast)
            .map(|e| e.dst)
            .collect();
        assert_eq!(children.len(), 2);
        assert!(info.funcs_by_name.contains_key("$a"));
        assert!(info.funcs_by_name.contains_key("$b"));
    }

    #[test]
    fn test_operands_attach_in_source_order() {
        let (graph, _info) = build(
            r#"(module
                 (import "env" "read" (func $read (param i32 i32 i32) (result i32)))
                 (func $f
                   i32.const 10
                   i32.const 20
                   i32.const 30
                   call $read
                   drop))"#,
        );
        let call = graph
            .nodes()
            .find(|n| n.is_inst(InstType::Call))
            .unwrap()
            .id;
        let args: Vec<_> = graph
            .out_edges_of(call, EdgeType::Ast)
            .map(|e| graph.node(e.dst).const_value().unwrap().as_u32().unwrap())
            .collect();
        assert_eq!(args, vec![10, 20, 30]);
    }

    #[test]
    fn test_import_functions_carry_no_instructions() {
        let (graph, info) = build(
            r#"(module
                 (import "env" "g" (func $g))
                 (func $f call $g))"#,
        );
        let import = info.funcs_by_name["$g"];
        let has_instructions = graph
            .out_edges_of(import, EdgeType::Ast)
            .any(|e| graph.node(e.dst).node_type() == NodeType::Instructions);
        assert!(!has_instructions);
        let local = info.funcs_by_name["$f"];
        let has_instructions = graph
            .out_edges_of(local, EdgeType::Ast)
            .any(|e| graph.node(e.dst).node_type() == NodeType::Instructions);
        assert!(has_instructions);
    }

    #[test]
    fn test_call_graph_and_parameter_edges() {
        let (graph, info) = build(
            r#"(module
                 (func $callee (param $x i32) (param $y i32))
                 (func $caller
                   i32.const 1
                   i32.const 2
                   call $callee))"#,
        );
        let call = graph
            .nodes()
            .find(|n| n.is_inst(InstType::Call))
            .unwrap()
            .id;
        let cg: Vec<_> = graph.out_edges_of(call, EdgeType::Cg).collect();
        assert_eq!(cg.len(), 1);
        assert_eq!(cg[0].dst, info.funcs_by_name["$callee"]);

        let params = &info.params[&0];
        for (i, param) in params.iter().enumerate() {
            let arg = graph.child(call, i, EdgeType::Ast).unwrap();
            assert!(graph
                .out_edges_of(arg, EdgeType::Pg)
                .any(|e| e.dst == *param));
        }
    }

    #[test]
    fn test_return_routes_through_canonical_sink() {
        let (graph, info) = build(
            r#"(module
                 (func $f (result i32)
                   i32.const 0
                   return
                   i32.const 1
                   drop))"#,
        );
        let sinks: Vec<_> = graph
            .nodes()
            .filter(|n| n.is_inst(InstType::Return))
            .collect();
        // one canonical sink plus the explicit return expression's node
        assert_eq!(sinks.len(), 2);
        assert!(info.return_sink.contains_key(&0));
    }
}
