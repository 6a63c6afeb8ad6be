//! Program-dependence overlay: abstract interpretation over the CFG
//!
//! Every instruction waits until a reach-definition state has arrived on
//! each forward incoming CFG edge, unions them pointwise and runs its
//! transfer function, emitting PDG edges as origin sets are consumed.
//! Loop back edges re-enqueue the header until its merged state stops
//! changing; unions only grow, so the iteration converges.

use crate::builders::ast::AstInfo;
use crate::builders::cfg::CfgInfo;
use crate::graph::{EdgeId, EdgeKind, EdgeType, Graph, InstKind, NodeId, NodeKind, PdgType};
use crate::ir::{ConstValue, FuncIr, ModuleIr};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::rc::Rc;
use tracing::{debug, trace};

pub fn build_pdg(
    graph: &mut Graph,
    module: &ModuleIr,
    ast: &AstInfo,
    cfg: &CfgInfo,
    func_filter: Option<&str>,
) {
    // every labeled CFG edge doubles as a control dependency
    let control_edges: Vec<(NodeId, NodeId, String)> = graph
        .edges()
        .filter(|e| e.edge_type() == EdgeType::Cfg)
        .filter_map(|e| e.label().map(|l| (e.src, e.dst, l.to_string())))
        .collect();
    for (src, dst, label) in control_edges {
        graph.add_edge(src, dst, EdgeKind::pdg(PdgType::Control, label));
    }

    let globals: Vec<String> = module.globals.iter().map(|(n, _)| n.clone()).collect();
    for func in &module.funcs {
        if func.is_import {
            continue;
        }
        if let Some(only) = func_filter {
            if func.name != only {
                continue;
            }
        }
        debug!(name = %func.name, "running reach-definition analysis");
        FunctionPdg {
            graph: &mut *graph,
            back_edges: &cfg.back_edges,
            pending: HashMap::new(),
            loop_states: HashMap::new(),
            worklist: VecDeque::new(),
        }
        .run(func, ast, &globals);
    }
}

/// What one (category, key) pair was last defined by on this path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum DefKey {
    Named { pdg_type: PdgType, name: String },
    Const(ConstValue),
}

/// Set of origin nodes grouped by what they define.
#[derive(Debug, Clone, PartialEq, Default)]
struct Definition {
    defs: BTreeMap<DefKey, BTreeSet<NodeId>>,
}

impl Definition {
    fn insert(&mut self, key: DefKey, node: NodeId) {
        self.defs.entry(key).or_default().insert(node);
    }

    fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    fn union(&mut self, other: &Definition) {
        for (key, nodes) in &other.defs {
            self.defs.entry(key.clone()).or_default().extend(nodes);
        }
    }

    /// Reset every origin set to the given instruction: consumers now
    /// depend on it, under the same keys.
    fn reset_origins(&mut self, node: NodeId) {
        for nodes in self.defs.values_mut() {
            nodes.clear();
            nodes.insert(node);
        }
    }

    /// Materialize one PDG edge per (origin, key) into `target`. The
    /// store deduplicates repeated emissions.
    fn emit(&self, graph: &mut Graph, target: NodeId) {
        for (key, nodes) in &self.defs {
            for node in nodes {
                let kind = match key {
                    DefKey::Named { pdg_type, name } => EdgeKind::pdg(*pdg_type, name.clone()),
                    DefKey::Const(value) => EdgeKind::pdg_const(*value),
                };
                graph.add_edge(*node, target, kind);
            }
        }
    }
}

/// The abstract state at one program point.
#[derive(Debug, Clone, PartialEq, Default)]
struct ReachDef {
    globals: BTreeMap<String, Rc<Definition>>,
    locals: BTreeMap<String, Rc<Definition>>,
    stack: Vec<Rc<Definition>>,
    labels: Vec<(String, usize)>,
}

impl ReachDef {
    fn seed(globals: &[String], func: &FuncIr) -> ReachDef {
        let mut state = ReachDef::default();
        for name in globals {
            state
                .globals
                .insert(name.clone(), Rc::new(Definition::default()));
        }
        for (name, _) in func.params.iter().chain(func.locals.iter()) {
            state
                .locals
                .insert(name.clone(), Rc::new(Definition::default()));
        }
        state
    }

    fn push(&mut self, def: Definition) {
        self.stack.push(Rc::new(def));
    }

    fn push_shared(&mut self, def: Rc<Definition>) {
        self.stack.push(def);
    }

    fn pop(&mut self) -> Rc<Definition> {
        self.stack.pop().expect("value stack underflow at reachable instruction")
    }

    fn peek_mut(&mut self) -> &mut Definition {
        let top = self.stack.last_mut().expect("value stack underflow");
        Rc::make_mut(top)
    }

    fn push_label(&mut self, name: &str) {
        self.labels.push((name.to_string(), self.stack.len()));
    }

    fn pop_label(&mut self, name: &str) {
        if let Some(pos) = self.labels.iter().rposition(|(n, _)| n == name) {
            let depth = self.labels[pos].1;
            self.labels.truncate(pos);
            self.stack.truncate(depth);
        }
    }

    /// Pointwise union; shorter stacks pad with empty definitions so a
    /// join never drops the common prefix.
    fn union(&mut self, other: &ReachDef) {
        for (name, def) in &other.globals {
            match self.globals.get_mut(name) {
                Some(mine) => Rc::make_mut(mine).union(def),
                None => {
                    self.globals.insert(name.clone(), def.clone());
                }
            }
        }
        for (name, def) in &other.locals {
            match self.locals.get_mut(name) {
                Some(mine) => Rc::make_mut(mine).union(def),
                None => {
                    self.locals.insert(name.clone(), def.clone());
                }
            }
        }
        if self.stack.len() != other.stack.len() {
            trace!(
                left = self.stack.len(),
                right = other.stack.len(),
                "stack heights differ at join"
            );
        }
        while self.stack.len() < other.stack.len() {
            self.stack.insert(0, Rc::new(Definition::default()));
        }
        let offset = self.stack.len() - other.stack.len();
        for (i, def) in other.stack.iter().enumerate() {
            Rc::make_mut(&mut self.stack[offset + i]).union(def);
        }
    }
}

struct FunctionPdg<'a> {
    graph: &'a mut Graph,
    back_edges: &'a std::collections::HashSet<EdgeId>,
    /// Queued incoming states, consumed when every forward predecessor
    /// has delivered.
    pending: HashMap<NodeId, Vec<ReachDef>>,
    /// Loop headers: last merged state, compared for convergence.
    loop_states: HashMap<NodeId, ReachDef>,
    worklist: VecDeque<(EdgeId, ReachDef)>,
}

impl<'a> FunctionPdg<'a> {
    fn run(mut self, func: &FuncIr, ast: &AstInfo, globals: &[String]) {
        let holder = ast.instructions[&func.index];
        let state = ReachDef::seed(globals, func);

        let entry: Vec<EdgeId> = self
            .graph
            .out_edges_of(holder, EdgeType::Cfg)
            .map(|e| e.id)
            .collect();
        assert!(entry.len() <= 1, "Instructions holder fans out");
        for edge in entry {
            self.worklist.push_back((edge, state.clone()));
        }

        while let Some((edge, state)) = self.worklist.pop_front() {
            self.deliver(edge, state, func);
        }
    }

    fn forward_in_count(&self, node: NodeId) -> usize {
        self.graph
            .in_edges_of(node, EdgeType::Cfg)
            .filter(|e| !self.back_edges.contains(&e.id))
            .count()
    }

    fn deliver(&mut self, edge: EdgeId, state: ReachDef, func: &FuncIr) {
        let (dst, is_back) = {
            let e = self.graph.edge(edge);
            (e.dst, self.back_edges.contains(&edge))
        };

        if is_back {
            // iterate the loop header until its merged state stabilizes
            let previous = self.loop_states.get(&dst).cloned().unwrap_or_default();
            let mut merged = previous.clone();
            merged.union(&state);
            if merged != previous {
                self.loop_states.insert(dst, merged.clone());
                self.execute(dst, merged, func);
            }
            return;
        }

        let needed = self.forward_in_count(dst);
        let queue = self.pending.entry(dst).or_default();
        queue.push(state);
        if queue.len() < needed {
            return;
        }

        let mut states = self.pending.remove(&dst).unwrap_or_default();
        let mut merged = states.pop().expect("empty state queue");
        for s in &states {
            merged.union(s);
        }
        if self.is_loop_header(dst) {
            // keep whatever a back edge already contributed
            if let Some(prev) = self.loop_states.get(&dst) {
                merged.union(&prev.clone());
            }
            self.loop_states.insert(dst, merged.clone());
        }
        self.execute(dst, merged, func);
    }

    fn is_loop_header(&self, node: NodeId) -> bool {
        matches!(
            &self.graph.node(node).kind,
            NodeKind::Inst(InstKind::Loop { .. })
        )
    }

    /// Run the transfer function and push the result along every outgoing
    /// CFG edge.
    fn execute(&mut self, node: NodeId, state: ReachDef, func: &FuncIr) {
        let state = match self.transfer(node, state, func) {
            Some(state) => state,
            None => return,
        };

        let successors: Vec<EdgeId> = self
            .graph
            .out_edges_of(node, EdgeType::Cfg)
            .map(|e| e.id)
            .collect();
        if let Some((last, rest)) = successors.split_last() {
            for edge in rest {
                self.worklist.push_back((*edge, state.clone()));
            }
            self.worklist.push_back((*last, state));
        }
    }

    fn transfer(&mut self, node: NodeId, mut state: ReachDef, func: &FuncIr) -> Option<ReachDef> {
        let kind = match &self.graph.node(node).kind {
            NodeKind::Inst(inst) => inst.clone(),
            // the Trap node terminates every path into it
            NodeKind::Trap => return None,
            other => panic!("CFG reached non-instruction node {:?}", other),
        };

        match kind {
            InstKind::Nop => {}
            InstKind::Unreachable => return None,
            InstKind::Return => {
                // the canonical sink: the produced value flows in
                if func.nresults() >= 1 && !state.stack.is_empty() {
                    let top = state.stack.last().unwrap().clone();
                    top.emit(self.graph, node);
                }
            }
            InstKind::Drop => {
                state.pop();
            }
            InstKind::Select => {
                let condition = state.pop();
                let val2 = state.pop();
                let val1 = state.pop();
                condition.emit(self.graph, node);
                let mut merged = (*val1).clone();
                merged.union(&val2);
                state.push(merged);
            }
            InstKind::MemorySize => state.push(Definition::default()),
            InstKind::MemoryGrow => {
                let n = state.pop();
                n.emit(self.graph, node);
                state.push(Definition::default());
            }
            InstKind::BrTable => {
                let index = state.pop();
                index.emit(self.graph, node);
            }
            InstKind::Const { value } => {
                let mut def = Definition::default();
                def.insert(DefKey::Const(value), node);
                state.push(def);
            }
            InstKind::Binary { .. } | InstKind::Compare { .. } => {
                let arg1 = state.pop();
                let arg2 = state.pop();
                let mut merged = (*arg1).clone();
                merged.union(&arg2);
                merged.emit(self.graph, node);
                merged.reset_origins(node);
                state.push(merged);
            }
            InstKind::Convert { .. } | InstKind::Unary { .. } => {
                let top = state.stack.last().expect("value stack underflow").clone();
                top.emit(self.graph, node);
                state.peek_mut().reset_origins(node);
            }
            InstKind::Load { .. } => {
                let index = state.pop();
                index.emit(self.graph, node);
                state.push(Definition::default());
            }
            InstKind::Store { .. } => {
                let value = state.pop();
                let index = state.pop();
                value.emit(self.graph, node);
                index.emit(self.graph, node);
            }
            InstKind::Br { .. } => {
                // the jump target normalizes the stack
            }
            InstKind::BrIf { .. } => {
                let condition = state.pop();
                condition.emit(self.graph, node);
            }
            InstKind::LocalGet { label } => {
                let def = state
                    .locals
                    .get(&label)
                    .cloned()
                    .unwrap_or_default();
                state.push_shared(def);
                if state.stack.last().unwrap().is_empty() {
                    // untouched variable: it becomes its own origin
                    state.peek_mut().insert(
                        DefKey::Named {
                            pdg_type: PdgType::Local,
                            name: label.clone(),
                        },
                        node,
                    );
                }
            }
            InstKind::LocalSet { label } => {
                let value = state.pop();
                state.locals.insert(label.clone(), value);
            }
            InstKind::LocalTee { label } => {
                let value = state.pop();
                state.locals.insert(label.clone(), value.clone());
                state.push_shared(value);
            }
            InstKind::GlobalGet { label } => {
                let def = state
                    .globals
                    .get(&label)
                    .cloned()
                    .unwrap_or_default();
                state.push_shared(def);
                if state.stack.last().unwrap().is_empty() {
                    state.peek_mut().insert(
                        DefKey::Named {
                            pdg_type: PdgType::Global,
                            name: label.clone(),
                        },
                        node,
                    );
                }
            }
            InstKind::GlobalSet { label } => {
                let value = state.pop();
                state.globals.insert(label.clone(), value);
            }
            InstKind::Call {
                label,
                nargs,
                nresults,
            } => {
                for _ in 0..nargs {
                    let arg = state.pop();
                    arg.emit(self.graph, node);
                }
                for _ in 0..nresults.min(1) {
                    let mut def = Definition::default();
                    def.insert(
                        DefKey::Named {
                            pdg_type: PdgType::Function,
                            name: label.clone(),
                        },
                        node,
                    );
                    state.push(def);
                }
            }
            InstKind::CallIndirect {
                label,
                nargs,
                nresults,
            } => {
                // the table index rides on top of the arguments
                let index = state.pop();
                index.emit(self.graph, node);
                for _ in 0..nargs {
                    let arg = state.pop();
                    arg.emit(self.graph, node);
                }
                for _ in 0..nresults.min(1) {
                    let mut def = Definition::default();
                    def.insert(
                        DefKey::Named {
                            pdg_type: PdgType::Function,
                            name: label.clone(),
                        },
                        node,
                    );
                    state.push(def);
                }
            }
            InstKind::BeginBlock { label } => {
                state.push_label(&label);
            }
            InstKind::Loop { .. } => {
                // the loop header is a pure join point
            }
            InstKind::Block { label, nresults } => {
                let keep = (nresults as usize).min(state.stack.len());
                let mut results = Vec::with_capacity(keep);
                for _ in 0..keep {
                    results.push(state.pop());
                }
                state.pop_label(&label);
                for def in results.into_iter().rev() {
                    state.push_shared(def);
                }
            }
            InstKind::If { .. } => {
                let condition = state.pop();
                condition.emit(self.graph, node);
            }
        }

        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::ast::build_ast;
    use crate::builders::cfg::build_cfg;
    use crate::frontend::module_from_wat;
    use crate::graph::InstType;

    fn build(wat: &str) -> Graph {
        let module = module_from_wat(wat, true).unwrap();
        let mut graph = Graph::new();
        let ast = build_ast(&mut graph, &module, None);
        let cfg = build_cfg(&mut graph, &module, &ast, None);
        build_pdg(&mut graph, &module, &ast, &cfg, None);
        graph
    }

    fn find_inst(graph: &Graph, ty: InstType) -> NodeId {
        graph.nodes().find(|n| n.is_inst(ty)).unwrap().id
    }

    #[test]
    fn test_const_flows_into_consumer() {
        let graph = build(
            r#"(module
                 (func $f (result i32)
                   i32.const 3
                   i32.const 4
                   i32.add))"#,
        );
        let add = find_inst(&graph, InstType::Binary);
        let const_deps: Vec<u32> = graph
            .in_edges_of(add, EdgeType::Pdg)
            .filter(|e| e.pdg_type() == Some(PdgType::Const))
            .map(|e| e.const_value().unwrap().as_u32().unwrap())
            .collect();
        assert_eq!(const_deps.len(), 2);
        assert!(const_deps.contains(&3));
        assert!(const_deps.contains(&4));
    }

    #[test]
    fn test_local_definition_reaches_use() {
        let graph = build(
            r#"(module
                 (func $f (param $x i32) (result i32)
                   local.get $x
                   local.get $x
                   i32.add))"#,
        );
        let add = find_inst(&graph, InstType::Binary);
        let local_dep = graph
            .in_edges_of(add, EdgeType::Pdg)
            .find(|e| e.pdg_type() == Some(PdgType::Local))
            .expect("missing local dependency");
        assert_eq!(local_dep.label(), Some("$x"));
    }

    #[test]
    fn test_call_result_is_function_dependency() {
        let graph = build(
            r#"(module
                 (import "env" "source" (func $source (result i32)))
                 (import "env" "sink" (func $sink (param i32)))
                 (func $foo
                   call $source
                   call $sink))"#,
        );
        let sink_call = graph
            .nodes()
            .find(|n| n.is_inst(InstType::Call) && n.label() == Some("$sink"))
            .unwrap()
            .id;
        let dep = graph
            .in_edges_of(sink_call, EdgeType::Pdg)
            .find(|e| e.pdg_type() == Some(PdgType::Function))
            .expect("missing function dependency");
        assert_eq!(dep.label(), Some("$source"));
    }

    #[test]
    fn test_control_dependencies_mirror_labeled_cfg_edges() {
        let graph = build(
            r#"(module
                 (func $f
                   i32.const 1
                   (if (then nop))))"#,
        );
        let if_node = find_inst(&graph, InstType::If);
        let control: Vec<_> = graph
            .out_edges_of(if_node, EdgeType::Pdg)
            .filter(|e| e.pdg_type() == Some(PdgType::Control))
            .map(|e| e.label().unwrap().to_string())
            .collect();
        assert!(control.contains(&"true".to_string()));
        assert!(control.contains(&"false".to_string()));
    }

    #[test]
    fn test_loop_fixpoint_converges_and_unions_origins() {
        // x starts at the parameter, is rewritten in the loop body; the
        // use inside the loop must see both origins after iteration
        let graph = build(
            r#"(module
                 (func $f (param $x i32)
                   (loop $l
                     local.get $x
                     i32.const 1
                     i32.add
                     local.set $x
                     local.get $x
                     br_if $l)))"#,
        );
        let brif = find_inst(&graph, InstType::BrIf);
        let deps: Vec<_> = graph
            .in_edges_of(brif, EdgeType::Pdg)
            .filter(|e| e.pdg_type() == Some(PdgType::Local))
            .map(|e| e.label().unwrap().to_string())
            .collect();
        assert!(deps.contains(&"$x".to_string()));
    }

    #[test]
    fn test_store_depends_on_value_and_index() {
        let graph = build(
            r#"(module
                 (memory 1)
                 (func $f (param $p i32) (param $v i32)
                   local.get $p
                   local.get $v
                   i32.store))"#,
        );
        let store = find_inst(&graph, InstType::Store);
        let labels: Vec<_> = graph
            .in_edges_of(store, EdgeType::Pdg)
            .filter(|e| e.pdg_type() == Some(PdgType::Local))
            .map(|e| e.label().unwrap().to_string())
            .collect();
        assert!(labels.contains(&"$p".to_string()));
        assert!(labels.contains(&"$v".to_string()));
    }
}
