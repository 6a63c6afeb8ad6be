//! Tree-walking evaluator
//!
//! Early exit is the explicit [`Flow`] sum; runtime errors carry the
//! source line. Built-ins bridge straight into the query engine.

use super::parser::{BinOp, Expr, Stmt};
use super::value::Value;
use crate::checkers::{VulnType, Vulnerability};
use crate::errors::{WasmatiError, WasmatiResult};
use crate::graph::{Edge, EdgeType, Graph, NodeId};
use crate::query::{NodeStream, Query};
use std::collections::HashMap;

/// Statement outcome: keep going, or unwind with a value.
pub enum Flow {
    Normal(Value),
    Return(Value),
}

pub struct Evaluator<'g> {
    query: Query<'g>,
    variables: HashMap<String, Value>,
    /// Lines produced by `print`, drained by the host.
    pub output: Vec<String>,
    /// Records produced by `vulnerability`.
    pub vulns: Vec<Vulnerability>,
}

impl<'g> Evaluator<'g> {
    pub fn new(graph: &'g Graph) -> Evaluator<'g> {
        Evaluator {
            query: Query::new(graph),
            variables: HashMap::new(),
            output: Vec::new(),
            vulns: Vec::new(),
        }
    }

    pub fn run(&mut self, stmts: &[Stmt]) -> WasmatiResult<Value> {
        match self.eval_block(stmts)? {
            Flow::Normal(value) | Flow::Return(value) => Ok(value),
        }
    }

    fn eval_block(&mut self, stmts: &[Stmt]) -> WasmatiResult<Flow> {
        let mut last = Value::Nil;
        for stmt in stmts {
            match self.eval_stmt(stmt)? {
                Flow::Normal(value) => last = value,
                ret @ Flow::Return(_) => return Ok(ret),
            }
        }
        Ok(Flow::Normal(last))
    }

    fn eval_stmt(&mut self, stmt: &Stmt) -> WasmatiResult<Flow> {
        match stmt {
            Stmt::Assign { name, value } => {
                let value = self.eval(value)?;
                self.variables.insert(name.clone(), value);
                Ok(Flow::Normal(Value::Nil))
            }
            Stmt::Expr(expr) => Ok(Flow::Normal(self.eval(expr)?)),
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                condition,
                then_body,
                else_body,
            } => {
                let test = self.eval(condition)?;
                match test {
                    Value::Bool(true) => self.eval_block(then_body),
                    Value::Bool(false) => self.eval_block(else_body),
                    other => Err(WasmatiError::query(
                        condition.line(),
                        format!("expected Bool condition, got {}", other.type_name()),
                    )),
                }
            }
            Stmt::Foreach {
                var,
                iterable,
                body,
            } => {
                let items = match self.eval(iterable)? {
                    Value::List(items) => items,
                    other => {
                        return Err(WasmatiError::query(
                            iterable.line(),
                            format!("cannot iterate over {}", other.type_name()),
                        ))
                    }
                };
                for item in items {
                    self.variables.insert(var.clone(), item);
                    if let ret @ Flow::Return(_) = self.eval_block(body)? {
                        return Ok(ret);
                    }
                }
                Ok(Flow::Normal(Value::Nil))
            }
        }
    }

    fn eval(&mut self, expr: &Expr) -> WasmatiResult<Value> {
        match expr {
            Expr::Int(v, _) => Ok(Value::Int(*v)),
            Expr::Float(v, _) => Ok(Value::Float(*v)),
            Expr::Str(v, _) => Ok(Value::Str(v.clone())),
            Expr::Bool(v, _) => Ok(Value::Bool(*v)),
            Expr::Nil(_) => Ok(Value::Nil),
            Expr::List(items, _) => {
                let values = items
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<WasmatiResult<Vec<_>>>()?;
                Ok(Value::List(values))
            }
            Expr::Var(name, line) => self
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| WasmatiError::query(*line, format!("unknown variable {}", name))),
            Expr::Not(inner, line) => match self.eval(inner)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(WasmatiError::query(
                    *line,
                    format!("'not' expects Bool, got {}", other.type_name()),
                )),
            },
            Expr::Neg(inner, line) => match self.eval(inner)? {
                Value::Int(v) => Ok(Value::Int(-v)),
                Value::Float(v) => Ok(Value::Float(-v)),
                other => Err(WasmatiError::query(
                    *line,
                    format!("cannot negate {}", other.type_name()),
                )),
            },
            Expr::Binary {
                op,
                left,
                right,
                line,
            } => self.binary(*op, left, right, *line),
            Expr::Call { name, args, line } => {
                let values = args
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<WasmatiResult<Vec<_>>>()?;
                self.call(name, values, *line)
            }
            Expr::Method {
                target,
                name,
                args,
                line,
            } => {
                let mut values = vec![self.eval(target)?];
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(name, values, *line)
            }
            Expr::Attribute { target, name, line } => {
                let value = self.eval(target)?;
                self.attribute(&value, name, *line)
            }
            Expr::Index {
                target,
                index,
                line,
            } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                match (target, index) {
                    (Value::List(items), Value::Int(i)) => {
                        let i = usize::try_from(i).map_err(|_| {
                            WasmatiError::query(*line, "negative index".to_string())
                        })?;
                        items.get(i).cloned().ok_or_else(|| {
                            WasmatiError::query(*line, format!("index {} out of bounds", i))
                        })
                    }
                    (Value::Map(entries), Value::Str(key)) => {
                        Ok(entries.get(&key).cloned().unwrap_or(Value::Nil))
                    }
                    (target, index) => Err(WasmatiError::query(
                        *line,
                        format!(
                            "cannot index {} with {}",
                            target.type_name(),
                            index.type_name()
                        ),
                    )),
                }
            }
        }
    }

    fn binary(&mut self, op: BinOp, left: &Expr, right: &Expr, line: u32) -> WasmatiResult<Value> {
        // short-circuit forms first
        if op == BinOp::And || op == BinOp::Or {
            let l = match self.eval(left)? {
                Value::Bool(b) => b,
                other => {
                    return Err(WasmatiError::query(
                        line,
                        format!("logic operator expects Bool, got {}", other.type_name()),
                    ))
                }
            };
            if op == BinOp::And && !l {
                return Ok(Value::Bool(false));
            }
            if op == BinOp::Or && l {
                return Ok(Value::Bool(true));
            }
            return match self.eval(right)? {
                Value::Bool(b) => Ok(Value::Bool(b)),
                other => Err(WasmatiError::query(
                    line,
                    format!("logic operator expects Bool, got {}", other.type_name()),
                )),
            };
        }

        let l = self.eval(left)?;
        let r = self.eval(right)?;
        match op {
            BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
            BinOp::NotEq => Ok(Value::Bool(!values_equal(&l, &r))),
            BinOp::In => match (&l, &r) {
                (needle, Value::List(items)) => {
                    Ok(Value::Bool(items.iter().any(|i| values_equal(i, needle))))
                }
                (Value::Str(needle), Value::Str(haystack)) => {
                    Ok(Value::Bool(haystack.contains(needle.as_str())))
                }
                (Value::Str(key), Value::Map(entries)) => {
                    Ok(Value::Bool(entries.contains_key(key)))
                }
                _ => Err(WasmatiError::query(
                    line,
                    format!("'in' cannot test {} in {}", l.type_name(), r.type_name()),
                )),
            },
            BinOp::Add => match (l, r) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
                (Value::List(mut a), Value::List(b)) => {
                    a.extend(b);
                    Ok(Value::List(a))
                }
                (a, b) => numeric(a, b, line).map(|(a, b)| Value::Float(a + b)),
            },
            BinOp::Sub => arith(l, r, line, |a, b| a - b, |a, b| a - b),
            BinOp::Mul => arith(l, r, line, |a, b| a * b, |a, b| a * b),
            BinOp::Div => match (&l, &r) {
                (Value::Int(_), Value::Int(0)) => {
                    Err(WasmatiError::query(line, "division by zero".to_string()))
                }
                _ => arith(l, r, line, |a, b| a / b, |a, b| a / b),
            },
            BinOp::Mod => match (l, r) {
                (Value::Int(_), Value::Int(0)) => {
                    Err(WasmatiError::query(line, "modulo by zero".to_string()))
                }
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a % b)),
                (a, b) => Err(WasmatiError::query(
                    line,
                    format!("'%' expects Int, got {} and {}", a.type_name(), b.type_name()),
                )),
            },
            BinOp::Less | BinOp::LessEq | BinOp::Greater | BinOp::GreaterEq => {
                let (a, b) = numeric(l, r, line)?;
                Ok(Value::Bool(match op {
                    BinOp::Less => a < b,
                    BinOp::LessEq => a <= b,
                    BinOp::Greater => a > b,
                    _ => a >= b,
                }))
            }
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    fn attribute(&self, value: &Value, name: &str, line: u32) -> WasmatiResult<Value> {
        let graph = self.query.graph();
        match value {
            Value::Node(id) => {
                let node = graph.node(*id);
                let result = match name {
                    "id" => Value::Int(node.id.0 as i64),
                    "type" => Value::Str(node.node_type().as_str().to_string()),
                    "instType" => opt_str(node.inst_type().map(|t| t.as_str().to_string())),
                    "name" => opt_str(node.name().map(str::to_string)),
                    "label" => opt_str(node.label().map(str::to_string)),
                    "opcode" => opt_str(node.opcode().map(str::to_string)),
                    "index" => opt_int(node.index()),
                    "nargs" => opt_int(node.nargs()),
                    "nlocals" => opt_int(node.nlocals()),
                    "nresults" => opt_int(node.nresults()),
                    "isImport" => Value::Bool(node.is_import()),
                    "isExport" => Value::Bool(node.is_export()),
                    "offset" => opt_int(node.offset()),
                    "hasElse" => Value::Bool(node.has_else().unwrap_or(false)),
                    "constValue" => match node.const_value() {
                        Some(v) => const_value(v),
                        None => Value::Nil,
                    },
                    other => {
                        return Err(WasmatiError::query(
                            line,
                            format!("Node has no attribute {}", other),
                        ))
                    }
                };
                Ok(result)
            }
            Value::Edge(id) => {
                let edge = graph.edge(*id);
                let result = match name {
                    "src" => Value::Node(edge.src),
                    "dest" => Value::Node(edge.dst),
                    "type" => Value::Str(edge.edge_type().as_str().to_string()),
                    "label" => opt_str(edge.label().map(str::to_string)),
                    "pdgType" => opt_str(edge.pdg_type().map(|t| t.as_str().to_string())),
                    "constValue" => match edge.const_value() {
                        Some(v) => const_value(v),
                        None => Value::Nil,
                    },
                    other => {
                        return Err(WasmatiError::query(
                            line,
                            format!("Edge has no attribute {}", other),
                        ))
                    }
                };
                Ok(result)
            }
            Value::List(items) => match name {
                "size" => Ok(Value::Int(items.len() as i64)),
                other => Err(WasmatiError::query(
                    line,
                    format!("List has no attribute {}", other),
                )),
            },
            Value::Str(s) => match name {
                "size" => Ok(Value::Int(s.len() as i64)),
                other => Err(WasmatiError::query(
                    line,
                    format!("String has no attribute {}", other),
                )),
            },
            Value::Map(entries) => match name {
                "size" => Ok(Value::Int(entries.len() as i64)),
                other => Ok(entries.get(other).cloned().unwrap_or(Value::Nil)),
            },
            other => Err(WasmatiError::query(
                line,
                format!("{} has no attributes", other.type_name()),
            )),
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>, line: u32) -> WasmatiResult<Value> {
        match name {
            "functions" => Ok(nodes_value(&self.query.functions())),
            "module" => Ok(match self.query.graph().module_id() {
                Some(id) => Value::Node(id),
                None => Value::Nil,
            }),
            "instructions" => {
                let funcs = self.node_list(&args, 0, line)?;
                let stream = NodeStream::new(self.query.graph(), funcs);
                Ok(nodes_value(&self.query.instructions(&stream)))
            }
            "parameters" => {
                let funcs = self.node_list(&args, 0, line)?;
                let stream = NodeStream::new(self.query.graph(), funcs);
                Ok(nodes_value(&self.query.parameters(&stream)))
            }
            "children" | "parents" => {
                let node = self.node_arg(&args, 0, line)?;
                let filter = self.edge_type_arg(&args, 1, line)?;
                let stream = NodeStream::of(self.query.graph(), node);
                let matches =
                    move |e: &Edge| filter.map_or(true, |ty| e.edge_type() == ty);
                let result = if name == "children" {
                    stream.children(matches)
                } else {
                    stream.parents(matches)
                };
                Ok(nodes_value(&result))
            }
            "child" => {
                let node = self.node_arg(&args, 0, line)?;
                let index = self.int_arg(&args, 1, line)?;
                let ty = self.edge_type_arg(&args, 2, line)?.unwrap_or(EdgeType::Ast);
                match self.query.graph().child(node, index as usize, ty) {
                    Some(child) => Ok(Value::Node(child)),
                    None => Ok(Value::Nil),
                }
            }
            "inEdges" | "outEdges" => {
                let node = self.node_arg(&args, 0, line)?;
                let filter = self.edge_type_arg(&args, 1, line)?;
                let graph = self.query.graph();
                let edges: Vec<Value> = if name == "inEdges" {
                    graph
                        .in_edges(node)
                        .filter(|e| filter.map_or(true, |ty| e.edge_type() == ty))
                        .map(|e| Value::Edge(e.id))
                        .collect()
                } else {
                    graph
                        .out_edges(node)
                        .filter(|e| filter.map_or(true, |ty| e.edge_type() == ty))
                        .map(|e| Value::Edge(e.id))
                        .collect()
                };
                Ok(Value::List(edges))
            }
            "reaches" => {
                let from = self.node_arg(&args, 0, line)?;
                let to = self.node_arg(&args, 1, line)?;
                let filter = self.edge_type_arg(&args, 2, line)?;
                Ok(Value::Bool(self.query.reaches(from, to, |e: &Edge| {
                    filter.map_or(true, |ty| e.edge_type() == ty)
                })))
            }
            "size" => match args.first() {
                Some(Value::List(items)) => Ok(Value::Int(items.len() as i64)),
                Some(Value::Map(entries)) => Ok(Value::Int(entries.len() as i64)),
                Some(Value::Str(s)) => Ok(Value::Int(s.len() as i64)),
                other => Err(WasmatiError::query(
                    line,
                    format!(
                        "size() expects List, Map or String, got {}",
                        other.map(|v| v.type_name()).unwrap_or("nothing")
                    ),
                )),
            },
            "print" => {
                let text = args
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.output.push(text);
                Ok(Value::Nil)
            }
            "vulnerability" => {
                let kind = match args.first() {
                    Some(Value::Str(s)) => vuln_type(s).ok_or_else(|| {
                        WasmatiError::query(line, format!("unknown vulnerability type {:?}", s))
                    })?,
                    _ => {
                        return Err(WasmatiError::query(
                            line,
                            "vulnerability() expects a type string".to_string(),
                        ))
                    }
                };
                let function = match args.get(1) {
                    Some(Value::Str(s)) => s.clone(),
                    Some(Value::Node(id)) => self
                        .query
                        .graph()
                        .node(*id)
                        .name()
                        .unwrap_or_default()
                        .to_string(),
                    _ => {
                        return Err(WasmatiError::query(
                            line,
                            "vulnerability() expects a function".to_string(),
                        ))
                    }
                };
                let caller = match args.get(2) {
                    Some(Value::Str(s)) if !s.is_empty() => Some(s.clone()),
                    _ => None,
                };
                let description = match args.get(3) {
                    Some(Value::Str(s)) if !s.is_empty() => Some(s.clone()),
                    _ => None,
                };
                self.vulns
                    .push(Vulnerability::new(kind, function, caller, description));
                Ok(Value::Nil)
            }
            other => Err(WasmatiError::query(
                line,
                format!("unknown function {}", other),
            )),
        }
    }

    fn node_arg(&self, args: &[Value], index: usize, line: u32) -> WasmatiResult<NodeId> {
        match args.get(index) {
            Some(Value::Node(id)) => Ok(*id),
            other => Err(WasmatiError::query(
                line,
                format!(
                    "expected Node argument, got {}",
                    other.map(|v| v.type_name()).unwrap_or("nothing")
                ),
            )),
        }
    }

    fn node_list(&self, args: &[Value], index: usize, line: u32) -> WasmatiResult<Vec<NodeId>> {
        match args.get(index) {
            Some(Value::Node(id)) => Ok(vec![*id]),
            Some(Value::List(items)) => items
                .iter()
                .map(|v| match v {
                    Value::Node(id) => Ok(*id),
                    other => Err(WasmatiError::query(
                        line,
                        format!("expected Node in list, got {}", other.type_name()),
                    )),
                })
                .collect(),
            other => Err(WasmatiError::query(
                line,
                format!(
                    "expected Node or List, got {}",
                    other.map(|v| v.type_name()).unwrap_or("nothing")
                ),
            )),
        }
    }

    fn int_arg(&self, args: &[Value], index: usize, line: u32) -> WasmatiResult<i64> {
        match args.get(index) {
            Some(Value::Int(v)) => Ok(*v),
            other => Err(WasmatiError::query(
                line,
                format!(
                    "expected Int argument, got {}",
                    other.map(|v| v.type_name()).unwrap_or("nothing")
                ),
            )),
        }
    }

    fn edge_type_arg(
        &self,
        args: &[Value],
        index: usize,
        line: u32,
    ) -> WasmatiResult<Option<EdgeType>> {
        match args.get(index) {
            None | Some(Value::Nil) => Ok(None),
            Some(Value::Str(s)) => EdgeType::parse(s).map(Some).ok_or_else(|| {
                WasmatiError::query(line, format!("unknown edge type {:?}", s))
            }),
            Some(other) => Err(WasmatiError::query(
                line,
                format!("expected edge type string, got {}", other.type_name()),
            )),
        }
    }
}

fn nodes_value(stream: &NodeStream) -> Value {
    Value::List(stream.iter().map(Value::Node).collect())
}

fn opt_str(value: Option<String>) -> Value {
    value.map(Value::Str).unwrap_or(Value::Nil)
}

fn opt_int(value: Option<u32>) -> Value {
    value.map(|v| Value::Int(v as i64)).unwrap_or(Value::Nil)
}

fn const_value(v: crate::ir::ConstValue) -> Value {
    use crate::ir::ConstValue::*;
    match v {
        I32(x) => Value::Int(x as i64),
        I64(x) => Value::Int(x as i64),
        F32(bits) => Value::Float(f32::from_bits(bits) as f64),
        F64(bits) => Value::Float(f64::from_bits(bits)),
    }
}

fn vuln_type(name: &str) -> Option<VulnType> {
    Some(match name {
        "Unreachable" => VulnType::Unreachable,
        "Dangerous Function" => VulnType::DangerousFunction,
        "Format Strings" => VulnType::FormatStrings,
        "Buffer Overflow" => VulnType::BufferOverflow,
        "Tainted Variable" => VulnType::Tainted,
        "Use After Free" => VulnType::UseAfterFree,
        "Double Free" => VulnType::DoubleFree,
        _ => return None,
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        _ => a == b,
    }
}

fn numeric(a: Value, b: Value, line: u32) -> WasmatiResult<(f64, f64)> {
    let cast = |v: &Value| match v {
        Value::Int(x) => Some(*x as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    };
    match (cast(&a), cast(&b)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(WasmatiError::query(
            line,
            format!(
                "expected numbers, got {} and {}",
                a.type_name(),
                b.type_name()
            ),
        )),
    }
}

fn arith(
    a: Value,
    b: Value,
    line: u32,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> WasmatiResult<Value> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(a, b))),
        (a, b) => numeric(a, b, line).map(|(a, b)| Value::Float(float_op(a, b))),
    }
}
