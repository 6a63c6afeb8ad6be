//! In-memory module IR handed to the graph builders
//!
//! The frontend (wasmparser/wat) produces this structured form: one typed
//! expression tree per function, with branch targets resolved to label
//! names. Builders never see the wire format.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric value type of a parameter, local, global or constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    pub fn parse(s: &str) -> Option<ValueType> {
        match s {
            "i32" => Some(ValueType::I32),
            "i64" => Some(ValueType::I64),
            "f32" => Some(ValueType::F32),
            "f64" => Some(ValueType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
        };
        f.write_str(s)
    }
}

/// A typed constant. Floats are kept as raw bits so equality and
/// serialization stay total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstValue {
    I32(u32),
    I64(u64),
    F32(u32),
    F64(u64),
}

impl ConstValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ConstValue::I32(_) => ValueType::I32,
            ConstValue::I64(_) => ValueType::I64,
            ConstValue::F32(_) => ValueType::F32,
            ConstValue::F64(_) => ValueType::F64,
        }
    }

    /// The i32 payload, if this is an i32 constant. Checkers compare
    /// allocation sizes and buffer offsets through this.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            ConstValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn parse(ty: ValueType, text: &str) -> Option<ConstValue> {
        match ty {
            ValueType::I32 => text.parse::<u32>().ok().map(ConstValue::I32),
            ValueType::I64 => text.parse::<u64>().ok().map(ConstValue::I64),
            ValueType::F32 => text.parse::<u32>().ok().map(ConstValue::F32),
            ValueType::F64 => text.parse::<u64>().ok().map(ConstValue::F64),
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::I32(v) => write!(f, "{}", v),
            ConstValue::I64(v) => write!(f, "{}", v),
            ConstValue::F32(bits) => write!(f, "{}", bits),
            ConstValue::F64(bits) => write!(f, "{}", bits),
        }
    }
}

/// Identity of an expression within its module, assigned by the frontend.
/// The AST builder keys its expression-to-node side table on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

/// One expression: identity plus shape.
#[derive(Debug, Clone)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
}

/// Structured expression taxonomy. Opcode-bearing variants keep the text
/// mnemonic ("i32.add", "i32.load8_u", ...) exactly as the wire format
/// names it.
#[derive(Debug, Clone)]
pub enum ExprKind {
    Nop,
    Unreachable,
    Return,
    Drop,
    Select,
    MemorySize,
    MemoryGrow,
    Const(ConstValue),
    Binary { opcode: String },
    Compare { opcode: String },
    Convert { opcode: String },
    Unary { opcode: String },
    Load { opcode: String, offset: u32 },
    Store { opcode: String, offset: u32 },
    Br { label: String },
    BrIf { label: String },
    BrTable { targets: Vec<String>, default: String },
    LocalGet { label: String },
    LocalSet { label: String },
    LocalTee { label: String },
    GlobalGet { label: String },
    GlobalSet { label: String },
    Call { label: String, nargs: u32, nresults: u32 },
    CallIndirect { label: String, nargs: u32, nresults: u32 },
    Block { label: String, nresults: u32, body: Vec<Expr> },
    Loop { label: String, nresults: u32, body: Vec<Expr> },
    If {
        label: String,
        nresults: u32,
        true_body: Vec<Expr>,
        false_body: Vec<Expr>,
    },
}

/// Operand arity of an expression: values consumed from the symbolic
/// stack, values produced, and whether execution cannot fall through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub nargs: u32,
    pub nresults: u32,
    pub unreachable: bool,
}

impl Arity {
    const fn new(nargs: u32, nresults: u32) -> Arity {
        Arity {
            nargs,
            nresults,
            unreachable: false,
        }
    }

    const fn dead_end(nargs: u32) -> Arity {
        Arity {
            nargs,
            nresults: 0,
            unreachable: true,
        }
    }
}

impl Expr {
    /// Stack arity of this expression.
    ///
    /// `Return` drains at most one declared result; multi-value functions
    /// are not modelled (the builder asserts `nresults <= 1` upstream).
    pub fn arity(&self, func_nresults: u32) -> Arity {
        match &self.kind {
            ExprKind::Nop => Arity::new(0, 0),
            ExprKind::Unreachable => Arity::dead_end(0),
            ExprKind::Return => Arity::dead_end(func_nresults.min(1)),
            ExprKind::Drop => Arity::new(1, 0),
            ExprKind::Select => Arity::new(3, 1),
            ExprKind::MemorySize => Arity::new(0, 1),
            ExprKind::MemoryGrow => Arity::new(1, 1),
            ExprKind::Const(_) => Arity::new(0, 1),
            ExprKind::Binary { .. } | ExprKind::Compare { .. } => Arity::new(2, 1),
            ExprKind::Convert { .. } | ExprKind::Unary { .. } => Arity::new(1, 1),
            ExprKind::Load { .. } => Arity::new(1, 1),
            ExprKind::Store { .. } => Arity::new(2, 0),
            ExprKind::Br { .. } => Arity::dead_end(0),
            ExprKind::BrIf { .. } => Arity::new(1, 0),
            ExprKind::BrTable { .. } => Arity::dead_end(1),
            ExprKind::LocalGet { .. } | ExprKind::GlobalGet { .. } => Arity::new(0, 1),
            ExprKind::LocalSet { .. } | ExprKind::GlobalSet { .. } => Arity::new(1, 0),
            ExprKind::LocalTee { .. } => Arity::new(1, 1),
            ExprKind::Call { nargs, nresults, .. } => Arity::new(*nargs, *nresults),
            ExprKind::CallIndirect { nargs, nresults, .. } => {
                // the table index rides on top of the regular arguments
                Arity::new(*nargs + 1, *nresults)
            }
            ExprKind::Block { nresults, .. } | ExprKind::Loop { nresults, .. } => {
                Arity::new(0, *nresults)
            }
            ExprKind::If { nresults, .. } => Arity::new(0, *nresults),
        }
    }
}

/// A function: signature, bindings and body.
#[derive(Debug, Clone)]
pub struct FuncIr {
    /// Source-style name, always `$`-prefixed ("$main", "$f12").
    pub name: String,
    /// Function index in module order (imports first).
    pub index: u32,
    /// Parameter bindings in declaration order.
    pub params: Vec<(String, ValueType)>,
    /// Non-parameter locals in declaration order.
    pub locals: Vec<(String, ValueType)>,
    pub results: Vec<ValueType>,
    pub is_import: bool,
    pub is_export: bool,
    /// Empty for imports.
    pub body: Vec<Expr>,
}

impl FuncIr {
    pub fn nargs(&self) -> u32 {
        self.params.len() as u32
    }

    pub fn nlocals(&self) -> u32 {
        (self.params.len() + self.locals.len()) as u32
    }

    pub fn nresults(&self) -> u32 {
        self.results.len() as u32
    }
}

/// A validated module ready for graph construction.
#[derive(Debug, Clone, Default)]
pub struct ModuleIr {
    pub name: Option<String>,
    /// Global bindings ("$g0", ...) in index order.
    pub globals: Vec<(String, ValueType)>,
    pub funcs: Vec<FuncIr>,
    /// Start function index, if the module declares one.
    pub start: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(kind: ExprKind) -> Expr {
        Expr { id: ExprId(0), kind }
    }

    #[test]
    fn test_call_indirect_consumes_table_index() {
        let e = expr(ExprKind::CallIndirect {
            label: "$T0".to_string(),
            nargs: 2,
            nresults: 1,
        });
        assert_eq!(e.arity(0), Arity { nargs: 3, nresults: 1, unreachable: false });
    }

    #[test]
    fn test_return_arity_follows_signature() {
        let e = expr(ExprKind::Return);
        assert_eq!(e.arity(1).nargs, 1);
        assert_eq!(e.arity(0).nargs, 0);
        assert!(e.arity(1).unreachable);
    }

    #[test]
    fn test_const_value_roundtrip() {
        let c = ConstValue::I32(64);
        assert_eq!(c.as_u32(), Some(64));
        assert_eq!(ConstValue::parse(ValueType::I32, &c.to_string()), Some(c));
        assert_eq!(ConstValue::parse(ValueType::F64, "nonsense"), None);
    }
}
