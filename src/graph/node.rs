//! Node taxonomy of the Code Property Graph

use crate::ir::{ConstValue, ValueType};
use serde::{Deserialize, Serialize};

/// Coarse node classification, used by filters and serializers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Module,
    Function,
    FunctionSignature,
    Parameters,
    Locals,
    Results,
    Instructions,
    VarNode,
    Instruction,
    Else,
    Trap,
    Start,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Module => "Module",
            NodeType::Function => "Function",
            NodeType::FunctionSignature => "FunctionSignature",
            NodeType::Parameters => "Parameters",
            NodeType::Locals => "Locals",
            NodeType::Results => "Results",
            NodeType::Instructions => "Instructions",
            NodeType::VarNode => "VarNode",
            NodeType::Instruction => "Instruction",
            NodeType::Else => "Else",
            NodeType::Trap => "Trap",
            NodeType::Start => "Start",
        }
    }

    pub fn parse(s: &str) -> Option<NodeType> {
        Some(match s {
            "Module" => NodeType::Module,
            "Function" => NodeType::Function,
            "FunctionSignature" => NodeType::FunctionSignature,
            "Parameters" => NodeType::Parameters,
            "Locals" => NodeType::Locals,
            "Results" => NodeType::Results,
            "Instructions" => NodeType::Instructions,
            "VarNode" => NodeType::VarNode,
            "Instruction" => NodeType::Instruction,
            "Else" => NodeType::Else,
            "Trap" => NodeType::Trap,
            "Start" => NodeType::Start,
            _ => return None,
        })
    }
}

/// Instruction classification, mirroring the WebAssembly opcode taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstType {
    Nop,
    Unreachable,
    Return,
    Drop,
    Select,
    Const,
    Binary,
    Compare,
    Convert,
    Unary,
    Load,
    Store,
    Br,
    BrIf,
    BrTable,
    LocalGet,
    LocalSet,
    LocalTee,
    GlobalGet,
    GlobalSet,
    Call,
    CallIndirect,
    Block,
    Loop,
    BeginBlock,
    If,
    MemorySize,
    MemoryGrow,
}

impl InstType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstType::Nop => "Nop",
            InstType::Unreachable => "Unreachable",
            InstType::Return => "Return",
            InstType::Drop => "Drop",
            InstType::Select => "Select",
            InstType::Const => "Const",
            InstType::Binary => "Binary",
            InstType::Compare => "Compare",
            InstType::Convert => "Convert",
            InstType::Unary => "Unary",
            InstType::Load => "Load",
            InstType::Store => "Store",
            InstType::Br => "Br",
            InstType::BrIf => "BrIf",
            InstType::BrTable => "BrTable",
            InstType::LocalGet => "LocalGet",
            InstType::LocalSet => "LocalSet",
            InstType::LocalTee => "LocalTee",
            InstType::GlobalGet => "GlobalGet",
            InstType::GlobalSet => "GlobalSet",
            InstType::Call => "Call",
            InstType::CallIndirect => "CallIndirect",
            InstType::Block => "Block",
            InstType::Loop => "Loop",
            InstType::BeginBlock => "BeginBlock",
            InstType::If => "If",
            InstType::MemorySize => "MemorySize",
            InstType::MemoryGrow => "MemoryGrow",
        }
    }

    pub fn parse(s: &str) -> Option<InstType> {
        Some(match s {
            "Nop" => InstType::Nop,
            "Unreachable" => InstType::Unreachable,
            "Return" => InstType::Return,
            "Drop" => InstType::Drop,
            "Select" => InstType::Select,
            "Const" => InstType::Const,
            "Binary" => InstType::Binary,
            "Compare" => InstType::Compare,
            "Convert" => InstType::Convert,
            "Unary" => InstType::Unary,
            "Load" => InstType::Load,
            "Store" => InstType::Store,
            "Br" => InstType::Br,
            "BrIf" => InstType::BrIf,
            "BrTable" => InstType::BrTable,
            "LocalGet" => InstType::LocalGet,
            "LocalSet" => InstType::LocalSet,
            "LocalTee" => InstType::LocalTee,
            "GlobalGet" => InstType::GlobalGet,
            "GlobalSet" => InstType::GlobalSet,
            "Call" => InstType::Call,
            "CallIndirect" => InstType::CallIndirect,
            "Block" => InstType::Block,
            "Loop" => InstType::Loop,
            "BeginBlock" => InstType::BeginBlock,
            "If" => InstType::If,
            "MemorySize" => InstType::MemorySize,
            "MemoryGrow" => InstType::MemoryGrow,
            _ => return None,
        })
    }
}

/// Kind-specific payload of an instruction node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstKind {
    Nop,
    Unreachable,
    Return,
    Drop,
    Select,
    MemorySize,
    MemoryGrow,
    BrTable,
    Const { value: ConstValue },
    Binary { opcode: String },
    Compare { opcode: String },
    Convert { opcode: String },
    Unary { opcode: String },
    Load { opcode: String, offset: u32 },
    Store { opcode: String, offset: u32 },
    Br { label: String },
    BrIf { label: String },
    LocalGet { label: String },
    LocalSet { label: String },
    LocalTee { label: String },
    GlobalGet { label: String },
    GlobalSet { label: String },
    Call { label: String, nargs: u32, nresults: u32 },
    CallIndirect { label: String, nargs: u32, nresults: u32 },
    Block { label: String, nresults: u32 },
    Loop { label: String, nresults: u32 },
    BeginBlock { label: String },
    If { nresults: u32, has_else: bool },
}

impl InstKind {
    pub fn inst_type(&self) -> InstType {
        match self {
            InstKind::Nop => InstType::Nop,
            InstKind::Unreachable => InstType::Unreachable,
            InstKind::Return => InstType::Return,
            InstKind::Drop => InstType::Drop,
            InstKind::Select => InstType::Select,
            InstKind::MemorySize => InstType::MemorySize,
            InstKind::MemoryGrow => InstType::MemoryGrow,
            InstKind::BrTable => InstType::BrTable,
            InstKind::Const { .. } => InstType::Const,
            InstKind::Binary { .. } => InstType::Binary,
            InstKind::Compare { .. } => InstType::Compare,
            InstKind::Convert { .. } => InstType::Convert,
            InstKind::Unary { .. } => InstType::Unary,
            InstKind::Load { .. } => InstType::Load,
            InstKind::Store { .. } => InstType::Store,
            InstKind::Br { .. } => InstType::Br,
            InstKind::BrIf { .. } => InstType::BrIf,
            InstKind::LocalGet { .. } => InstType::LocalGet,
            InstKind::LocalSet { .. } => InstType::LocalSet,
            InstKind::LocalTee { .. } => InstType::LocalTee,
            InstKind::GlobalGet { .. } => InstType::GlobalGet,
            InstKind::GlobalSet { .. } => InstType::GlobalSet,
            InstKind::Call { .. } => InstType::Call,
            InstKind::CallIndirect { .. } => InstType::CallIndirect,
            InstKind::Block { .. } => InstType::Block,
            InstKind::Loop { .. } => InstType::Loop,
            InstKind::BeginBlock { .. } => InstType::BeginBlock,
            InstKind::If { .. } => InstType::If,
        }
    }
}

/// The tagged node sum: one variant per node kind, kind-specific fields in
/// the variant. Attribute reads go through [`Node`] accessors so hot paths
/// never downcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Module { name: String },
    Function {
        name: String,
        index: u32,
        nargs: u32,
        nlocals: u32,
        nresults: u32,
        is_import: bool,
        is_export: bool,
    },
    FunctionSignature,
    Parameters,
    Locals,
    Results,
    Instructions,
    Var {
        ty: ValueType,
        index: u32,
        name: String,
    },
    Inst(InstKind),
    Else,
    Trap,
    Start,
}

/// Stable node identity: contiguous from zero, assigned at insertion,
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node: identity plus tagged payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        match &self.kind {
            NodeKind::Module { .. } => NodeType::Module,
            NodeKind::Function { .. } => NodeType::Function,
            NodeKind::FunctionSignature => NodeType::FunctionSignature,
            NodeKind::Parameters => NodeType::Parameters,
            NodeKind::Locals => NodeType::Locals,
            NodeKind::Results => NodeType::Results,
            NodeKind::Instructions => NodeType::Instructions,
            NodeKind::Var { .. } => NodeType::VarNode,
            NodeKind::Inst(_) => NodeType::Instruction,
            NodeKind::Else => NodeType::Else,
            NodeKind::Trap => NodeType::Trap,
            NodeKind::Start => NodeType::Start,
        }
    }

    pub fn inst_type(&self) -> Option<InstType> {
        match &self.kind {
            NodeKind::Inst(inst) => Some(inst.inst_type()),
            _ => None,
        }
    }

    pub fn is_inst(&self, ty: InstType) -> bool {
        self.inst_type() == Some(ty)
    }

    /// Module, Function or Var name.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Module { name } | NodeKind::Var { name, .. } => Some(name),
            NodeKind::Function { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Label of a labeled instruction: branch target, variable binding,
    /// callee or block name.
    pub fn label(&self) -> Option<&str> {
        let inst = match &self.kind {
            NodeKind::Inst(inst) => inst,
            _ => return None,
        };
        match inst {
            InstKind::Br { label }
            | InstKind::BrIf { label }
            | InstKind::LocalGet { label }
            | InstKind::LocalSet { label }
            | InstKind::LocalTee { label }
            | InstKind::GlobalGet { label }
            | InstKind::GlobalSet { label }
            | InstKind::Call { label, .. }
            | InstKind::CallIndirect { label, .. }
            | InstKind::Block { label, .. }
            | InstKind::Loop { label, .. }
            | InstKind::BeginBlock { label } => Some(label),
            _ => None,
        }
    }

    pub fn opcode(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Inst(
                InstKind::Binary { opcode }
                | InstKind::Compare { opcode }
                | InstKind::Convert { opcode }
                | InstKind::Unary { opcode }
                | InstKind::Load { opcode, .. }
                | InstKind::Store { opcode, .. },
            ) => Some(opcode),
            _ => None,
        }
    }

    pub fn index(&self) -> Option<u32> {
        match &self.kind {
            NodeKind::Function { index, .. } | NodeKind::Var { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn nargs(&self) -> Option<u32> {
        match &self.kind {
            NodeKind::Function { nargs, .. } => Some(*nargs),
            NodeKind::Inst(InstKind::Call { nargs, .. })
            | NodeKind::Inst(InstKind::CallIndirect { nargs, .. }) => Some(*nargs),
            _ => None,
        }
    }

    pub fn nlocals(&self) -> Option<u32> {
        match &self.kind {
            NodeKind::Function { nlocals, .. } => Some(*nlocals),
            _ => None,
        }
    }

    pub fn nresults(&self) -> Option<u32> {
        match &self.kind {
            NodeKind::Function { nresults, .. } => Some(*nresults),
            NodeKind::Inst(
                InstKind::Call { nresults, .. }
                | InstKind::CallIndirect { nresults, .. }
                | InstKind::Block { nresults, .. }
                | InstKind::Loop { nresults, .. }
                | InstKind::If { nresults, .. },
            ) => Some(*nresults),
            _ => None,
        }
    }

    pub fn is_import(&self) -> bool {
        matches!(&self.kind, NodeKind::Function { is_import: true, .. })
    }

    pub fn is_export(&self) -> bool {
        matches!(&self.kind, NodeKind::Function { is_export: true, .. })
    }

    pub fn var_type(&self) -> Option<ValueType> {
        match &self.kind {
            NodeKind::Var { ty, .. } => Some(*ty),
            _ => None,
        }
    }

    pub fn const_value(&self) -> Option<ConstValue> {
        match &self.kind {
            NodeKind::Inst(InstKind::Const { value }) => Some(*value),
            _ => None,
        }
    }

    pub fn offset(&self) -> Option<u32> {
        match &self.kind {
            NodeKind::Inst(InstKind::Load { offset, .. } | InstKind::Store { offset, .. }) => {
                Some(*offset)
            }
            _ => None,
        }
    }

    pub fn has_else(&self) -> Option<bool> {
        match &self.kind {
            NodeKind::Inst(InstKind::If { has_else, .. }) => Some(*has_else),
            _ => None,
        }
    }
}
