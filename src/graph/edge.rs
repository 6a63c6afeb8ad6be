//! Edge taxonomy: the five graph layers share one edge table

use crate::graph::node::NodeId;
use crate::ir::ConstValue;
use serde::{Deserialize, Serialize};

/// Graph layer of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    /// Structural parent-child, the tree-spanning backbone.
    Ast,
    /// Possible control transfer.
    Cfg,
    /// Data or control dependency.
    Pdg,
    /// Call site to callee function.
    Cg,
    /// Call argument to callee parameter.
    Pg,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Ast => "AST",
            EdgeType::Cfg => "CFG",
            EdgeType::Pdg => "PDG",
            EdgeType::Cg => "CG",
            EdgeType::Pg => "PG",
        }
    }

    pub fn parse(s: &str) -> Option<EdgeType> {
        Some(match s {
            "AST" => EdgeType::Ast,
            "CFG" => EdgeType::Cfg,
            "PDG" => EdgeType::Pdg,
            "CG" => EdgeType::Cg,
            "PG" => EdgeType::Pg,
            _ => return None,
        })
    }

    /// Layer color for DOT visualization.
    pub fn dot_color(&self) -> &'static str {
        match self {
            EdgeType::Ast => "forestgreen",
            EdgeType::Cfg => "red",
            EdgeType::Pdg => "blue",
            EdgeType::Cg => "mediumpurple3",
            EdgeType::Pg => "orange",
        }
    }
}

/// Dependency category of a PDG edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PdgType {
    Local,
    Global,
    Function,
    Control,
    Const,
}

impl PdgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PdgType::Local => "Local",
            PdgType::Global => "Global",
            PdgType::Function => "Function",
            PdgType::Control => "Control",
            PdgType::Const => "Const",
        }
    }

    pub fn parse(s: &str) -> Option<PdgType> {
        Some(match s {
            "Local" => PdgType::Local,
            "Global" => PdgType::Global,
            "Function" => PdgType::Function,
            "Control" => PdgType::Control,
            "Const" => PdgType::Const,
            _ => return None,
        })
    }
}

/// Kind-specific edge payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EdgeKind {
    Ast,
    Cfg { label: Option<String> },
    Pdg {
        pdg_type: PdgType,
        label: String,
        /// Present only for `PdgType::Const`, the captured constant.
        value: Option<ConstValue>,
    },
    Cg,
    Pg,
}

impl EdgeKind {
    pub fn edge_type(&self) -> EdgeType {
        match self {
            EdgeKind::Ast => EdgeType::Ast,
            EdgeKind::Cfg { .. } => EdgeType::Cfg,
            EdgeKind::Pdg { .. } => EdgeType::Pdg,
            EdgeKind::Cg => EdgeType::Cg,
            EdgeKind::Pg => EdgeType::Pg,
        }
    }

    pub fn cfg(label: impl Into<String>) -> EdgeKind {
        EdgeKind::Cfg {
            label: Some(label.into()),
        }
    }

    pub fn pdg(pdg_type: PdgType, label: impl Into<String>) -> EdgeKind {
        EdgeKind::Pdg {
            pdg_type,
            label: label.into(),
            value: None,
        }
    }

    pub fn pdg_const(value: ConstValue) -> EdgeKind {
        EdgeKind::Pdg {
            pdg_type: PdgType::Const,
            label: value.to_string(),
            value: Some(value),
        }
    }
}

/// Stable edge identity in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

/// An edge: endpoints plus tagged payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn edge_type(&self) -> EdgeType {
        self.kind.edge_type()
    }

    /// CFG or PDG label; empty CFG labels read as `None`.
    pub fn label(&self) -> Option<&str> {
        match &self.kind {
            EdgeKind::Cfg { label } => label.as_deref(),
            EdgeKind::Pdg { label, .. } => Some(label),
            _ => None,
        }
    }

    pub fn pdg_type(&self) -> Option<PdgType> {
        match &self.kind {
            EdgeKind::Pdg { pdg_type, .. } => Some(*pdg_type),
            _ => None,
        }
    }

    pub fn const_value(&self) -> Option<ConstValue> {
        match &self.kind {
            EdgeKind::Pdg { value, .. } => *value,
            _ => None,
        }
    }
}
