//! Graph construction pipeline: AST, then CFG, then PDG

pub mod ast;
pub mod cfg;
pub mod pdg;

pub use ast::{build_ast, AstInfo};
pub use cfg::{build_cfg, CfgInfo};
pub use pdg::build_pdg;

use crate::graph::Graph;
use crate::ir::ModuleIr;

/// Run the full pipeline over a module. `func_filter` restricts
/// construction to a single function by its `$`-prefixed name.
pub fn build_cpg(graph: &mut Graph, module: &ModuleIr, func_filter: Option<&str>) -> AstInfo {
    let ast = build_ast(graph, module, func_filter);
    let cfg = build_cfg(graph, module, &ast, func_filter);
    build_pdg(graph, module, &ast, &cfg, func_filter);
    ast
}
