//! Query-language interpreter
//!
//! A small dynamically-typed language for scripting graph traversals:
//! assignment, `if`/`else`, `foreach`, `return`, attribute access on
//! nodes and edges, and built-ins bridging into the query engine.

pub mod eval;
pub mod lexer;
pub mod parser;
pub mod value;

pub use eval::{Evaluator, Flow};
pub use value::Value;

use crate::checkers::Vulnerability;
use crate::errors::WasmatiResult;
use crate::graph::Graph;

/// Outcome of running a script: final value, printed lines, and any
/// vulnerability records the script emitted.
#[derive(Debug)]
pub struct ScriptResult {
    pub value: Value,
    pub output: Vec<String>,
    pub vulns: Vec<Vulnerability>,
}

/// Parse and evaluate a whole script against a graph.
pub fn run_script(graph: &Graph, source: &str) -> WasmatiResult<ScriptResult> {
    let tokens = lexer::tokenize(source)?;
    let stmts = parser::parse(&tokens)?;
    let mut evaluator = Evaluator::new(graph);
    let value = evaluator.run(&stmts)?;
    Ok(ScriptResult {
        value,
        output: evaluator.output,
        vulns: evaluator.vulns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::build_cpg;
    use crate::frontend::module_from_wat;

    fn graph() -> Graph {
        let module = module_from_wat(
            r#"(module
                 (import "env" "source" (func $source (result i32)))
                 (func $main (export "main")
                   call $source
                   drop))"#,
            true,
        )
        .unwrap();
        let mut graph = Graph::new();
        build_cpg(&mut graph, &module, None);
        graph
    }

    #[test]
    fn test_traversal_script() {
        let graph = graph();
        let result = run_script(
            &graph,
            r#"count = 0;
               foreach f in functions() {
                 if (f.isImport) {
                   print("import:", f.name);
                 } else {
                   count = count + 1;
                 }
               }
               return count;"#,
        )
        .unwrap();
        assert_eq!(result.value, Value::Int(1));
        assert_eq!(result.output, vec!["import: $source".to_string()]);
    }

    #[test]
    fn test_instructions_and_attributes() {
        let graph = graph();
        let result = run_script(
            &graph,
            r#"calls = [];
               foreach f in functions() {
                 foreach i in f.instructions() {
                   if (i.instType == "Call") {
                     calls = calls + [i.label];
                   }
                 }
               }
               return calls;"#,
        )
        .unwrap();
        assert_eq!(
            result.value,
            Value::List(vec![Value::Str("$source".to_string())])
        );
    }

    #[test]
    fn test_script_can_emit_vulnerabilities() {
        let graph = graph();
        let result = run_script(
            &graph,
            r#"foreach f in functions() {
                 if (f.isExport) {
                   vulnerability("Tainted Variable", f.name, "", "exported entry point");
                 }
               }"#,
        )
        .unwrap();
        assert_eq!(result.vulns.len(), 1);
        assert_eq!(result.vulns[0].function, "$main");
    }

    #[test]
    fn test_runtime_error_carries_line() {
        let graph = graph();
        let err = run_script(&graph, "x = 1;\ny = x.name;").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_early_return_stops_iteration() {
        let graph = graph();
        let result = run_script(
            &graph,
            r#"foreach f in functions() {
                 return f.name;
               }"#,
        )
        .unwrap();
        // functions stream is id-ordered; the import comes first
        assert_eq!(result.value, Value::Str("$source".to_string()));
    }
}
