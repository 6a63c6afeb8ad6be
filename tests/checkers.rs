//! End-to-end detector scenarios: module text in, typed records out

use wasmati::builders::build_cpg;
use wasmati::config::AnalysisConfig;
use wasmati::frontend::module_from_wat;
use wasmati::{check_vulnerabilities, Graph, VulnType, Vulnerability};

fn analyze(wat: &str, config: &AnalysisConfig) -> Vec<Vulnerability> {
    let module = module_from_wat(wat, true).expect("fixture must parse");
    let mut graph = Graph::new();
    build_cpg(&mut graph, &module, None);
    check_vulnerabilities(&graph, config)
}

fn of_type(vulns: &[Vulnerability], ty: VulnType) -> Vec<&Vulnerability> {
    vulns.iter().filter(|v| v.vuln_type == ty).collect()
}

#[test]
fn unreachable_code_after_return() {
    let vulns = analyze(
        r#"(module
             (func $f (result i32)
               i32.const 0
               return
               i32.const 1
               drop))"#,
        &AnalysisConfig::default(),
    );
    let found = of_type(&vulns, VulnType::Unreachable);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].function, "$f");
}

#[test]
fn tainted_source_to_sink_call() {
    let config = AnalysisConfig::from_json(
        r#"{ "sources": ["$source"], "sinks": ["$sink"] }"#,
    )
    .unwrap();
    let vulns = analyze(
        r#"(module
             (import "env" "source" (func $source (result i32)))
             (import "env" "sink" (func $sink (param i32)))
             (func $foo
               call $source
               call $sink))"#,
        &config,
    );
    let found = of_type(&vulns, VulnType::Tainted);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].function, "$foo");
    assert_eq!(found[0].caller.as_deref(), Some("$sink"));
    assert!(found[0]
        .description
        .as_deref()
        .unwrap()
        .contains("$source"));
}

#[test]
fn format_string_with_loaded_argument() {
    let config = AnalysisConfig::from_json(r#"{ "formatString": { "$printf": 0 } }"#).unwrap();
    let vulns = analyze(
        r#"(module
             (import "env" "printf" (func $printf (param i32) (result i32)))
             (memory 1)
             (func $f (param $fmt i32)
               local.get $fmt
               i32.load
               call $printf
               drop))"#,
        &config,
    );
    let found = of_type(&vulns, VulnType::FormatStrings);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].function, "$f");
    assert_eq!(found[0].caller.as_deref(), Some("$printf"));
}

#[test]
fn static_buffer_overflow_on_shadow_stack() {
    let config = AnalysisConfig::from_json(
        r#"{ "bufferOverflow": { "$read": { "buffer": 1, "size": 2 } } }"#,
    )
    .unwrap();
    let vulns = analyze(
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
        &config,
    );
    let found = of_type(&vulns, VulnType::BufferOverflow);
    assert_eq!(found.len(), 1);
    assert_eq!(
        found[0].description.as_deref(),
        Some("buffer @+0 is 32 and is expecting 64")
    );
}

#[test]
fn use_after_free_on_loaded_pointer() {
    let config = AnalysisConfig::from_json(
        r#"{ "controlFlow": [ { "source": "$malloc", "dest": "$free" } ] }"#,
    )
    .unwrap();
    let vulns = analyze(
        r#"(module
             (import "env" "malloc" (func $malloc (param i32) (result i32)))
             (import "env" "free" (func $free (param i32)))
             (memory 1)
             (func $f
               (local $p i32)
               i32.const 16
               call $malloc
               local.set $p
               local.get $p
               call $free
               local.get $p
               i32.load
               drop))"#,
        &config,
    );
    let found = of_type(&vulns, VulnType::UseAfterFree);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].function, "$f");
    assert_eq!(
        found[0].description.as_deref(),
        Some("Value from call $malloc used after call to $free")
    );
}

#[test]
fn double_free_of_same_allocation() {
    let config = AnalysisConfig::from_json(
        r#"{ "controlFlow": [ { "source": "$malloc", "dest": "$free" } ] }"#,
    )
    .unwrap();
    let vulns = analyze(
        r#"(module
             (import "env" "malloc" (func $malloc (param i32) (result i32)))
             (import "env" "free" (func $free (param i32)))
             (func $f
               (local $p i32)
               i32.const 16
               call $malloc
               local.set $p
               local.get $p
               call $free
               local.get $p
               call $free))"#,
        &config,
    );
    let found = of_type(&vulns, VulnType::DoubleFree);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].caller.as_deref(), Some("$free"));
}

#[test]
fn ignored_functions_are_skipped_by_every_checker() {
    let config = AnalysisConfig::from_json(
        r#"{ "ignore": ["$f"], "sources": ["$source"], "sinks": ["$sink"] }"#,
    )
    .unwrap();
    let vulns = analyze(
        r#"(module
             (import "env" "source" (func $source (result i32)))
             (import "env" "sink" (func $sink (param i32)))
             (func $f (result i32)
               call $source
               call $sink
               i32.const 0
               return
               i32.const 1
               drop))"#,
        &config,
    );
    assert!(vulns.is_empty());
}

#[test]
fn report_serializes_with_documented_field_names() {
    let vulns = analyze(
        r#"(module
             (func $f (result i32)
               i32.const 0
               return
               nop))"#,
        &AnalysisConfig::default(),
    );
    let json = serde_json::to_value(&vulns).unwrap();
    let record = &json.as_array().unwrap()[0];
    assert_eq!(record["type"], "Unreachable");
    assert_eq!(record["function"], "$f");
    assert!(record.get("caller").is_none());
}
