// Wasmati query tool: load a serialized CPG, run scripts or the native
// checker catalog

use anyhow::Result;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;
use wasmati::config::AnalysisConfig;
use wasmati::dsl::{self, Evaluator, Value};
use wasmati::graph::Graph;
use wasmati::output;
use wasmati::readers::read_graph_file;
use wasmati::Vulnerability;

/// Query an imported Code Property Graph.
#[derive(Parser, Debug)]
#[command(name = "wasmati-query", version, about)]
struct Cli {
    /// Serialized graph (zip of csv) to load
    #[arg(short = 'g', long = "graph")]
    graph: Option<PathBuf>,

    /// Query script to run
    #[arg(short = 'q', long = "query")]
    query: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Output file for the vulnerability report (stdout by default)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Interactive mode
    #[arg(short = 'i', long = "interactive")]
    interactive: bool,

    /// Run the built-in checker catalog
    #[arg(long)]
    native: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .init();

    let config = match &cli.config {
        None => AnalysisConfig::default(),
        Some(path) => match AnalysisConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => output::exit_config(&e.to_string()),
        },
    };

    let graph = match &cli.graph {
        Some(path) => {
            let started = Instant::now();
            let graph = match read_graph_file(path) {
                Ok(graph) => graph,
                Err(e) => output::exit_input(&e.to_string()),
            };
            if cli.interactive || cli.verbose {
                println!(
                    "Loaded {} nodes and {} edges in {} ms.",
                    graph.node_count(),
                    graph.edge_count(),
                    started.elapsed().as_millis()
                );
            }
            graph
        }
        None => {
            output::warn("no graph loaded; queries run over an empty graph");
            Graph::new()
        }
    };

    let mut vulns: Vec<Vulnerability> = Vec::new();

    if let Some(path) = &cli.query {
        let source = std::fs::read_to_string(path)?;
        match dsl::run_script(&graph, &source) {
            Ok(result) => {
                for line in &result.output {
                    println!("{}", line);
                }
                if result.value != Value::Nil {
                    println!("{}", result.value);
                }
                vulns.extend(result.vulns);
            }
            Err(e) => output::exit_input(&e.to_string()),
        }
    }

    if cli.native {
        let started = Instant::now();
        vulns.extend(wasmati::check_vulnerabilities(&graph, &config));
        if cli.verbose {
            output::diag(&format!("checkers: {} ms", started.elapsed().as_millis()));
        }
    }

    if cli.interactive {
        repl(&graph)?;
    }

    if cli.native || cli.query.is_some() {
        let report = serde_json::to_string_pretty(&vulns)?;
        match &cli.output {
            None => println!("{}", report),
            Some(path) => std::fs::write(path, format!("{}\n", report))?,
        }
    }

    Ok(())
}

/// Line-oriented REPL over a persistent evaluator.
fn repl(graph: &Graph) -> Result<()> {
    let stdin = std::io::stdin();
    let mut evaluator = Evaluator::new(graph);
    let mut stdout = std::io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        // statements end with ';'; bare expressions are echoed
        let source = if line.ends_with(';') || line.ends_with('}') {
            line.to_string()
        } else {
            format!("{};", line)
        };
        match wasmati::dsl::lexer::tokenize(&source)
            .and_then(|tokens| wasmati::dsl::parser::parse(&tokens))
            .and_then(|stmts| evaluator.run(&stmts))
        {
            Ok(value) => {
                for printed in evaluator.output.drain(..) {
                    println!("{}", printed);
                }
                if value != Value::Nil {
                    println!("{}", value);
                }
            }
            Err(e) => output::error(&e.to_string()),
        }
    }
    Ok(())
}
