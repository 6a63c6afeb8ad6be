// Wasmati analyzer: module in, vulnerability report and graph dumps out

use anyhow::Result;
use clap::Parser;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use wasmati::builders::{build_ast, build_cfg, build_pdg};
use wasmati::config::AnalysisConfig;
use wasmati::frontend::{self, FrontendOptions};
use wasmati::graph::Graph;
use wasmati::output;
use wasmati::writers::{
    write_graph, CsvWriter, DatalogWriter, DotWriter, EmitOptions, JsonWriter, LayerSet,
};

/// Produce the Code Property Graph of a WebAssembly module and scan it
/// for vulnerabilities.
#[derive(Parser, Debug)]
#[command(name = "wasmati", version, about)]
struct Cli {
    /// Input module (.wasm or .wat)
    input: PathBuf,

    /// Output file for the vulnerability report (stdout by default)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Write the graph in DOT format
    #[arg(short = 'd', long = "dot-output")]
    dot: Option<PathBuf>,

    /// Write the graph as Datalog facts
    #[arg(short = 'g', long = "datalog")]
    datalog: Option<PathBuf>,

    /// Write the graph as a csv zip archive
    #[arg(long = "csv")]
    csv: Option<PathBuf>,

    /// Write the graph as JSON
    #[arg(long = "json")]
    json: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Restrict analysis to a single function
    #[arg(short = 'f', long = "function")]
    function: Option<String>,

    /// Restrict emission to the instructions of a named loop
    #[arg(short = 'l', long = "loop")]
    loop_name: Option<String>,

    /// Verbose construction logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Print timing and memory diagnostics
    #[arg(short = 'i', long = "info")]
    info: bool,

    /// Emit the AST layer
    #[arg(long)]
    ast: bool,
    /// Emit the CFG layer
    #[arg(long)]
    cfg: bool,
    /// Emit the PDG layer
    #[arg(long)]
    pdg: bool,
    /// Emit the call graph layer
    #[arg(long)]
    cg: bool,
    /// Emit the parameter graph layer
    #[arg(long)]
    pg: bool,
    /// Emit every layer
    #[arg(long)]
    all: bool,

    /// Treat the input as text format
    #[arg(long)]
    wat: bool,
    /// Treat the input as binary format
    #[arg(long)]
    wasm: bool,
    /// Skip module validation
    #[arg(long = "no-check")]
    no_check: bool,
}

impl Cli {
    fn layers(&self) -> LayerSet {
        if self.all || !(self.ast || self.cfg || self.pdg || self.cg || self.pg) {
            return LayerSet::all();
        }
        LayerSet {
            ast: self.ast,
            cfg: self.cfg,
            pdg: self.pdg,
            cg: self.cg,
            pg: self.pg,
        }
    }
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

    let opts = FrontendOptions {
        force_wat: cli.wat,
        force_wasm: cli.wasm,
        validate: !cli.no_check,
    };
    let started = Instant::now();
    let module = match frontend::load_module(&cli.input, &opts) {
        Ok(module) => module,
        Err(e) => output::exit_input(&e.to_string()),
    };
    let parse_time = started.elapsed();

    // `$`-prefixed names, matching the graph
    let func_filter = cli.function.as_deref().map(|name| format!("${}", name));
    let loop_filter = cli.loop_name.as_deref().map(|name| format!("${}", name));

    let mut graph = Graph::new();
    let t = Instant::now();
    let ast = build_ast(&mut graph, &module, func_filter.as_deref());
    let ast_time = t.elapsed();
    let t = Instant::now();
    let cfg_info = build_cfg(&mut graph, &module, &ast, func_filter.as_deref());
    let cfg_time = t.elapsed();
    let t = Instant::now();
    build_pdg(&mut graph, &module, &ast, &cfg_info, func_filter.as_deref());
    let pdg_time = t.elapsed();

    let t = Instant::now();
    let vulns = wasmati::check_vulnerabilities(&graph, &config);
    let check_time = t.elapsed();

    let report = serde_json::to_string_pretty(&vulns)?;
    match &cli.output {
        None => println!("{}", report),
        Some(path) => std::fs::write(path, format!("{}\n", report))?,
    }

    let emit = EmitOptions {
        layers: cli.layers(),
        loop_filter,
    };
    if let Some(path) = &cli.dot {
        let mut writer = DotWriter::new();
        write_graph(&mut writer, &graph, &emit)?;
        writer.into_output(File::create(path)?)?;
    }
    if let Some(path) = &cli.datalog {
        let mut writer = DatalogWriter::new();
        write_graph(&mut writer, &graph, &emit)?;
        writer.into_output(File::create(path)?)?;
    }
    if let Some(path) = &cli.json {
        let mut writer = JsonWriter::new();
        write_graph(&mut writer, &graph, &emit)?;
        writer.into_output(File::create(path)?)?;
    }
    if let Some(path) = &cli.csv {
        let mut writer = CsvWriter::new()?;
        write_graph(&mut writer, &graph, &emit)?;
        writer.into_archive(File::create(path)?)?;
    }

    if cli.info {
        output::diag(&format!("parsing: {} ms", parse_time.as_millis()));
        output::diag(&format!("ast: {} ms", ast_time.as_millis()));
        output::diag(&format!("cfg: {} ms", cfg_time.as_millis()));
        output::diag(&format!("pdg: {} ms", pdg_time.as_millis()));
        output::diag(&format!("checkers: {} ms", check_time.as_millis()));
        output::diag(&format!(
            "graph: {} nodes, {} edges, ~{} bytes",
            graph.node_count(),
            graph.edge_count(),
            graph.memory_estimate()
        ));
        let mut out = std::io::stderr();
        writeln!(out, "total: {} ms", started.elapsed().as_millis())?;
    }

    Ok(())
}
