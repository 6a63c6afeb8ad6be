//! Native vulnerability checkers
//!
//! Each checker walks the finished graph through the query algebra and
//! appends records to a shared list. A failing pattern in one function
//! never prevents the other functions or checkers from running: all
//! iteration is at function granularity.

mod buffer_overflow;
mod dangerous;
mod format_string;
mod memory;
mod tainted;
mod unreachable;

use crate::config::AnalysisConfig;
use crate::graph::{Graph, NodeId};
use crate::query::Query;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VulnType {
    #[serde(rename = "Unreachable")]
    Unreachable,
    #[serde(rename = "Dangerous Function")]
    DangerousFunction,
    #[serde(rename = "Format Strings")]
    FormatStrings,
    #[serde(rename = "Buffer Overflow")]
    BufferOverflow,
    #[serde(rename = "Tainted Variable")]
    Tainted,
    #[serde(rename = "Use After Free")]
    UseAfterFree,
    #[serde(rename = "Double Free")]
    DoubleFree,
}

/// One finding, serialized into the report array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    #[serde(rename = "type")]
    pub vuln_type: VulnType,
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Vulnerability {
    pub fn new(
        vuln_type: VulnType,
        function: impl Into<String>,
        caller: Option<String>,
        description: Option<String>,
    ) -> Vulnerability {
        Vulnerability {
            vuln_type,
            function: function.into(),
            caller,
            description,
        }
    }
}

/// Run the whole catalog in its fixed order.
pub fn check_vulnerabilities(graph: &Graph, config: &AnalysisConfig) -> Vec<Vulnerability> {
    let query = Query::new(graph);
    let mut vulns = Vec::new();
    unreachable::check(query, config, &mut vulns);
    dangerous::check(query, config, &mut vulns);
    format_string::check(query, config, &mut vulns);
    buffer_overflow::check(query, config, &mut vulns);
    tainted::check(query, config, &mut vulns);
    memory::check(query, config, &mut vulns);
    vulns
}

/// Functions the checkers iterate: name resolved, ignore list applied.
fn walk_functions<'g>(query: Query<'g>, config: &AnalysisConfig) -> Vec<(NodeId, String)> {
    query
        .functions()
        .iter()
        .filter_map(|id| {
            let name = query.graph().node(id).name()?.to_string();
            if config.ignore.contains(&name) {
                None
            } else {
                Some((id, name))
            }
        })
        .collect()
}

/// Configured sources, plus every import when `importAsSources` is set.
fn effective_sources(query: Query, config: &AnalysisConfig) -> BTreeSet<String> {
    let mut sources = config.sources.clone();
    if config.import_as_sources {
        sources.extend(import_names(query));
    }
    sources
}

/// Configured sinks plus imports, with the whitelist removed.
fn effective_sinks(query: Query, config: &AnalysisConfig) -> BTreeSet<String> {
    let mut sinks = config.sinks.clone();
    if config.import_as_sinks {
        sinks.extend(import_names(query));
    }
    for name in &config.white_list {
        sinks.remove(name);
    }
    sinks
}

fn import_names(query: Query) -> BTreeSet<String> {
    query
        .functions()
        .iter()
        .filter(|id| query.graph().node(*id).is_import())
        .filter_map(|id| query.graph().node(id).name().map(str::to_string))
        .collect()
}
