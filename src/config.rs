//! Analysis configuration
//!
//! All keys are validated at load time: unknown keys and type mismatches
//! abort with a message naming the offending field. Function names are
//! `$`-prefixed, matching the graph's naming.

use crate::errors::{WasmatiError, WasmatiResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct AnalysisConfig {
    /// Treat every imported function as a taint source.
    pub import_as_sources: bool,
    /// Treat every imported function as a taint sink.
    pub import_as_sinks: bool,
    /// Treat exported functions' parameters as implicitly tainted.
    pub exported_as_sinks: bool,
    /// Functions skipped by every checker.
    pub ignore: BTreeSet<String>,
    /// Functions removed from the sink set.
    pub white_list: BTreeSet<String>,
    pub sources: BTreeSet<String>,
    pub sinks: BTreeSet<String>,
    /// Explicit per-function tainted parameter indices.
    pub tainted: BTreeMap<String, TaintedParams>,
    /// Argument positions for the buffer-overflow checkers.
    pub buffer_overflow: BTreeMap<String, BufferOverflowSink>,
    /// Memcpy-family functions.
    pub bo_memcpy: BTreeSet<String>,
    /// Functions flagged on any call.
    pub dangerous_functions: BTreeSet<String>,
    /// Format-string argument position per function.
    pub format_string: BTreeMap<String, u32>,
    /// Allocator functions.
    pub malloc: BTreeSet<String>,
    /// Alloc/free-style resource pairs for use-after-free and double-free.
    pub control_flow: Vec<ResourcePair>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaintedParams {
    pub params: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferOverflowSink {
    pub buffer: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourcePair {
    pub source: String,
    pub dest: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let strings = |names: &[&str]| names.iter().map(|s| s.to_string()).collect();
        AnalysisConfig {
            import_as_sources: true,
            import_as_sinks: true,
            exported_as_sinks: false,
            ignore: BTreeSet::new(),
            white_list: BTreeSet::new(),
            sources: BTreeSet::new(),
            sinks: BTreeSet::new(),
            tainted: BTreeMap::new(),
            buffer_overflow: BTreeMap::from([
                (
                    "$read".to_string(),
                    BufferOverflowSink {
                        buffer: 1,
                        size: Some(2),
                    },
                ),
                (
                    "$fgets".to_string(),
                    BufferOverflowSink {
                        buffer: 0,
                        size: Some(1),
                    },
                ),
            ]),
            bo_memcpy: strings(&["$strcpy", "$__stpcpy", "$memcpy"]),
            dangerous_functions: strings(&["$gets", "$strcat"]),
            format_string: BTreeMap::from([
                ("$printf".to_string(), 0),
                ("$iprintf".to_string(), 0),
                ("$fprintf".to_string(), 1),
                ("$sprintf".to_string(), 1),
                ("$snprintf".to_string(), 2),
                ("$vprintf".to_string(), 0),
                ("$vfprintf".to_string(), 1),
                ("$vsprintf".to_string(), 1),
                ("$vsnprintf".to_string(), 2),
                ("$syslog".to_string(), 1),
                ("$vsyslog".to_string(), 1),
            ]),
            malloc: strings(&["$malloc", "$dlmalloc"]),
            control_flow: vec![
                ResourcePair {
                    source: "$malloc".to_string(),
                    dest: "$free".to_string(),
                },
                ResourcePair {
                    source: "$dlmalloc".to_string(),
                    dest: "$dlfree".to_string(),
                },
            ],
        }
    }
}

impl AnalysisConfig {
    pub fn from_json(text: &str) -> WasmatiResult<AnalysisConfig> {
        serde_json::from_str(text)
            .map_err(|e| WasmatiError::config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> WasmatiResult<AnalysisConfig> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_the_catalog() {
        let config = AnalysisConfig::default();
        assert!(config.import_as_sources);
        assert!(config.malloc.contains("$malloc"));
        assert_eq!(config.format_string.get("$printf"), Some(&0));
        assert_eq!(config.control_flow.len(), 2);
    }

    #[test]
    fn test_unknown_key_is_rejected_by_name() {
        let err = AnalysisConfig::from_json(r#"{ "importAsSource": true }"#).unwrap_err();
        assert!(err.to_string().contains("importAsSource"));
    }

    #[test]
    fn test_round_trips_documented_keys() {
        let config = AnalysisConfig::from_json(
            r#"{
                "importAsSources": false,
                "sources": ["$source"],
                "sinks": ["$sink"],
                "tainted": { "$main": { "params": [0, 1] } },
                "bufferOverflow": { "$read": { "buffer": 1, "size": 2 } },
                "controlFlow": [ { "source": "$malloc", "dest": "$free" } ]
            }"#,
        )
        .unwrap();
        assert!(!config.import_as_sources);
        assert!(config.sources.contains("$source"));
        assert_eq!(config.tainted["$main"].params, vec![0, 1]);
        assert_eq!(config.buffer_overflow["$read"].size, Some(2));
        assert_eq!(config.control_flow[0].dest, "$free");
    }

    #[test]
    fn test_type_mismatch_is_a_config_error() {
        let err = AnalysisConfig::from_json(r#"{ "sources": "oops" }"#).unwrap_err();
        assert!(matches!(err, WasmatiError::Config(_)));
    }
}
