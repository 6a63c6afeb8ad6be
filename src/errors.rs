//! Error taxonomy for the library surface
//!
//! Builder invariant violations are deliberately *not* here: a stack
//! underflow at a reachable instruction is an internal bug and panics.

use thiserror::Error;

pub type WasmatiResult<T, E = WasmatiError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum WasmatiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("input error: {0}")]
    Input(String),

    #[error("wasm decode error: {0}")]
    Decode(#[from] wasmparser::BinaryReaderError),

    #[error("wat parse error: {0}")]
    Wat(#[from] wat::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("graph load error: {0}")]
    GraphLoad(String),

    #[error("query error at line {line}: {message}")]
    Query { line: u32, message: String },
}

impl WasmatiError {
    pub fn input(msg: impl Into<String>) -> Self {
        WasmatiError::Input(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        WasmatiError::Config(msg.into())
    }

    pub fn query(line: u32, msg: impl Into<String>) -> Self {
        WasmatiError::Query {
            line,
            message: msg.into(),
        }
    }
}
