use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A parse routine's typed failure. It travels back to the orchestrator inside
/// the import result message, so it has to be plain serializable data.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}{}", location(.line, .col))]
pub struct ParseFailure {
    pub message: String,
    pub line: Option<usize>,
    pub col: Option<usize>,
}

impl ParseFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), line: None, col: None }
    }
    pub fn at_line(message: impl Into<String>, line: usize) -> Self {
        Self { message: message.into(), line: Some(line), col: None }
    }
}

fn location(line: &Option<usize>, col: &Option<usize>) -> String {
    match (*line, *col) {
        (Some(l), Some(c)) => format!(" (line {l}, column {c})"),
        (Some(l), None) => format!(" (line {l})"),
        _ => String::new(),
    }
}

#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Parse error in {path}: {failure}")]
    Parse { path: String, failure: ParseFailure },
    #[error("Unknown transfer tag: {tag}")]
    EncodingMismatch { tag: String },
    #[error("Malformed '{tag}' encoding: {message}")]
    MalformedEncoding { tag: String, message: String },
    #[error("Value nests deeper than {limit} levels")]
    DepthExceeded { limit: usize },
    #[error("Import pool is closed")]
    PoolClosed,
    #[error("Import of {path} was abandoned")]
    Abandoned { path: String },
    #[error("Import of {path} timed out after {millis} ms")]
    Timeout { path: String, millis: u64 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StrataError>;

impl From<config::ConfigError> for StrataError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
