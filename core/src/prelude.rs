use serde::{Deserialize, Serialize};

/// Summary row produced for every scanned frame.
///
/// Every field falls back to zero when the underlying analysis failed, so a
/// scan report always carries exactly one row per processed frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub unit_cell_volume: f64,
    pub mosaicity: f64,
    pub spots_good: usize,
    pub spots_total: usize,
    pub resolution_one: f64,
    pub resolution_two: f64,
    pub saturation: f64,
}

/// Common error type for the reduction core.
#[derive(thiserror::Error, Debug)]
pub enum ReduceError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("unsupported tool version: {0}")]
    Version(String),
    #[error("malformed tool output: {0}")]
    OutputParse(String),
    #[error("filename not understood as a template: {0}")]
    Template(String),
    #[error("number does not fit template: {0}")]
    Range(String),
    #[error("driver protocol misuse: {0}")]
    State(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

pub type ReduceResult<T> = Result<T, ReduceError>;
