use serde::Serialize;
use thiserror::Error;

use crate::verdict::LeakageReport;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Final outcome of testing one function.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionSummary {
    pub name: String,
    /// True when some attempt ended possibly constant time.
    pub constant_time: bool,
    /// Attempts used, including the deciding one.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Verdict of the last attempt.
    pub report: LeakageReport,
}

pub trait Reporter {
    fn report(&self, results: &[FunctionSummary]) -> Result<(), ReportError>;
}

mod json;
mod terminal;
pub use json::JsonReporter;
pub use terminal::TerminalReporter;
