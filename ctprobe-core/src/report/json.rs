use std::io::{self, Write};

use super::{FunctionSummary, ReportError, Reporter};

/// Writes the summaries as a pretty-printed JSON array on stdout.
#[derive(Debug, Clone, Default)]
pub struct JsonReporter;

impl JsonReporter {
    pub fn new() -> Self {
        Self
    }

    fn write_to(&self, writer: &mut impl Write, results: &[FunctionSummary]) -> Result<(), ReportError> {
        serde_json::to_writer_pretty(&mut *writer, results)?;
        writeln!(writer)?;
        Ok(())
    }
}

impl Reporter for JsonReporter {
    fn report(&self, results: &[FunctionSummary]) -> Result<(), ReportError> {
        let stdout = io::stdout();
        let mut writer = stdout.lock();
        self.write_to(&mut writer, results)
    }
}
