use std::io::{self, Write};

use colored::Colorize;

use super::{FunctionSummary, ReportError, Reporter};
use crate::verdict::Verdict;

/// A reporter that prints one table row per tested function.
#[derive(Debug, Clone, Default)]
pub struct TerminalReporter {
    /// Whether to use colors in output (defaults to true).
    use_colors: bool,
}

impl TerminalReporter {
    /// Create a new terminal reporter with default settings.
    pub fn new() -> Self {
        Self { use_colors: true }
    }

    /// Create a terminal reporter with color output disabled.
    pub fn without_colors() -> Self {
        Self { use_colors: false }
    }

    /// Format a sample count in millions, as the progress line does.
    fn format_samples(samples: u64) -> String {
        format!("{:.2} M", samples as f64 / 1e6)
    }

    fn format_t(max_t: f64) -> String {
        if max_t.is_infinite() {
            "inf".to_string()
        } else {
            format!("{:.2}", max_t)
        }
    }

    fn format_needed(samples_to_detect: Option<f64>) -> String {
        match samples_to_detect {
            Some(n) => format!("{:.2e}", n),
            None => "-".to_string(),
        }
    }

    /// Short, fixed-width text for the result column.
    fn result_text(summary: &FunctionSummary) -> &'static str {
        match summary.report.verdict {
            Verdict::PossiblyConstantTime => "constant time?",
            Verdict::ProbablyLeaking => "probably leaks",
            Verdict::DefinitelyLeaking => "leaks",
            Verdict::InsufficientData { .. } => "inconclusive",
        }
    }

    /// Format the result column with appropriate coloring.
    fn format_result(&self, summary: &FunctionSummary) -> String {
        let text = Self::result_text(summary);
        if !self.use_colors {
            return text.to_string();
        }
        match summary.report.verdict {
            Verdict::PossiblyConstantTime => text.green().bold().to_string(),
            Verdict::ProbablyLeaking => text.red().to_string(),
            Verdict::DefinitelyLeaking => text.red().bold().to_string(),
            Verdict::InsufficientData { .. } => text.yellow().to_string(),
        }
    }

    /// Print the table header.
    fn print_header(&self, writer: &mut impl Write) -> io::Result<()> {
        writeln!(writer)?;
        let header = format!(
            "{:<32} {:>10} {:>10} {:>10} {:>12} {:>9} {:>16}",
            "Function", "Samples", "max t", "max tau", "(5/tau)^2", "Attempts", "Result"
        );
        if self.use_colors {
            writeln!(writer, "{}", header.bold())?;
        } else {
            writeln!(writer, "{}", header)?;
        }
        writeln!(writer, "{}", "-".repeat(105))?;
        Ok(())
    }

    /// Print a single function row.
    fn print_row(&self, writer: &mut impl Write, summary: &FunctionSummary) -> io::Result<()> {
        let name = if summary.name.chars().count() > 30 {
            let head: String = summary.name.chars().take(27).collect();
            format!("{}...", head)
        } else {
            summary.name.clone()
        };
        let report = &summary.report;
        let attempts = format!("{}/{}", summary.attempts, summary.max_attempts);

        // Pad by visible width, ANSI escapes would throw off `{:>16}`.
        let result = self.format_result(summary);
        let result_padding = 16_usize.saturating_sub(Self::result_text(summary).len());

        writeln!(
            writer,
            "{:<32} {:>10} {:>10} {:>10.2e} {:>12} {:>9} {:>width$}{}",
            name,
            Self::format_samples(report.samples),
            Self::format_t(report.max_t),
            report.max_tau,
            Self::format_needed(report.samples_to_detect),
            attempts,
            "",
            result,
            width = result_padding,
        )?;
        Ok(())
    }

    /// Print the summary footer.
    fn print_summary(&self, writer: &mut impl Write, results: &[FunctionSummary]) -> io::Result<()> {
        let mut constant = 0;
        let mut leaking = 0;
        let mut inconclusive = 0;

        for summary in results {
            match summary.report.verdict {
                Verdict::PossiblyConstantTime => constant += 1,
                Verdict::ProbablyLeaking | Verdict::DefinitelyLeaking => leaking += 1,
                Verdict::InsufficientData { .. } => inconclusive += 1,
            }
        }

        writeln!(writer)?;
        writeln!(writer, "{}", "-".repeat(105))?;

        let summary_label = "Summary:";
        if self.use_colors {
            write!(writer, "{} ", summary_label.bold())?;
        } else {
            write!(writer, "{} ", summary_label)?;
        }

        let constant_text = format!("{} possibly constant time", constant);
        let leaking_text = format!("{} leaking", leaking);
        let inconclusive_text = format!("{} inconclusive", inconclusive);

        if self.use_colors {
            writeln!(
                writer,
                "{}, {}, {}",
                constant_text.green(),
                leaking_text.red(),
                inconclusive_text.yellow()
            )?;
        } else {
            writeln!(writer, "{}, {}, {}", constant_text, leaking_text, inconclusive_text)?;
        }

        writeln!(writer)?;
        Ok(())
    }
}

impl Reporter for TerminalReporter {
    fn report(&self, results: &[FunctionSummary]) -> Result<(), ReportError> {
        let stdout = io::stdout();
        let mut writer = stdout.lock();

        self.print_header(&mut writer)?;

        for summary in results {
            self.print_row(&mut writer, summary)?;
        }

        self.print_summary(&mut writer, results)?;

        Ok(())
    }
}
