//! Command-line interface for ctprobe.

use crate::config::Config;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the final report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Terminal,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "ctprobe")]
#[command(about = "Detect timing leakage with fixed-vs-random Welch t-tests")]
#[command(version)]
pub struct Cli {
    /// Function(s) to test (repeatable; all built-ins if omitted)
    #[arg(short, long)]
    pub dut: Vec<String>,

    /// List the available functions and exit
    #[arg(long)]
    pub list: bool,

    /// Trials per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Trials dropped at each end of a batch
    #[arg(long)]
    pub drop_size: Option<usize>,

    /// Attempts per function before giving up
    #[arg(long)]
    pub tries: Option<u32>,

    /// Samples a test needs before it is judged
    #[arg(long)]
    pub enough_measure: Option<u64>,

    /// Seed for input generation and simulated functions
    #[arg(long)]
    pub seed: Option<u64>,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Terminal)]
    pub format: OutputFormat,

    /// Disable colored terminal output
    #[arg(long)]
    pub no_color: bool,

    /// Path to config file (defaults to .ctprobe.toml if present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Verbose output (per-batch progress)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Apply CLI overrides to the configuration.
    ///
    /// CLI arguments take precedence over config file values.
    pub fn apply_to_config(&self, config: &mut Config) {
        if let Some(batch_size) = self.batch_size {
            config.measurement.batch_size = batch_size;
        }

        if let Some(drop_size) = self.drop_size {
            config.measurement.drop_size = drop_size;
        }

        if let Some(tries) = self.tries {
            config.orchestration.test_tries = tries;
        }

        if let Some(enough_measure) = self.enough_measure {
            config.verdict.enough_measure = enough_measure;
        }

        if let Some(seed) = self.seed {
            config.orchestration.seed = Some(seed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_to_config_with_overrides() {
        let cli = Cli::parse_from([
            "ctprobe",
            "--batch-size",
            "10000",
            "--drop-size",
            "100",
            "--tries",
            "3",
            "--enough-measure",
            "50000",
            "--seed",
            "7",
        ]);

        let mut config = Config::default();
        cli.apply_to_config(&mut config);

        assert_eq!(config.measurement.batch_size, 10_000);
        assert_eq!(config.measurement.drop_size, 100);
        assert_eq!(config.orchestration.test_tries, 3);
        assert_eq!(config.verdict.enough_measure, 50_000);
        assert_eq!(config.orchestration.seed, Some(7));
    }

    #[test]
    fn test_apply_to_config_without_overrides() {
        let cli = Cli::parse_from(["ctprobe"]);

        let mut config = Config::default();
        config.orchestration.seed = Some(1);
        cli.apply_to_config(&mut config);

        // Values should remain unchanged
        assert_eq!(config.measurement.batch_size, 150);
        assert_eq!(config.measurement.drop_size, 20);
        assert_eq!(config.orchestration.test_tries, 10);
        assert_eq!(config.orchestration.seed, Some(1));
    }

    #[test]
    fn test_cli_parse_minimal() {
        let cli = Cli::parse_from(["ctprobe"]);

        assert!(cli.dut.is_empty());
        assert!(!cli.list);
        assert_eq!(cli.format, OutputFormat::Terminal);
        assert!(!cli.no_color);
        assert!(cli.config.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_parse_duts_and_format() {
        let cli = Cli::parse_from([
            "ctprobe",
            "--dut",
            "ct_compare",
            "-d",
            "sim_leaky",
            "--format",
            "json",
            "--no-color",
            "--config",
            "custom.toml",
            "-v",
        ]);

        assert_eq!(cli.dut, vec!["ct_compare", "sim_leaky"]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.no_color);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_rejects_unknown_format() {
        let result = Cli::try_parse_from(["ctprobe", "--format", "xml"]);
        assert!(result.is_err());
    }
}
