//! Configuration loading for ctprobe.
//!
//! Supports loading configuration from TOML files, with defaults matching
//! the classic dudect constants for every setting.

use anyhow::{bail, Context, Result};
use ctprobe_core::{VerdictThresholds, DEFAULT_PERCENTILES, DEFAULT_SECOND_ORDER_ACTIVATION};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for ctprobe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shape of each measurement batch.
    pub measurement: MeasurementConfig,
    /// Settings for the statistics router.
    pub statistics: StatisticsConfig,
    /// Sample floor and t thresholds.
    pub verdict: VerdictConfig,
    /// Restart budget and seeding.
    pub orchestration: OrchestrationConfig,
}

/// Shape of each measurement batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    /// Trials per batch.
    pub batch_size: usize,
    /// Trials dropped at each end of a batch.
    pub drop_size: usize,
    /// Input bytes per trial.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Number of cropped tests, one per percentile threshold.
    pub percentiles: usize,
    /// Raw fixed-class count after which the second-order test is fed.
    pub second_order_activation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictConfig {
    /// A test is only judged once it holds more samples than this.
    pub enough_measure: u64,
    pub definitely_threshold: f64,
    pub probably_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Attempts per function before giving up.
    pub test_tries: u32,
    /// Seed for input generation and simulated devices (random if unset).
    pub seed: Option<u64>,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            batch_size: 150,
            drop_size: 20,
            chunk_size: 16,
        }
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            percentiles: DEFAULT_PERCENTILES,
            second_order_activation: DEFAULT_SECOND_ORDER_ACTIVATION,
        }
    }
}

impl Default for VerdictConfig {
    fn default() -> Self {
        let thresholds = VerdictThresholds::default();
        Self {
            enough_measure: thresholds.enough_measure,
            definitely_threshold: thresholds.definitely,
            probably_threshold: thresholds.probably,
        }
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            test_tries: 10,
            seed: None,
        }
    }
}

impl VerdictConfig {
    pub fn thresholds(&self) -> VerdictThresholds {
        VerdictThresholds {
            enough_measure: self.enough_measure,
            definitely: self.definitely_threshold,
            probably: self.probably_threshold,
        }
    }
}

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = ".ctprobe.toml";

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration from `.ctprobe.toml` in the current directory, or
    /// use defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be parsed.
    pub fn load_or_default() -> Result<Config> {
        let path = Path::new(DEFAULT_CONFIG_FILE);

        if path.exists() {
            Self::load(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from the specified path, or try the default location.
    pub fn load_from(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(p) => Self::load(p),
            None => Self::load_or_default(),
        }
    }

    /// Reject settings the fixture cannot run with.
    pub fn validate(&self) -> Result<()> {
        let m = &self.measurement;
        if m.batch_size <= m.drop_size.saturating_mul(2) {
            bail!(
                "measurement.batch_size ({}) must exceed twice measurement.drop_size ({})",
                m.batch_size,
                m.drop_size
            );
        }
        if m.chunk_size == 0 {
            bail!("measurement.chunk_size must be at least 1");
        }
        if self.statistics.percentiles == 0 {
            bail!("statistics.percentiles must be at least 1");
        }
        let v = &self.verdict;
        if !(v.probably_threshold > 0.0 && v.probably_threshold <= v.definitely_threshold) {
            bail!(
                "verdict thresholds must satisfy 0 < probably_threshold ({}) <= definitely_threshold ({})",
                v.probably_threshold,
                v.definitely_threshold
            );
        }
        if self.orchestration.test_tries == 0 {
            bail!("orchestration.test_tries must be at least 1");
        }
        Ok(())
    }
}
