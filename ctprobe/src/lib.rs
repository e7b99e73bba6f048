//! ctprobe: detect timing leakage with fixed-vs-random Welch t-tests
//!
//! This library drives a function under test through repeated measurement
//! batches, feeds the elapsed times into a set of online t-tests and reports
//! whether the function is possibly constant time.

pub mod cli;
pub mod config;
pub mod orchestrator;

// Re-export core types for convenience
pub use ctprobe_core::{
    FunctionSummary, JsonReporter, LeakageReport, ReportError, Reporter, TerminalReporter, Verdict,
};
pub use ctprobe_harness::{
    builtin_registry, DeviceUnderTest, DutError, DutRegistry, SimulatedDut, SimulatedTiming,
    TimedDut,
};

// Re-export main types from this crate
pub use cli::{Cli, OutputFormat};
pub use config::Config;
pub use orchestrator::{
    die, is_constant_time, run_functions, BatchOutcome, Fixture, FixtureError, FixtureSettings,
    Outcome, Phase, EXIT_FATAL, MAX_BATCH_FACTOR,
};
