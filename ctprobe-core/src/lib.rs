//! Core types and statistics for ctprobe.
//!
//! This crate holds the measurement-and-statistics engine shared by the
//! ctprobe CLI and the device-under-test harness: batch buffers, the
//! differencer, the percentile ladder, the online Welch t-test slots, the
//! statistics router and the verdict engine.

pub mod batch;
pub mod percentile;
pub mod report;
pub mod router;
pub mod stats;
pub mod verdict;

// Re-export main types for convenience
pub use batch::{differentiate, Batch, BatchBuffers, BatchError, BatchGeometry, Class};
pub use percentile::{quantile_for, PercentileLadder, DEFAULT_PERCENTILES};
pub use report::{FunctionSummary, JsonReporter, ReportError, Reporter, TerminalReporter};
pub use router::{RouteSummary, SlotKind, TestSet, DEFAULT_SECOND_ORDER_ACTIVATION};
pub use stats::{OnlineTest, TestResult, WelchAccumulator};
pub use verdict::{evaluate, LeakageReport, Verdict, VerdictThresholds, DETECTION_T};
