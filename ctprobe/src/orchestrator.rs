//! Trial orchestrator: runs measurement batches against one function until a
//! verdict of possibly constant time or until the restart budget is spent.
//!
//! One [`Fixture`] owns the test slots and percentile ladder of a run. Every
//! batch goes through prepare, measure, differentiate, recompute the ladder,
//! route into the slots and evaluate. An attempt keeps running batches until
//! the verdict floor is passed, bounded by [`MAX_BATCH_FACTOR`] times the
//! minimum batch count; attempts restart from empty accumulators.

use ctprobe_core::{
    evaluate, Batch, BatchError, BatchGeometry, FunctionSummary, LeakageReport, PercentileLadder,
    TestSet, Verdict, VerdictThresholds,
};
use ctprobe_harness::{DeviceUnderTest, DutError, DutRegistry};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Config;

/// Exit status used when a run cannot continue safely.
pub const EXIT_FATAL: i32 = 111;

/// Cap on batches per attempt, as a multiple of the minimum.
pub const MAX_BATCH_FACTOR: u64 = 4;

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// Batch buffers could not be set up.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// The device under test failed.
    #[error(transparent)]
    Dut(#[from] DutError),
}

/// Where a [`Fixture`] is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Storage allocated, nothing measured yet.
    Init,
    /// A batch is being prepared and timed.
    Measuring,
    /// A batch is being folded into the statistics and judged.
    Evaluating,
    /// An attempt ended possibly constant time.
    Converged,
    /// Every attempt ended leaking or inconclusive.
    Exhausted,
}

/// Everything a [`Fixture`] needs to know about a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixtureSettings {
    pub geometry: BatchGeometry,
    pub percentiles: usize,
    pub second_order_activation: u64,
    pub thresholds: VerdictThresholds,
    pub test_tries: u32,
}

impl FixtureSettings {
    pub fn from_config(config: &Config) -> Result<Self, BatchError> {
        let m = &config.measurement;
        Ok(Self {
            geometry: BatchGeometry::new(m.batch_size, m.drop_size, m.chunk_size)?,
            percentiles: config.statistics.percentiles,
            second_order_activation: config.statistics.second_order_activation,
            thresholds: config.verdict.thresholds(),
            test_tries: config.orchestration.test_tries,
        })
    }
}

/// Result of a single batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchOutcome {
    /// Whether the device reported a successful measurement.
    pub measured: bool,
    /// Verdict over everything accumulated so far in this attempt.
    pub report: LeakageReport,
}

impl BatchOutcome {
    /// A batch passes only if it was measured and the verdict is possibly
    /// constant time.
    pub fn passed(&self) -> bool {
        self.measured && self.report.verdict.is_constant_time()
    }
}

/// Result of testing one function.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub constant_time: bool,
    /// Attempts used, including the deciding one.
    pub attempts: u32,
    /// Report after the last batch of the last attempt.
    pub report: LeakageReport,
    /// Final report of every attempt, in order.
    pub history: Vec<LeakageReport>,
}

impl Outcome {
    pub fn summary(&self, name: &str, max_attempts: u32) -> FunctionSummary {
        FunctionSummary {
            name: name.to_string(),
            constant_time: self.constant_time,
            attempts: self.attempts,
            max_attempts,
            report: self.report,
        }
    }
}

/// Run-scoped measurement state for one function.
pub struct Fixture {
    settings: FixtureSettings,
    tests: TestSet,
    ladder: PercentileLadder,
    phase: Phase,
}

impl Fixture {
    pub fn new(settings: FixtureSettings) -> Self {
        Self {
            tests: TestSet::new(settings.percentiles, settings.second_order_activation),
            ladder: PercentileLadder::new(settings.percentiles),
            settings,
            phase: Phase::Init,
        }
    }

    pub fn settings(&self) -> &FixtureSettings {
        &self.settings
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn tests(&self) -> &TestSet {
        &self.tests
    }

    /// Fewest batches that can pass the verdict floor.
    pub fn batches_per_attempt(&self) -> u64 {
        let per_batch = self.settings.geometry.measured_len() as u64;
        self.settings.thresholds.enough_measure / per_batch + 1
    }

    /// Most batches one attempt may run before it is given up as
    /// inconclusive. Discarded samples and failed batches eat into the floor.
    pub fn max_batches_per_attempt(&self) -> u64 {
        self.batches_per_attempt().saturating_mul(MAX_BATCH_FACTOR)
    }

    /// Measure one batch, fold it into the statistics and evaluate.
    ///
    /// A batch whose measurement fails is not folded in.
    pub fn run_batch(&mut self, dut: &mut dyn DeviceUnderTest) -> Result<BatchOutcome, FixtureError> {
        let geometry = self.settings.geometry;
        let mut batch = Batch::allocate(geometry)?;

        self.phase = Phase::Measuring;
        let buffers = batch.buffers_mut();
        dut.prepare_inputs(buffers.inputs, buffers.classes);
        let measured = dut.measure(
            &geometry,
            buffers.inputs,
            buffers.before_ticks,
            buffers.after_ticks,
        );

        self.phase = Phase::Evaluating;
        if measured {
            batch.differentiate();
            self.ladder.recompute(batch.exec_times());
            let routed =
                self.tests
                    .update_statistics(batch.exec_times(), batch.measured_classes(), &self.ladder);
            if routed.discarded > 0 {
                debug!(
                    name = dut.name(),
                    discarded = routed.discarded,
                    "dropped non-positive samples"
                );
            }
        } else {
            warn!(name = dut.name(), "measurement failed, batch discarded");
        }

        let report = evaluate(&self.tests, &self.settings.thresholds);
        debug!(name = dut.name(), "{}", report);
        Ok(BatchOutcome { measured, report })
    }

    /// Test one function, restarting up to `test_tries` times.
    ///
    /// `init_once` is called before the first attempt. Each attempt starts
    /// from empty accumulators and runs batches until the report is judged,
    /// or until [`Fixture::max_batches_per_attempt`]. It succeeds when its
    /// last batch passes.
    pub fn test_const(&mut self, dut: &mut dyn DeviceUnderTest) -> Result<Outcome, FixtureError> {
        let tries = self.settings.test_tries;
        let max_batches = self.max_batches_per_attempt();
        let mut history = Vec::with_capacity(tries as usize);
        let mut report = evaluate(&self.tests, &self.settings.thresholds);
        let mut attempts = 0;
        let mut constant_time = false;

        self.phase = Phase::Init;
        for attempt in 1..=tries {
            attempts = attempt;
            info!(name = dut.name(), attempt, tries, "testing");
            if attempt == 1 {
                dut.init_once()?;
            }
            self.tests.reset();

            let mut passed = false;
            let mut batches = 0;
            while batches < max_batches {
                let outcome = self.run_batch(dut)?;
                batches += 1;
                passed = outcome.passed();
                report = outcome.report;
                if !matches!(report.verdict, Verdict::InsufficientData { .. }) {
                    break;
                }
            }
            if matches!(report.verdict, Verdict::InsufficientData { .. }) {
                warn!(
                    name = dut.name(),
                    attempt,
                    batches,
                    "attempt never passed the verdict floor"
                );
            }

            history.push(report);
            info!(
                name = dut.name(),
                attempt,
                batches,
                verdict = report.verdict.label(),
                max_t = report.max_t,
                "{}",
                report
            );

            if passed {
                constant_time = true;
                break;
            }
        }

        self.phase = if constant_time {
            Phase::Converged
        } else {
            Phase::Exhausted
        };

        Ok(Outcome {
            constant_time,
            attempts,
            report,
            history,
        })
    }
}

/// Test every named function from the registry, each with a fresh fixture.
pub fn run_functions(
    registry: &mut DutRegistry,
    names: &[String],
    settings: &FixtureSettings,
) -> Result<Vec<FunctionSummary>, FixtureError> {
    let mut summaries = Vec::with_capacity(names.len());
    for name in names {
        let dut = registry.get_mut(name)?;
        let mut fixture = Fixture::new(*settings);
        let outcome = fixture.test_const(dut)?;
        summaries.push(outcome.summary(name, settings.test_tries));
    }
    Ok(summaries)
}

/// Log a fatal error and terminate with [`EXIT_FATAL`].
pub fn die(err: &FixtureError) -> ! {
    error!(error = %err, "fatal error, aborting");
    std::process::exit(EXIT_FATAL)
}

/// Per-function entry point: is `dut` possibly constant time?
///
/// Terminates the process with [`EXIT_FATAL`] if buffers cannot be
/// allocated or the device fails to initialise.
pub fn is_constant_time(dut: &mut dyn DeviceUnderTest, settings: &FixtureSettings) -> bool {
    match Fixture::new(*settings).test_const(dut) {
        Ok(outcome) => outcome.constant_time,
        Err(err) => die(&err),
    }
}
