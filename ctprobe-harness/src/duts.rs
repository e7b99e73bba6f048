use ctprobe_core::{BatchGeometry, Class};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::inputs::prepare_random_inputs;
use crate::timer::{black_box, cpucycles};
use crate::{DeviceUnderTest, DutRegistry};

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Check that the buffers handed to `measure` cover the geometry.
fn buffers_fit(name: &str, geometry: &BatchGeometry, inputs: &[u8], before: &[i64], after: &[i64]) -> bool {
    let input_len = geometry.batch_size() * geometry.chunk_size();
    let measured = geometry.measured_len();
    let fits = inputs.len() >= input_len && before.len() >= measured && after.len() >= measured;
    if !fits {
        tracing::warn!(
            dut = name,
            inputs = inputs.len(),
            expected_inputs = input_len,
            before = before.len(),
            after = after.len(),
            expected_ticks = measured,
            "measurement buffers do not match the batch geometry"
        );
    }
    fits
}

/// Times a real function with the cycle counter.
///
/// Dropped trials still call the function, which warms caches and branch
/// predictors without recording anything.
pub struct TimedDut<F> {
    name: String,
    rng: StdRng,
    op: F,
}

impl<F> TimedDut<F>
where
    F: FnMut(&[u8]) -> bool,
{
    pub fn new(name: impl Into<String>, seed: Option<u64>, op: F) -> Self {
        Self {
            name: name.into(),
            rng: seeded_rng(seed),
            op,
        }
    }
}

impl<F> DeviceUnderTest for TimedDut<F>
where
    F: FnMut(&[u8]) -> bool,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare_inputs(&mut self, inputs: &mut [u8], classes: &mut [Class]) {
        let chunk_size = inputs.len() / classes.len().max(1);
        prepare_random_inputs(&mut self.rng, inputs, classes, chunk_size);
    }

    fn measure(
        &mut self,
        geometry: &BatchGeometry,
        inputs: &[u8],
        before_ticks: &mut [i64],
        after_ticks: &mut [i64],
    ) -> bool {
        if !buffers_fit(&self.name, geometry, inputs, before_ticks, after_ticks) {
            return false;
        }

        let measured = geometry.measured_trials();
        let trials = inputs
            .chunks_exact(geometry.chunk_size())
            .take(geometry.batch_size())
            .enumerate();

        for (k, input) in trials {
            if measured.contains(&k) {
                let slot = k - geometry.drop_size();
                before_ticks[slot] = cpucycles();
                black_box((self.op)(black_box(input)));
                after_ticks[slot] = cpucycles();
            } else {
                black_box((self.op)(black_box(input)));
            }
        }
        true
    }
}

/// Timing model of a [`SimulatedDut`], in cycles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedTiming {
    /// Mean delay for an all-zero (fixed class) input.
    pub fixed_cycles: f64,
    /// Mean delay for any other input.
    pub random_cycles: f64,
    /// Standard deviation of the Gaussian noise on fixed-class trials.
    pub noise_sd: f64,
    /// Standard deviation of the Gaussian noise on every other trial.
    pub random_noise_sd: f64,
    /// Probability that a trial is hit by a slow outlier.
    pub outlier_rate: f64,
    /// Extra cycles added by an outlier.
    pub outlier_cycles: f64,
    /// Probability that a trial's after-timestamp lands before its
    /// before-timestamp.
    pub anomaly_rate: f64,
}

impl SimulatedTiming {
    /// Same noiseless delay for both classes.
    pub fn constant(cycles: f64) -> Self {
        Self::shifted(cycles, cycles)
    }

    /// Noiseless delays that differ between the classes.
    pub fn shifted(fixed_cycles: f64, random_cycles: f64) -> Self {
        Self {
            fixed_cycles,
            random_cycles,
            noise_sd: 0.0,
            random_noise_sd: 0.0,
            outlier_rate: 0.0,
            outlier_cycles: 0.0,
            anomaly_rate: 0.0,
        }
    }

    /// Same noise on both classes.
    pub fn with_noise(self, noise_sd: f64) -> Self {
        self.with_class_noise(noise_sd, noise_sd)
    }

    /// Different noise per class, for leaks that only change the spread.
    pub fn with_class_noise(mut self, fixed_sd: f64, random_sd: f64) -> Self {
        self.noise_sd = fixed_sd;
        self.random_noise_sd = random_sd;
        self
    }

    pub fn with_outliers(mut self, rate: f64, cycles: f64) -> Self {
        self.outlier_rate = rate;
        self.outlier_cycles = cycles;
        self
    }

    pub fn with_anomalies(mut self, rate: f64) -> Self {
        self.anomaly_rate = rate;
        self
    }
}

/// A device that writes timestamps from a simulated clock.
///
/// The delay of a trial depends only on its input bytes (all zero or not),
/// exactly the information a real function would see.
pub struct SimulatedDut {
    name: String,
    timing: SimulatedTiming,
    rng: StdRng,
    clock: i64,
}

/// Gap between consecutive simulated trials.
const TRIAL_OVERHEAD: i64 = 40;

impl SimulatedDut {
    pub fn new(name: impl Into<String>, timing: SimulatedTiming, seed: u64) -> Self {
        Self {
            name: name.into(),
            timing,
            rng: StdRng::seed_from_u64(seed),
            clock: 1 << 32,
        }
    }

    fn from_seed(name: &str, timing: SimulatedTiming, seed: Option<u64>) -> Self {
        Self {
            name: name.to_string(),
            timing,
            rng: seeded_rng(seed),
            clock: 1 << 32,
        }
    }

    pub fn timing(&self) -> &SimulatedTiming {
        &self.timing
    }

    /// Draw the delay for one trial.
    fn delay(&mut self, input: &[u8]) -> i64 {
        let timing = self.timing;
        let (mut cycles, noise_sd) = if input.iter().all(|&b| b == 0) {
            (timing.fixed_cycles, timing.noise_sd)
        } else {
            (timing.random_cycles, timing.random_noise_sd)
        };
        if noise_sd > 0.0 {
            let z: f64 = self.rng.sample(StandardNormal);
            cycles += z * noise_sd;
        }
        if timing.outlier_rate > 0.0 && self.rng.gen_bool(timing.outlier_rate.min(1.0)) {
            cycles += timing.outlier_cycles;
        }
        (cycles.round() as i64).max(1)
    }

    fn is_anomaly(&mut self) -> bool {
        self.timing.anomaly_rate > 0.0 && self.rng.gen_bool(self.timing.anomaly_rate.min(1.0))
    }
}

impl DeviceUnderTest for SimulatedDut {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare_inputs(&mut self, inputs: &mut [u8], classes: &mut [Class]) {
        let chunk_size = inputs.len() / classes.len().max(1);
        prepare_random_inputs(&mut self.rng, inputs, classes, chunk_size);
    }

    fn measure(
        &mut self,
        geometry: &BatchGeometry,
        inputs: &[u8],
        before_ticks: &mut [i64],
        after_ticks: &mut [i64],
    ) -> bool {
        if !buffers_fit(&self.name, geometry, inputs, before_ticks, after_ticks) {
            return false;
        }

        let measured = geometry.measured_trials();
        let chunk_size = geometry.chunk_size();

        for k in 0..geometry.batch_size() {
            let input = &inputs[k * chunk_size..(k + 1) * chunk_size];
            let delay = self.delay(input);
            let before = self.clock;
            self.clock += delay;
            let after = if self.is_anomaly() { before - delay } else { self.clock };
            self.clock += TRIAL_OVERHEAD;

            if measured.contains(&k) {
                let slot = k - geometry.drop_size();
                before_ticks[slot] = before;
                after_ticks[slot] = after;
            }
        }
        true
    }
}

/// Secret that the compare functions check their input against.
const SECRET: [u8; 64] = [0; 64];

/// Constant-time compare: XOR-accumulate every byte, decide at the end.
fn ct_compare(input: &[u8]) -> bool {
    let acc = input
        .iter()
        .zip(SECRET.iter().cycle())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    acc == 0
}

/// Byte-wise compare that returns at the first mismatch.
fn early_exit_compare(input: &[u8]) -> bool {
    for (a, b) in input.iter().zip(SECRET.iter().cycle()) {
        if a != b {
            return false;
        }
    }
    true
}

/// Registry with every built-in device.
///
/// With a seed, each device gets its own deterministic input stream.
pub fn builtin_registry(seed: Option<u64>) -> DutRegistry {
    let seed_for = |offset: u64| seed.map(|s| s.wrapping_add(offset));
    let mut registry = DutRegistry::new();

    registry.register(TimedDut::new("ct_compare", seed_for(0), ct_compare));
    registry.register(TimedDut::new(
        "early_exit_compare",
        seed_for(1),
        early_exit_compare,
    ));
    registry.register(SimulatedDut::from_seed(
        "sim_constant",
        SimulatedTiming::constant(200.0)
            .with_noise(5.0)
            .with_outliers(0.001, 2_000.0)
            .with_anomalies(0.0005),
        seed_for(2),
    ));
    registry.register(SimulatedDut::from_seed(
        "sim_leaky",
        SimulatedTiming::shifted(250.0, 200.0)
            .with_noise(5.0)
            .with_outliers(0.001, 2_000.0)
            .with_anomalies(0.0005),
        seed_for(3),
    ));

    registry
}
