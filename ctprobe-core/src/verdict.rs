//! Aggregation of all test slots into a single verdict.
//!
//! The slot with the largest |t| among those past the sample floor decides.
//! Alongside the verdict we report `tau = |t| / sqrt(n)`, a t-value normalised
//! by sample count that approximates the distance between the two timing
//! distributions, and `(5 / tau)^2`, the number of measurements needed to
//! barely detect that distance with t = 5.

use std::fmt;

use serde::Serialize;

use crate::router::{SlotKind, TestSet};
use crate::stats::OnlineTest;

/// |t| at which a leak counts as "barely detected" for the sample estimate.
pub const DETECTION_T: f64 = 5.0;

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// No slot has passed the sample floor yet.
    InsufficientData { remaining: u64 },
    /// |t| above the high threshold.
    DefinitelyLeaking,
    /// |t| above the moderate threshold.
    ProbablyLeaking,
    /// No test has rejected constant time so far.
    PossiblyConstantTime,
}

impl Verdict {
    /// Whether this verdict lets the function pass.
    pub fn is_constant_time(&self) -> bool {
        matches!(self, Verdict::PossiblyConstantTime)
    }

    pub fn is_leaking(&self) -> bool {
        matches!(self, Verdict::DefinitelyLeaking | Verdict::ProbablyLeaking)
    }

    /// Short human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::InsufficientData { .. } => "not enough measurements",
            Verdict::DefinitelyLeaking => "definitely not constant time",
            Verdict::ProbablyLeaking => "probably not constant time",
            Verdict::PossiblyConstantTime => "possibly constant time",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Sample floor and significance thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VerdictThresholds {
    /// A slot is only considered with strictly more samples than this.
    pub enough_measure: u64,
    /// |t| above which the verdict is [`Verdict::DefinitelyLeaking`].
    pub definitely: f64,
    /// |t| above which the verdict is [`Verdict::ProbablyLeaking`].
    pub probably: f64,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        Self {
            enough_measure: 10_000,
            definitely: 500.0,
            probably: 10.0,
        }
    }
}

/// Everything the verdict engine found in one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LeakageReport {
    #[serde(flatten)]
    pub verdict: Verdict,
    /// Index of the deciding slot (the raw slot while data is insufficient).
    pub slot_index: usize,
    #[serde(flatten)]
    pub slot: SlotKind,
    /// Combined sample count of the deciding slot.
    pub samples: u64,
    /// Largest |t| among eligible slots.
    pub max_t: f64,
    /// `max_t / sqrt(samples)`.
    pub max_tau: f64,
    /// `(DETECTION_T / max_tau)^2`; `None` when tau is zero.
    pub samples_to_detect: Option<f64>,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
}

impl LeakageReport {
    fn insufficient(tests: &TestSet, thresholds: &VerdictThresholds) -> Self {
        let samples = tests.raw().total_count();
        Self {
            verdict: Verdict::InsufficientData {
                remaining: (thresholds.enough_measure + 1).saturating_sub(samples),
            },
            slot_index: 0,
            slot: SlotKind::Raw,
            samples,
            max_t: 0.0,
            max_tau: 0.0,
            samples_to_detect: None,
            degrees_of_freedom: 0.0,
            p_value: 1.0,
        }
    }
}

impl fmt::Display for LeakageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "measure: {:7.2} M, ", self.samples as f64 / 1e6)?;
        if let Verdict::InsufficientData { remaining } = self.verdict {
            return write!(f, "not enough measurements ({} still to go).", remaining);
        }
        write!(f, "max t: {:+7.2}, max tau: {:.2e}, ", self.max_t, self.max_tau)?;
        match self.samples_to_detect {
            Some(n) => write!(f, "(5/tau)^2: {:.2e}.", n),
            None => write!(f, "(5/tau)^2: inf."),
        }
    }
}

/// Pick the most significant eligible slot and classify it.
pub fn evaluate(tests: &TestSet, thresholds: &VerdictThresholds) -> LeakageReport {
    let mut best = None;

    for (index, slot) in tests.slots().iter().enumerate() {
        if slot.total_count() <= thresholds.enough_measure {
            continue;
        }
        let Some(result) = slot.compute() else {
            continue;
        };
        let magnitude = result.t_statistic.abs();
        match best {
            Some((_, best_magnitude, _)) if magnitude <= best_magnitude => {}
            _ => best = Some((index, magnitude, result)),
        }
    }

    let Some((slot_index, max_t, result)) = best else {
        return LeakageReport::insufficient(tests, thresholds);
    };

    let samples = result.total_count();
    let max_tau = max_t / (samples as f64).sqrt();
    let samples_to_detect = if max_tau > 0.0 {
        Some((DETECTION_T * DETECTION_T) / (max_tau * max_tau))
    } else {
        None
    };

    let verdict = if max_t > thresholds.definitely {
        Verdict::DefinitelyLeaking
    } else if max_t > thresholds.probably {
        Verdict::ProbablyLeaking
    } else {
        Verdict::PossiblyConstantTime
    };

    LeakageReport {
        verdict,
        slot_index,
        slot: tests.kind(slot_index),
        samples,
        max_t,
        max_tau,
        samples_to_detect,
        degrees_of_freedom: result.degrees_of_freedom,
        p_value: result.p_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Class;
    use crate::percentile::PercentileLadder;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const FLOOR: VerdictThresholds = VerdictThresholds {
        enough_measure: 1000,
        definitely: 500.0,
        probably: 10.0,
    };

    /// Feed `n` samples per class drawn as `base[class] + uniform noise`.
    fn fed(n: usize, fixed_base: i64, random_base: i64, noise: i64, seed: u64) -> TestSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut exec_times = Vec::with_capacity(2 * n);
        let mut classes = Vec::with_capacity(2 * n);
        for _ in 0..n {
            for class in Class::ALL {
                let base = match class {
                    Class::Fixed => fixed_base,
                    Class::Random => random_base,
                };
                exec_times.push(base + rng.gen_range(0..=noise));
                classes.push(class);
            }
        }
        let ladder = PercentileLadder::from_exec_times(&exec_times, 10);
        let mut tests = TestSet::new(10, u64::MAX);
        tests.update_statistics(&exec_times, &classes, &ladder);
        tests
    }

    #[test]
    fn test_insufficient_data_reports_remaining() {
        let tests = fed(100, 1000, 1000, 10, 1);
        let report = evaluate(&tests, &FLOOR);

        assert_eq!(report.verdict, Verdict::InsufficientData { remaining: 801 });
        assert_eq!(report.slot, SlotKind::Raw);
        assert!(!report.verdict.is_constant_time());
        assert!(report.to_string().contains("801 still to go"));
    }

    #[test]
    fn test_floor_is_strict() {
        let tests = fed(500, 1000, 1000, 10, 2);
        let report = evaluate(&tests, &FLOOR);
        assert_eq!(report.verdict, Verdict::InsufficientData { remaining: 1 });
    }

    #[test]
    fn test_same_distribution_is_possibly_constant_time() {
        let tests = fed(5000, 1000, 1000, 50, 3);
        let report = evaluate(&tests, &FLOOR);

        assert_eq!(report.verdict, Verdict::PossiblyConstantTime);
        assert!(report.max_t < 10.0);
        assert!(report.verdict.is_constant_time());
    }

    #[test]
    fn test_large_shift_is_definitely_leaking() {
        let tests = fed(5000, 1000, 2000, 10, 4);
        let report = evaluate(&tests, &FLOOR);

        assert_eq!(report.verdict, Verdict::DefinitelyLeaking);
        assert!(report.max_t > 500.0);
        assert!(report.verdict.is_leaking());
    }

    #[test]
    fn test_moderate_shift_is_probably_leaking() {
        // shift 10 on uniform noise with sd ~29: t ~ 10 / (29 * sqrt(2/5000)) ~ 17
        let tests = fed(5000, 1000, 1010, 100, 5);
        let report = evaluate(&tests, &FLOOR);

        assert_eq!(report.verdict, Verdict::ProbablyLeaking);
        assert!(report.max_t > 10.0 && report.max_t < 500.0);
    }

    #[test]
    fn test_tau_and_detection_estimate() {
        let tests = fed(5000, 1000, 1010, 100, 6);
        let report = evaluate(&tests, &FLOOR);

        let expected_tau = report.max_t / (report.samples as f64).sqrt();
        assert!((report.max_tau - expected_tau).abs() < 1e-12);
        let needed = report.samples_to_detect.unwrap();
        assert!((needed - 25.0 / (expected_tau * expected_tau)).abs() < 1e-6 * needed);
        // A detected leak needs fewer samples than we already have.
        assert!(needed < report.samples as f64);
    }

    #[test]
    fn test_constant_classes_give_infinite_t() {
        let tests = fed(2000, 1000, 2000, 0, 7);
        let report = evaluate(&tests, &FLOOR);

        assert_eq!(report.verdict, Verdict::DefinitelyLeaking);
        assert!(report.max_t.is_infinite());
        assert_eq!(report.samples_to_detect, Some(0.0));
    }

    #[test]
    fn test_display_format() {
        let tests = fed(5000, 1000, 2000, 10, 8);
        let line = evaluate(&tests, &FLOOR).to_string();
        assert!(line.starts_with("measure: "));
        assert!(line.contains(" M, max t: "));
        assert!(line.contains("max tau:"));
        assert!(line.contains("(5/tau)^2:"));
    }
}
