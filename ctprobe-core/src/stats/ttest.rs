use statrs::distribution::{ContinuousCDF, StudentsT};

use super::{OnlineTest, TestResult};
use crate::batch::Class;

/// Streaming Welch's t-test between the fixed and random classes.
///
/// Keeps, per class, the sample count, the running mean and the running sum
/// of squared deviations from the mean (Welford's update), so that no sample
/// history is retained and the update stays numerically stable over millions
/// of pushes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WelchAccumulator {
    n: [u64; 2],
    mean: [f64; 2],
    m2: [f64; 2],
}

impl WelchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Running mean of `class`, 0.0 before any sample.
    pub fn mean(&self, class: Class) -> f64 {
        self.mean[class.index()]
    }

    /// Unbiased sample variance of `class` (Bessel's correction).
    ///
    /// Returns 0.0 with fewer than two samples.
    pub fn variance(&self, class: Class) -> f64 {
        let i = class.index();
        if self.n[i] < 2 {
            return 0.0;
        }
        self.m2[i] / (self.n[i] - 1) as f64
    }

    /// Forget every sample.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Calculate degrees of freedom using the Welch-Satterthwaite equation.
    ///
    /// df = (s1 + s2)^2 / (s1^2/(n1-1) + s2^2/(n2-1)), with s = var/n
    fn welch_satterthwaite_df(s1: f64, n1: u64, s2: f64, n2: u64) -> f64 {
        let numerator = (s1 + s2).powi(2);
        let denominator = s1.powi(2) / (n1 - 1) as f64 + s2.powi(2) / (n2 - 1) as f64;

        if denominator == 0.0 {
            return (n1.min(n2) - 1) as f64;
        }

        numerator / denominator
    }

    fn two_tailed_p(t_statistic: f64, df: f64) -> f64 {
        match StudentsT::new(0.0, 1.0, df) {
            Ok(t_dist) => 2.0 * (1.0 - t_dist.cdf(t_statistic.abs())),
            Err(_) => 1.0,
        }
    }
}

impl OnlineTest for WelchAccumulator {
    fn push(&mut self, value: f64, class: Class) {
        let i = class.index();
        self.n[i] += 1;
        let delta = value - self.mean[i];
        self.mean[i] += delta / self.n[i] as f64;
        self.m2[i] += delta * (value - self.mean[i]);
    }

    fn compute(&self) -> Option<TestResult> {
        let [n0, n1] = self.n;
        if n0 < 2 || n1 < 2 {
            return None;
        }

        let s0 = self.variance(Class::Fixed) / n0 as f64;
        let s1 = self.variance(Class::Random) / n1 as f64;
        let se = (s0 + s1).sqrt();
        let difference = self.mean[0] - self.mean[1];

        // Both classes constant: any difference at all is a certain leak.
        if se == 0.0 {
            let (t_statistic, p_value) = if difference == 0.0 {
                (0.0, 1.0)
            } else {
                (f64::INFINITY.copysign(difference), 0.0)
            };
            return Some(TestResult {
                t_statistic,
                degrees_of_freedom: (n0.min(n1) - 1) as f64,
                p_value,
                counts: self.n,
                means: self.mean,
            });
        }

        let t_statistic = difference / se;
        let degrees_of_freedom = Self::welch_satterthwaite_df(s0, n0, s1, n1);

        Some(TestResult {
            t_statistic,
            degrees_of_freedom,
            p_value: Self::two_tailed_p(t_statistic, degrees_of_freedom),
            counts: self.n,
            means: self.mean,
        })
    }

    fn count(&self, class: Class) -> u64 {
        self.n[class.index()]
    }
}
