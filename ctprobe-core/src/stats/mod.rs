use serde::Serialize;

use crate::batch::Class;

/// Snapshot of a two-sample test at the moment it was computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TestResult {
    /// Welch's t-statistic, `(mean_fixed - mean_random) / se`.
    pub t_statistic: f64,
    /// Welch-Satterthwaite degrees of freedom.
    pub degrees_of_freedom: f64,
    /// Two-tailed p-value of `t_statistic`.
    pub p_value: f64,
    /// Number of samples per class, indexed by [`Class::index`].
    pub counts: [u64; 2],
    /// Mean per class, indexed by [`Class::index`].
    pub means: [f64; 2],
}

impl TestResult {
    /// Combined sample count of both classes.
    pub fn total_count(&self) -> u64 {
        self.counts[0] + self.counts[1]
    }
}

/// A two-sample test that folds samples in one at a time.
pub trait OnlineTest {
    /// Fold one sample of the given class into the running statistics.
    fn push(&mut self, value: f64, class: Class);

    /// Compute the test statistic, or `None` while either class has fewer
    /// than two samples.
    fn compute(&self) -> Option<TestResult>;

    /// Number of samples seen for `class`.
    fn count(&self, class: Class) -> u64;

    /// Combined number of samples seen for both classes.
    fn total_count(&self) -> u64 {
        self.count(Class::Fixed) + self.count(Class::Random)
    }
}

mod ttest;
pub use ttest::WelchAccumulator;
