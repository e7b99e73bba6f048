//! Cropping thresholds derived from a batch's elapsed times.
//!
//! Execution times have a fat right tail: most runs are fast, a few are very
//! slow (interrupts, cache misses). Rather than guessing one cutoff, the
//! ladder holds K thresholds following `p_i = 1 - 0.5^(10 (i + 1) / K)`, which
//! packs thresholds near the bulk of the distribution and thins them out
//! towards the maximum.

/// Default number of cropping thresholds.
pub const DEFAULT_PERCENTILES: usize = 100;

/// Quantile used for ladder entry `index` out of `count`.
pub fn quantile_for(index: usize, count: usize) -> f64 {
    1.0 - 0.5f64.powf(10.0 * (index + 1) as f64 / count as f64)
}

/// Value at fractional position `which` of an ascending slice.
///
/// # Panics
///
/// Panics if the computed position falls outside the slice.
fn percentile(sorted: &[i64], which: f64) -> i64 {
    let position = (sorted.len() as f64 * which) as usize;
    assert!(
        position < sorted.len(),
        "percentile position {} out of bounds for {} samples",
        position,
        sorted.len()
    );
    sorted[position]
}

/// Ordered cropping thresholds, one per cropped test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PercentileLadder {
    thresholds: Vec<i64>,
}

impl PercentileLadder {
    /// Create a ladder of `count` thresholds, all zero until the first
    /// [`PercentileLadder::recompute`].
    pub fn new(count: usize) -> Self {
        Self {
            thresholds: vec![0; count],
        }
    }

    /// Build a ladder of `count` thresholds from one batch of elapsed times.
    pub fn from_exec_times(exec_times: &[i64], count: usize) -> Self {
        let mut ladder = Self::new(count);
        ladder.recompute(exec_times);
        ladder
    }

    /// Recompute every threshold from a fresh batch of elapsed times.
    ///
    /// # Panics
    ///
    /// Panics if `exec_times` is empty.
    pub fn recompute(&mut self, exec_times: &[i64]) {
        let mut sorted = exec_times.to_vec();
        sorted.sort_unstable();

        let count = self.thresholds.len();
        for (i, threshold) in self.thresholds.iter_mut().enumerate() {
            *threshold = percentile(&sorted, quantile_for(i, count));
        }
    }

    pub fn thresholds(&self) -> &[i64] {
        &self.thresholds
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        self.thresholds.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}
