//! Routing of elapsed-time samples into the parallel test slots.
//!
//! Slot layout is fixed: index 0 is the uncropped test, indices `1..=K` are
//! the cropped tests in ladder order, and the last index is the second-order
//! test on centered squared deviations.

use serde::Serialize;

use crate::batch::Class;
use crate::percentile::PercentileLadder;
use crate::stats::{OnlineTest, TestResult, WelchAccumulator};

/// Raw class-0 count after which the second-order test starts receiving samples.
pub const DEFAULT_SECOND_ORDER_ACTIVATION: u64 = 10_000;

/// What a slot measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotKind {
    /// Every valid sample.
    Raw,
    /// Samples strictly below ladder entry `percentile`.
    Cropped { percentile: usize },
    /// Squared deviation of each sample from its class's raw mean.
    SecondOrder,
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotKind::Raw => write!(f, "raw"),
            SlotKind::Cropped { percentile } => write!(f, "cropped #{}", percentile),
            SlotKind::SecondOrder => write!(f, "second-order"),
        }
    }
}

/// What happened to one batch of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteSummary {
    /// Samples folded into the raw slot.
    pub accepted: usize,
    /// Non-positive samples thrown away.
    pub discarded: usize,
    /// Samples folded into the second-order slot.
    pub second_order: usize,
}

/// Every test slot of one run.
#[derive(Debug, Clone)]
pub struct TestSet {
    slots: Vec<WelchAccumulator>,
    percentiles: usize,
    second_order_activation: u64,
}

impl TestSet {
    /// Create `1 + percentiles + 1` empty slots.
    pub fn new(percentiles: usize, second_order_activation: u64) -> Self {
        Self {
            slots: vec![WelchAccumulator::new(); percentiles + 2],
            percentiles,
            second_order_activation,
        }
    }

    /// Number of slots, including raw and second-order.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of cropped slots.
    pub fn percentiles(&self) -> usize {
        self.percentiles
    }

    pub fn slots(&self) -> &[WelchAccumulator] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&WelchAccumulator> {
        self.slots.get(index)
    }

    pub fn raw(&self) -> &WelchAccumulator {
        &self.slots[0]
    }

    /// Cropped slot for ladder entry `percentile`.
    pub fn cropped(&self, percentile: usize) -> &WelchAccumulator {
        assert!(percentile < self.percentiles, "no cropped slot {}", percentile);
        &self.slots[percentile + 1]
    }

    pub fn second_order(&self) -> &WelchAccumulator {
        &self.slots[self.percentiles + 1]
    }

    /// Meaning of slot `index`.
    pub fn kind(&self, index: usize) -> SlotKind {
        if index == 0 {
            SlotKind::Raw
        } else if index <= self.percentiles {
            SlotKind::Cropped {
                percentile: index - 1,
            }
        } else {
            SlotKind::SecondOrder
        }
    }

    /// Compute every slot, `None` where a class has too few samples.
    pub fn compute_all(&self) -> Vec<Option<TestResult>> {
        self.slots.iter().map(|slot| slot.compute()).collect()
    }

    /// Zero every slot for a fresh attempt.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.reset();
        }
    }

    /// Fold one batch of elapsed times into the slots.
    ///
    /// `classes[i]` labels `exec_times[i]`. Non-positive samples are timer
    /// anomalies and are skipped entirely.
    ///
    /// # Panics
    ///
    /// Panics if the two slices differ in length or the ladder does not have
    /// one threshold per cropped slot.
    pub fn update_statistics(
        &mut self,
        exec_times: &[i64],
        classes: &[Class],
        ladder: &PercentileLadder,
    ) -> RouteSummary {
        assert_eq!(exec_times.len(), classes.len(), "unlabelled samples");
        assert_eq!(ladder.len(), self.percentiles, "ladder/slot mismatch");

        let mut summary = RouteSummary::default();
        let second_order_index = self.percentiles + 1;

        for (&difference, &class) in exec_times.iter().zip(classes) {
            if difference <= 0 {
                summary.discarded += 1;
                continue;
            }
            let value = difference as f64;

            self.slots[0].push(value, class);
            summary.accepted += 1;

            for (crop_index, &threshold) in ladder.thresholds().iter().enumerate() {
                if difference < threshold {
                    self.slots[crop_index + 1].push(value, class);
                }
            }

            if self.slots[0].count(Class::Fixed) > self.second_order_activation {
                let centered = value - self.slots[0].mean(class);
                self.slots[second_order_index].push(centered * centered, class);
                summary.second_order += 1;
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn alternating(n: usize) -> Vec<Class> {
        (0..n).map(|i| Class::from_bit(i as u8)).collect()
    }

    #[test]
    fn test_layout() {
        let tests = TestSet::new(100, DEFAULT_SECOND_ORDER_ACTIVATION);
        assert_eq!(tests.len(), 102);
        assert_eq!(tests.kind(0), SlotKind::Raw);
        assert_eq!(tests.kind(1), SlotKind::Cropped { percentile: 0 });
        assert_eq!(tests.kind(100), SlotKind::Cropped { percentile: 99 });
        assert_eq!(tests.kind(101), SlotKind::SecondOrder);
    }

    #[test]
    fn test_non_positive_samples_discarded() {
        let mut tests = TestSet::new(2, 1000);
        let ladder = PercentileLadder::from_exec_times(&[10, 20, 30, 40], 2);
        let summary = tests.update_statistics(
            &[0, -5, 12, i64::MIN, 7],
            &alternating(5),
            &ladder,
        );

        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.discarded, 3);
        assert_eq!(tests.raw().total_count(), 2);
        assert!(tests.slots().iter().all(|s| s.total_count() <= 2));
    }

    #[test]
    fn test_cropping_is_strict() {
        let mut tests = TestSet::new(1, 1000);
        let ladder = PercentileLadder::from_exec_times(&[50], 1);
        tests.update_statistics(&[49, 50, 51, 10], &alternating(4), &ladder);

        assert_eq!(tests.raw().total_count(), 4);
        assert_eq!(tests.cropped(0).total_count(), 2);
        assert_eq!(tests.cropped(0).mean(Class::Fixed), 49.0);
        assert_eq!(tests.cropped(0).mean(Class::Random), 10.0);
    }

    #[test]
    fn test_second_order_waits_for_activation() {
        let mut tests = TestSet::new(1, 4);
        let ladder = PercentileLadder::from_exec_times(&[100], 1);
        let values = [10, 20, 10, 20, 10, 20, 10, 20, 10, 20, 10, 20];

        let summary = tests.update_statistics(&values, &alternating(12), &ladder);

        // Fixed count passes 4 on the 5th fixed sample (index 8).
        assert_eq!(summary.second_order, 4);
        assert_eq!(tests.second_order().total_count(), 4);
        // Constant per-class values: every centered deviation is zero.
        assert_eq!(tests.second_order().mean(Class::Fixed), 0.0);
    }

    #[test]
    fn test_second_order_catches_variance_only_leak() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(19);
        let mut tests = TestSet::new(10, 1_000);

        // Same mean, spread of +-8 against +-80 cycles.
        for _ in 0..4 {
            let classes: Vec<Class> = (0..10_000).map(|_| Class::from_bit(rng.gen())).collect();
            let exec_times: Vec<i64> = classes
                .iter()
                .map(|class| match class {
                    Class::Fixed => 1_000 + rng.gen_range(-8..=8),
                    Class::Random => 1_000 + rng.gen_range(-80..=80),
                })
                .collect();
            let ladder = PercentileLadder::from_exec_times(&exec_times, 10);
            tests.update_statistics(&exec_times, &classes, &ladder);
        }

        let raw = tests.raw().compute().unwrap();
        assert!(raw.t_statistic.abs() < 10.0, "raw t {}", raw.t_statistic);

        let second = tests.second_order().compute().unwrap();
        assert!(second.counts[0] > 10_000 && second.counts[1] > 10_000);
        assert!(
            second.t_statistic.abs() > 10.0,
            "second-order t {}",
            second.t_statistic
        );
    }

    #[test]
    fn test_reset_clears_every_slot() {
        let mut tests = TestSet::new(3, 0);
        let ladder = PercentileLadder::from_exec_times(&[1, 2, 3, 4], 3);
        tests.update_statistics(&[1, 2, 3, 4], &alternating(4), &ladder);
        assert!(tests.raw().total_count() > 0);

        tests.reset();
        assert!(tests.slots().iter().all(|s| s.total_count() == 0));
    }

    proptest! {
        #[test]
        fn prop_cropped_slots_only_see_values_below_threshold(
            samples in proptest::collection::vec((-50i64..5_000, any::<bool>()), 1..800),
        ) {
            let exec_times: Vec<i64> = samples.iter().map(|&(t, _)| t).collect();
            let classes: Vec<Class> = samples
                .iter()
                .map(|&(_, c)| if c { Class::Random } else { Class::Fixed })
                .collect();
            let ladder = PercentileLadder::from_exec_times(&exec_times, 20);
            let mut tests = TestSet::new(20, u64::MAX);
            tests.update_statistics(&exec_times, &classes, &ladder);

            for (i, &threshold) in ladder.thresholds().iter().enumerate() {
                for class in Class::ALL {
                    let kept: Vec<f64> = samples
                        .iter()
                        .zip(&classes)
                        .filter(|&(&(t, _), &c)| c == class && t > 0 && t < threshold)
                        .map(|(&(t, _), _)| t as f64)
                        .collect();
                    let slot = tests.cropped(i);
                    prop_assert_eq!(slot.count(class), kept.len() as u64);
                    if !kept.is_empty() {
                        let mean = kept.iter().sum::<f64>() / kept.len() as f64;
                        prop_assert!((slot.mean(class) - mean).abs() < 1e-6);
                    }
                }
            }
        }
    }
}
