//! Per-batch trial buffers and the differencer.
//!
//! A [`Batch`] owns everything one round of measurements needs: the class
//! label and input chunk of every trial, the raw before/after timestamps and
//! the elapsed times derived from them. Buffers are allocated fallibly so that
//! an out-of-memory condition surfaces as [`BatchError::Allocation`] instead
//! of an abort in the middle of a measurement.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Input class of a single trial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Class {
    /// Class 0: the fixed input.
    #[default]
    Fixed,
    /// Class 1: the random input.
    Random,
}

impl Class {
    /// Both classes in index order.
    pub const ALL: [Class; 2] = [Class::Fixed, Class::Random];

    /// Index of this class in per-class arrays (0 or 1).
    pub fn index(self) -> usize {
        match self {
            Class::Fixed => 0,
            Class::Random => 1,
        }
    }

    /// Map the low bit of a random byte to a class.
    pub fn from_bit(bit: u8) -> Self {
        if bit & 1 == 0 {
            Class::Fixed
        } else {
            Class::Random
        }
    }
}

/// Errors raised while setting up a batch.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A measurement buffer could not be allocated.
    #[error("Failed to allocate {what} buffer of {len} elements")]
    Allocation { what: &'static str, len: usize },

    /// The batch size leaves no trials once both ends are dropped.
    #[error("Batch size {batch_size} must exceed twice the drop size {drop_size}")]
    InvalidGeometry { batch_size: usize, drop_size: usize },

    /// Trials need at least one byte of input.
    #[error("Chunk size must be at least 1 byte")]
    EmptyChunk,
}

/// Shape of a batch: how many trials, how many are dropped at each end, and
/// how many input bytes each trial gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchGeometry {
    batch_size: usize,
    drop_size: usize,
    chunk_size: usize,
}

impl BatchGeometry {
    /// Validate and build a batch geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if `batch_size <= 2 * drop_size` or `chunk_size == 0`.
    pub fn new(batch_size: usize, drop_size: usize, chunk_size: usize) -> Result<Self, BatchError> {
        if batch_size <= drop_size.saturating_mul(2) {
            return Err(BatchError::InvalidGeometry {
                batch_size,
                drop_size,
            });
        }
        if chunk_size == 0 {
            return Err(BatchError::EmptyChunk);
        }
        Ok(Self {
            batch_size,
            drop_size,
            chunk_size,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn drop_size(&self) -> usize {
        self.drop_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of trials that survive dropping both ends of the batch.
    pub fn measured_len(&self) -> usize {
        self.batch_size - 2 * self.drop_size
    }

    /// Range of trial indices whose timestamps are recorded.
    ///
    /// Trial `k` in this range stores its timestamps at index `k - drop_size`.
    pub fn measured_trials(&self) -> std::ops::Range<usize> {
        self.drop_size..self.batch_size - self.drop_size
    }
}

/// Mutable views over every buffer of a batch at once, handed to the
/// device-under-test layer.
pub struct BatchBuffers<'a> {
    pub classes: &'a mut [Class],
    pub inputs: &'a mut [u8],
    pub before_ticks: &'a mut [i64],
    pub after_ticks: &'a mut [i64],
}

/// Buffers for one batch of trials.
#[derive(Debug)]
pub struct Batch {
    geometry: BatchGeometry,
    classes: Vec<Class>,
    inputs: Vec<u8>,
    before_ticks: Vec<i64>,
    after_ticks: Vec<i64>,
    exec_times: Vec<i64>,
}

fn alloc_zeroed<T: Clone + Default>(what: &'static str, len: usize) -> Result<Vec<T>, BatchError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| BatchError::Allocation { what, len })?;
    buffer.resize(len, T::default());
    Ok(buffer)
}

impl Batch {
    /// Allocate zeroed buffers for one batch.
    ///
    /// Timestamp buffers get one extra slot so that devices may write a
    /// trailing sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Allocation`] if any buffer cannot be reserved.
    pub fn allocate(geometry: BatchGeometry) -> Result<Self, BatchError> {
        let n = geometry.batch_size();
        let input_len = n
            .checked_mul(geometry.chunk_size())
            .ok_or(BatchError::Allocation {
                what: "input",
                len: usize::MAX,
            })?;

        Ok(Self {
            geometry,
            classes: alloc_zeroed("class", n)?,
            inputs: alloc_zeroed("input", input_len)?,
            before_ticks: alloc_zeroed("before-ticks", n + 1)?,
            after_ticks: alloc_zeroed("after-ticks", n + 1)?,
            exec_times: alloc_zeroed("exec-time", geometry.measured_len())?,
        })
    }

    pub fn geometry(&self) -> &BatchGeometry {
        &self.geometry
    }

    /// Class labels of every trial in the batch.
    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    /// Input blob of every trial, `chunk_size` bytes per trial.
    pub fn inputs(&self) -> &[u8] {
        &self.inputs
    }

    /// Input chunk of trial `index`.
    pub fn input(&self, index: usize) -> &[u8] {
        let size = self.geometry.chunk_size();
        &self.inputs[index * size..(index + 1) * size]
    }

    pub fn before_ticks(&self) -> &[i64] {
        &self.before_ticks
    }

    pub fn after_ticks(&self) -> &[i64] {
        &self.after_ticks
    }

    /// Borrow every buffer mutably at once.
    pub fn buffers_mut(&mut self) -> BatchBuffers<'_> {
        BatchBuffers {
            classes: &mut self.classes,
            inputs: &mut self.inputs,
            before_ticks: &mut self.before_ticks,
            after_ticks: &mut self.after_ticks,
        }
    }

    /// Class labels aligned with [`Batch::exec_times`].
    pub fn measured_classes(&self) -> &[Class] {
        &self.classes[self.geometry.measured_trials()]
    }

    /// Elapsed times from the last call to [`Batch::differentiate`].
    pub fn exec_times(&self) -> &[i64] {
        &self.exec_times
    }

    /// Convert the recorded timestamps into elapsed times.
    pub fn differentiate(&mut self) -> &[i64] {
        differentiate(&mut self.exec_times, &self.before_ticks, &self.after_ticks);
        &self.exec_times
    }
}

/// Positional difference `after[i] - before[i]` for every slot of `exec_times`.
///
/// Wrapping arithmetic is used so that a wrapped counter shows up as a
/// non-positive sample rather than a panic; such samples are discarded by the
/// statistics router.
pub fn differentiate(exec_times: &mut [i64], before_ticks: &[i64], after_ticks: &[i64]) {
    assert!(
        before_ticks.len() >= exec_times.len() && after_ticks.len() >= exec_times.len(),
        "timestamp buffers shorter than the elapsed-time buffer"
    );
    for (i, slot) in exec_times.iter_mut().enumerate() {
        *slot = after_ticks[i].wrapping_sub(before_ticks[i]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_geometry_measured_len() {
        let geometry = BatchGeometry::new(150, 20, 16).unwrap();
        assert_eq!(geometry.measured_len(), 110);
        assert_eq!(geometry.measured_trials(), 20..130);
    }

    #[test]
    fn test_geometry_rejects_empty_batch() {
        let result = BatchGeometry::new(40, 20, 16);
        assert!(matches!(
            result,
            Err(BatchError::InvalidGeometry {
                batch_size: 40,
                drop_size: 20
            })
        ));
        assert!(matches!(
            BatchGeometry::new(10, 0, 0),
            Err(BatchError::EmptyChunk)
        ));
    }

    #[test]
    fn test_allocate_sizes() {
        let geometry = BatchGeometry::new(10, 2, 4).unwrap();
        let batch = Batch::allocate(geometry).unwrap();

        assert_eq!(batch.classes().len(), 10);
        assert_eq!(batch.inputs().len(), 40);
        assert_eq!(batch.before_ticks().len(), 11);
        assert_eq!(batch.after_ticks().len(), 11);
        assert_eq!(batch.exec_times().len(), 6);
        assert!(batch.classes().iter().all(|&c| c == Class::Fixed));
    }

    #[test]
    fn test_measured_classes_skip_dropped_trials() {
        let geometry = BatchGeometry::new(6, 1, 1).unwrap();
        let mut batch = Batch::allocate(geometry).unwrap();
        {
            let buffers = batch.buffers_mut();
            for (i, class) in buffers.classes.iter_mut().enumerate() {
                *class = Class::from_bit(i as u8);
            }
        }
        assert_eq!(
            batch.measured_classes(),
            &[Class::Random, Class::Fixed, Class::Random, Class::Fixed]
        );
    }

    #[test]
    fn test_input_chunks() {
        let geometry = BatchGeometry::new(3, 0, 2).unwrap();
        let mut batch = Batch::allocate(geometry).unwrap();
        batch
            .buffers_mut()
            .inputs
            .copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(batch.input(1), &[3, 4]);
    }

    #[test]
    fn test_differentiate_backwards_counter_is_negative() {
        let mut exec_times = [0i64; 2];
        differentiate(&mut exec_times, &[10, 100, 0], &[25, 40, 0]);
        assert_eq!(exec_times, [15, -60]);
    }

    #[test]
    fn test_differentiate_does_not_panic_on_overflow() {
        let mut exec_times = [0i64; 1];
        differentiate(&mut exec_times, &[i64::MIN], &[i64::MAX]);
        assert_eq!(exec_times[0], -1);
    }

    #[test]
    fn test_class_index() {
        assert_eq!(Class::Fixed.index(), 0);
        assert_eq!(Class::Random.index(), 1);
        assert_eq!(Class::from_bit(0xfe), Class::Fixed);
        assert_eq!(Class::from_bit(0x01), Class::Random);
    }

    proptest! {
        #[test]
        fn prop_differentiate_is_positional(
            batch_size in 3usize..400,
            drop_frac in 0.0f64..0.49,
            seed in proptest::collection::vec((0i64..1_000_000, 0i64..5_000), 401),
        ) {
            let drop_size = ((batch_size as f64) * drop_frac) as usize;
            prop_assume!(batch_size > 2 * drop_size);
            let geometry = BatchGeometry::new(batch_size, drop_size, 1).unwrap();
            let mut batch = Batch::allocate(geometry).unwrap();
            {
                let buffers = batch.buffers_mut();
                for i in 0..=batch_size {
                    let (start, delta) = seed[i];
                    buffers.before_ticks[i] = start;
                    buffers.after_ticks[i] = start + delta;
                }
            }
            let exec_times = batch.differentiate().to_vec();

            prop_assert_eq!(exec_times.len(), batch_size - 2 * drop_size);
            for (i, &t) in exec_times.iter().enumerate() {
                prop_assert_eq!(t, batch.after_ticks()[i] - batch.before_ticks()[i]);
            }
        }
    }
}
