//! Device-under-test layer for ctprobe.
//!
//! A device under test (DUT) wraps the function whose timing is checked. It
//! labels every trial of a batch with an input class, fills the matching
//! input bytes, and records a before/after cycle count around each call.
//! The statistics in `ctprobe-core` never see the function itself.

mod duts;
mod inputs;
pub mod timer;

pub use duts::{builtin_registry, SimulatedDut, SimulatedTiming, TimedDut};
pub use inputs::prepare_random_inputs;

use ctprobe_core::{BatchGeometry, Class};
use thiserror::Error;

/// Errors raised by the device-under-test layer.
#[derive(Debug, Error)]
pub enum DutError {
    /// One-time setup of a device failed.
    #[error("Failed to initialise '{name}': {reason}")]
    InitFailed { name: String, reason: String },

    /// No device with the requested name is registered.
    #[error("Unknown function under test: {0}")]
    UnknownDevice(String),
}

/// A function under test together with its input policy.
pub trait DeviceUnderTest {
    /// Unique name used for selection and reporting.
    fn name(&self) -> &str;

    /// One-time setup before any measurement (key material, tables...).
    fn init_once(&mut self) -> Result<(), DutError> {
        Ok(())
    }

    /// Label every trial with a class and fill its `chunk_size` input bytes.
    ///
    /// `inputs.len() == classes.len() * chunk_size`.
    fn prepare_inputs(&mut self, inputs: &mut [u8], classes: &mut [Class]);

    /// Run every trial of the batch once, in order.
    ///
    /// Trial `k` in [`BatchGeometry::measured_trials`] stores its cycle counts
    /// at index `k - drop_size`; dropped trials may run but are not recorded.
    /// Returns whether the measurement itself succeeded.
    fn measure(
        &mut self,
        geometry: &BatchGeometry,
        inputs: &[u8],
        before_ticks: &mut [i64],
        after_ticks: &mut [i64],
    ) -> bool;
}

/// Registry of available devices, in registration order.
#[derive(Default)]
pub struct DutRegistry {
    duts: Vec<Box<dyn DeviceUnderTest>>,
}

impl DutRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self { duts: Vec::new() }
    }

    /// Register a device. A device with the same name is replaced.
    pub fn register<D>(&mut self, dut: D)
    where
        D: DeviceUnderTest + 'static,
    {
        tracing::debug!(name = dut.name(), "registering function under test");
        match self.position(dut.name()) {
            Some(index) => self.duts[index] = Box::new(dut),
            None => self.duts.push(Box::new(dut)),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.duts.iter().position(|d| d.name() == name)
    }

    /// List all registered device names.
    pub fn list(&self) -> Vec<String> {
        self.duts.iter().map(|d| d.name().to_string()).collect()
    }

    /// Look up a device by name.
    pub fn get_mut(&mut self, name: &str) -> Result<&mut dyn DeviceUnderTest, DutError> {
        match self.position(name) {
            Some(index) => Ok(self.duts[index].as_mut()),
            None => Err(DutError::UnknownDevice(name.to_string())),
        }
    }

    /// Check that every name in `names` is registered.
    pub fn check_names(&self, names: &[String]) -> Result<(), DutError> {
        match names.iter().find(|n| !self.contains(n)) {
            Some(missing) => Err(DutError::UnknownDevice(missing.clone())),
            None => Ok(()),
        }
    }

    /// Check if a device with the given name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Get the number of registered devices.
    pub fn len(&self) -> usize {
        self.duts.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.duts.is_empty()
    }
}
