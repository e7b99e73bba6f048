use ctprobe_core::Class;
use rand::Rng;

/// The default fixed-vs-random input policy.
///
/// Each trial gets a random class. [`Class::Fixed`] trials get an all-zero
/// chunk, [`Class::Random`] trials get fresh random bytes.
///
/// # Panics
///
/// Panics if `inputs.len() != classes.len() * chunk_size`.
pub fn prepare_random_inputs(
    rng: &mut impl Rng,
    inputs: &mut [u8],
    classes: &mut [Class],
    chunk_size: usize,
) {
    assert_eq!(
        inputs.len(),
        classes.len() * chunk_size,
        "input buffer does not match class count"
    );

    for (class, chunk) in classes.iter_mut().zip(inputs.chunks_exact_mut(chunk_size)) {
        *class = Class::from_bit(rng.gen());
        match class {
            Class::Fixed => chunk.fill(0),
            Class::Random => rng.fill(chunk),
        }
    }
}
