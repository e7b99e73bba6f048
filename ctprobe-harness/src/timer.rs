//! Cycle counter used to timestamp each trial.
//!
//! - x86_64: `lfence; rdtsc`
//! - aarch64: `isb; mrs cntvct_el0`
//! - elsewhere: nanoseconds since the first read, via `Instant`

use std::sync::atomic::{compiler_fence, Ordering};

/// Keep the optimizer from eliding or hoisting the measured call.
#[inline]
pub fn black_box<T>(x: T) -> T {
    std::hint::black_box(x)
}

/// Read the cycle counter, serialized against earlier instructions.
///
/// The value is only meaningful as a difference between two reads on the
/// same core. It is returned as `i64` so that differences are signed.
#[inline]
pub fn cpucycles() -> i64 {
    compiler_fence(Ordering::SeqCst);
    let ticks = read_counter();
    compiler_fence(Ordering::SeqCst);
    ticks as i64
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn read_counter() -> u64 {
    let ticks: u64;
    // SAFETY: lfence and rdtsc only touch rax/rdx and have no memory effects.
    unsafe {
        std::arch::asm!(
            "lfence",
            "rdtsc",
            "shl rdx, 32",
            "or rax, rdx",
            out("rax") ticks,
            out("rdx") _,
            options(nostack, nomem),
        );
    }
    ticks
}

#[cfg(target_arch = "aarch64")]
#[inline]
fn read_counter() -> u64 {
    let ticks: u64;
    // SAFETY: reading cntvct_el0 is allowed from EL0 and has no side effects.
    unsafe {
        std::arch::asm!(
            "isb",
            "mrs {}, cntvct_el0",
            out(reg) ticks,
            options(nostack, nomem),
        );
    }
    ticks
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline]
fn read_counter() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_nanos() as u64
}
