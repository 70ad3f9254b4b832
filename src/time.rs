//! Time and timeout functions
//!
//! On bare metal the AArch64 generic timer (CNTPCT_EL0, CNTFRQ_EL0) is the
//! clock, so deadlines do not depend on the CPU frequency. Host test builds
//! use `std::time::Instant`; other host builds fall back to a counter that
//! advances by one microsecond per query.

/// Current counter value in ticks.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
#[inline]
fn ticks() -> u64 {
    crate::arch::aarch64::read_cntpct()
}

/// Counter ticks per microsecond.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
#[inline]
fn ticks_per_us() -> u64 {
    (crate::arch::aarch64::read_cntfrq() / 1_000_000).max(1)
}

#[cfg(all(test, not(all(target_arch = "aarch64", target_os = "none"))))]
fn ticks() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_micros() as u64
}

#[cfg(all(not(test), not(all(target_arch = "aarch64", target_os = "none"))))]
fn ticks() -> u64 {
    use core::sync::atomic::{AtomicU64, Ordering};

    static POLLS: AtomicU64 = AtomicU64::new(0);
    POLLS.fetch_add(1, Ordering::Relaxed)
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
#[inline]
fn ticks_per_us() -> u64 {
    1
}

/// A deadline-based timeout for polling loops
///
/// # Example
///
/// ```ignore
/// let timeout = Timeout::from_ms(1000);
/// while !timeout.is_expired() {
///     if check_condition() {
///         return Ok(());
///     }
///     core::hint::spin_loop();
/// }
/// return Err(TimeoutError);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Timeout {
    deadline: u64,
}

impl Timeout {
    /// Create a timeout that expires after `us` microseconds
    #[inline]
    pub fn from_us(us: u64) -> Self {
        let cycles = us.saturating_mul(ticks_per_us());
        Self {
            deadline: ticks().wrapping_add(cycles),
        }
    }

    /// Create a timeout that expires after `ms` milliseconds
    #[inline]
    pub fn from_ms(ms: u64) -> Self {
        Self::from_us(ms.saturating_mul(1000))
    }

    /// Check if the timeout has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        // Signed difference handles counter wraparound
        let diff = self.deadline.wrapping_sub(ticks()) as i64;
        diff <= 0
    }
}
