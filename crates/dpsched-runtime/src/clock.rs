//! Monotonic clock and wait deadlines
//!
//! Bounded scheduler waits read the clock once per unsuccessful full
//! scan, never per spin.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Monotonic nanoseconds
        #[inline]
        pub fn now_ns() -> u64 {
            let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
            // Safety: ts is a valid out-pointer; CLOCK_MONOTONIC always exists
            unsafe {
                libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
            }
            (ts.tv_sec as u64)
                .wrapping_mul(1_000_000_000)
                .wrapping_add(ts.tv_nsec as u64)
        }
    } else {
        use std::sync::OnceLock;
        use std::time::Instant;

        static START: OnceLock<Instant> = OnceLock::new();

        /// Monotonic nanoseconds since first use
        #[inline]
        pub fn now_ns() -> u64 {
            START.get_or_init(Instant::now).elapsed().as_nanos() as u64
        }
    }
}

/// A point in time after which a bounded wait gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at_ns: u64,
}

impl Deadline {
    /// Deadline `ns` nanoseconds from now
    pub fn after_ns(ns: u64) -> Self {
        Self {
            at_ns: now_ns().saturating_add(ns),
        }
    }

    #[inline]
    pub fn expired(&self) -> bool {
        now_ns() >= self.at_ns
    }
}
