//! Monotonic time for the engine and the signal handlers.
//!
//! Everything that measures elapsed time reads `CLOCK_MONOTONIC` through
//! this module. Signal handlers need a raw nanosecond value they can
//! store in an atomic, so the canonical representation is `u64`
//! nanoseconds rather than `std::time::Instant`.

use std::io;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Reads the monotonic clock as nanoseconds.
///
/// A failed read is reported so the engine can abort: time that
/// silently stops moving would corrupt every rate and ETA downstream.
pub fn monotonic_nanos() -> io::Result<u64> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((ts.tv_sec as u64) * NANOS_PER_SEC + ts.tv_nsec as u64)
}

/// Handler-side clock read. `clock_gettime(2)` is on the POSIX
/// async-signal-safe list, but a handler has no way to propagate a
/// failure, so one reads as 0 ("no reading") and the stopped-time
/// arithmetic treats it as such. The main loop uses
/// [`monotonic_nanos`] and aborts on failure instead.
pub fn monotonic_nanos_raw() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    (ts.tv_sec as u64) * NANOS_PER_SEC + ts.tv_nsec as u64
}

/// Converts a nanosecond reading to floating-point seconds.
pub fn nanos_to_secs(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_SEC as f64
}

/// Converts floating-point seconds to nanoseconds, saturating at zero.
pub fn secs_to_nanos(secs: f64) -> u64 {
    if secs <= 0.0 {
        return 0;
    }
    (secs * NANOS_PER_SEC as f64) as u64
}

/// Elapsed seconds between two readings, zero if time appears to have
/// gone backwards (readings from before a suspend/resume glitch).
pub fn secs_between(earlier: u64, later: u64) -> f64 {
    nanos_to_secs(later.saturating_sub(earlier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_is_non_decreasing() {
        let a = monotonic_nanos().unwrap();
        let b = monotonic_nanos().unwrap();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn raw_read_matches_checked_read() {
        let raw = monotonic_nanos_raw();
        assert!(raw > 0);
        let checked = monotonic_nanos().unwrap();
        assert!(checked >= raw);
    }

    #[test]
    fn conversions_round_trip() {
        assert_eq!(secs_to_nanos(1.5), 1_500_000_000);
        assert!((nanos_to_secs(2_500_000_000) - 2.5).abs() < 1e-12);
        assert_eq!(secs_to_nanos(-1.0), 0);
    }

    #[test]
    fn secs_between_saturates() {
        assert_eq!(secs_between(10, 5), 0.0);
        assert!((secs_between(NANOS_PER_SEC, 3 * NANOS_PER_SEC) - 2.0).abs() < 1e-12);
    }
}
