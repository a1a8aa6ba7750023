//! Boot-time epoch used to turn `bpf_ktime_get_ns()` values into wall-clock time

#![allow(unsafe_code)] // clock_gettime() requires unsafe

use std::io;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Wall-clock nanoseconds at boot
///
/// `CLOCK_REALTIME - CLOCK_MONOTONIC`, the monotonic clock being the one the
/// collector timestamps samples with. Captured once at startup.
///
/// # Errors
/// Returns the OS error if either clock cannot be read
pub fn boot_time_ns() -> io::Result<u64> {
    let realtime = clock_ns(libc::CLOCK_REALTIME)?;
    let monotonic = clock_ns(libc::CLOCK_MONOTONIC)?;
    Ok(realtime.saturating_sub(monotonic))
}

fn clock_ns(clock: libc::clockid_t) -> io::Result<u64> {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    if unsafe { libc::clock_gettime(clock, &mut ts) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let secs = u64::try_from(ts.tv_sec).unwrap_or(0);
    let nanos = u64::try_from(ts.tv_nsec).unwrap_or(0);
    Ok(secs * NANOS_PER_SEC + nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_time_in_the_past() {
        let boot = boot_time_ns().unwrap();
        let now = clock_ns(libc::CLOCK_REALTIME).unwrap();
        assert!(boot > 0);
        assert!(boot <= now);
    }
}
