//! Monotonic clock and rational sample/grain rate arithmetic.

use mxl_status::{MxlError, Result, StatusCode};

/// Returns the current monotonic time in nanoseconds.
#[inline(always)]
#[cfg(target_os = "macos")]
#[allow(deprecated)]
pub fn now_ns() -> u64 {
    use std::sync::OnceLock;
    static TIMEBASE: OnceLock<(u64, u64)> = OnceLock::new();
    let (numer, denom) = *TIMEBASE.get_or_init(|| {
        let mut info = libc::mach_timebase_info_data_t { numer: 0, denom: 0 };
        let rc = unsafe { libc::mach_timebase_info(&mut info) };
        if rc != 0 || info.denom == 0 { (1, 1) } else { (info.numer as u64, info.denom as u64) }
    });
    let t = unsafe { libc::mach_absolute_time() } as u128;
    ((t * numer as u128) / denom as u128) as u64
}

/// Returns the current monotonic time in nanoseconds.
#[inline(always)]
#[cfg(not(target_os = "macos"))]
pub fn now_ns() -> u64 {
    let mut ts: libc::timespec = unsafe { core::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// Returns the current wall-clock time in nanoseconds since the Unix epoch.
/// Used for `FlowInfo::last_write_time`/`last_read_time`, which are
/// timestamps meaningful across process restarts, unlike `now_ns`.
pub fn wall_now_ns() -> u64 {
    let mut ts: libc::timespec = unsafe { core::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// A rational rate, e.g. 48000/1 samples per second or 25/1 grains per
/// second. Mirrors `mxlRational` in the flow info layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Rate {
    pub numerator: u32,
    pub denominator: u32,
}

impl Rate {
    pub fn new(numerator: u32, denominator: u32) -> Result<Self> {
        if numerator == 0 || denominator == 0 {
            return Err(MxlError::new(StatusCode::InvalidArg, "rate must be non-zero"));
        }
        Ok(Self { numerator, denominator })
    }

    fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

/// Converts a grain/sample index to a nanosecond timestamp at `rate`.
pub fn index_to_timestamp(index: u64, rate: Rate) -> u64 {
    ((index as u128 * rate.denominator as u128 * 1_000_000_000u128) / rate.numerator as u128)
        as u64
}

/// Converts a nanosecond timestamp to the index active at `rate`.
pub fn timestamp_to_index(timestamp_ns: u64, rate: Rate) -> u64 {
    ((timestamp_ns as u128 * rate.numerator as u128) / (rate.denominator as u128 * 1_000_000_000u128))
        as u64
}

/// The index that would be produced by `timestamp_to_index(wall_now_ns(), rate)`.
pub fn current_index(rate: Rate) -> u64 {
    timestamp_to_index(wall_now_ns(), rate)
}

/// Duration from now until `index` becomes current, zero if already past.
pub fn ns_until_index(index: u64, rate: Rate) -> u64 {
    let target = index_to_timestamp(index, rate);
    let now = wall_now_ns();
    target.saturating_sub(now)
}

/// Sleeps the calling thread for `ns` nanoseconds.
pub fn sleep_for_ns(ns: u64) {
    std::thread::sleep(std::time::Duration::from_nanos(ns));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_rate() {
        assert!(Rate::new(0, 1).is_err());
        assert!(Rate::new(1, 0).is_err());
    }

    #[test]
    fn round_trips_index_and_timestamp() {
        let rate = Rate::new(25, 1).unwrap();
        let ts = index_to_timestamp(100, rate);
        assert_eq!(ts, 4_000_000_000);
        assert_eq!(timestamp_to_index(ts, rate), 100);
    }

    #[test]
    fn rate_as_f64() {
        let rate = Rate::new(48000, 1).unwrap();
        assert_eq!(rate.as_f64(), 48000.0);
    }
}
