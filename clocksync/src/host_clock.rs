//! Host monotonic clock. `CLOCK_MONOTONIC_RAW` is not slewed by NTP, so
//! intervals measured against it are comparable to a free-running device
//! counter.

use std::mem;

#[inline]
pub fn now_ns() -> u64 {
    unsafe {
        let mut ts: libc::timespec = mem::zeroed();
        libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts);
        (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
    }
}

#[inline]
pub fn now_seconds() -> f64 {
    unsafe {
        let mut ts: libc::timespec = mem::zeroed();
        libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts);
        ts.tv_sec as f64 + ts.tv_nsec as f64 * 1e-9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
        let s = now_seconds();
        assert!((s - b as f64 * 1e-9).abs() < 1.0);
    }
}
