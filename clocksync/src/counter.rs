//! Device clock reading rules.
//!
//! The device-side routines in [`crate::device::ptx`] implement these same
//! rules in PTX; the functions here are the host-checkable form, used by the
//! simulated device and by tests.

use std::fmt;

/// Which free-running counter a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    /// 64-bit nanosecond global timer, read as a high/low register pair.
    /// Compute capability 3.0 and newer.
    GlobalTimer,
    /// 32-bit per-multiprocessor cycle counter with no nanosecond meaning.
    Clock32,
}

impl CounterKind {
    /// Picks the best counter a device of the given compute capability has.
    pub fn for_compute_capability(major: i32) -> Self {
        if major >= 3 {
            CounterKind::GlobalTimer
        } else {
            CounterKind::Clock32
        }
    }

    pub fn is_nanoseconds(self) -> bool {
        matches!(self, CounterKind::GlobalTimer)
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterKind::GlobalTimer => write!(f, "globaltimer (64-bit ns)"),
            CounterKind::Clock32 => write!(f, "clock (32-bit ticks)"),
        }
    }
}

/// Reads a 64-bit counter exposed as two 32-bit halves: high, low, high.
///
/// If the two high reads differ the low half rolled over mid-read. The low
/// bits are then dropped and only the second high read is kept, losing
/// sub-rollover precision instead of returning a torn value.
#[inline]
pub fn read_split<H, L>(mut hi: H, mut lo: L) -> u64
where
    H: FnMut() -> u32,
    L: FnMut() -> u32,
{
    let hi0 = hi();
    let mut low = lo();
    let hi1 = hi();
    if hi0 != hi1 {
        low = 0;
    }
    ((hi1 as u64) << 32) | low as u64
}

/// Running total of ticks elapsed on a 32-bit counter.
///
/// Each sample adds the wrapping distance from the previous one, so a
/// counter that wraps past `u32::MAX` contributes the ticks before the wrap
/// plus the ticks after it.
#[derive(Debug, Clone, Copy)]
pub struct TickAccumulator {
    prev: u32,
    total: u64,
}

impl TickAccumulator {
    pub fn new(first: u32) -> Self {
        Self {
            prev: first,
            total: 0,
        }
    }

    #[inline]
    pub fn advance(&mut self, now: u32) -> u64 {
        self.total += now.wrapping_sub(self.prev) as u64;
        self.prev = now;
        self.total
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Busy-waits on a 32-bit counter until `target` ticks have elapsed and
/// returns the accumulated count (at least `target`).
pub fn spin_ticks<R>(mut read: R, target: u64) -> u64
where
    R: FnMut() -> u32,
{
    let mut acc = TickAccumulator::new(read());
    while acc.total() < target {
        acc.advance(read());
        std::hint::spin_loop();
    }
    acc.total()
}

/// Busy-waits on a 64-bit counter until `target` ticks have elapsed and
/// returns the elapsed count.
pub fn spin_ticks_64<R>(mut read: R, target: u64) -> u64
where
    R: FnMut() -> u64,
{
    let start = read();
    loop {
        let elapsed = read().wrapping_sub(start);
        if elapsed >= target {
            return elapsed;
        }
        std::hint::spin_loop();
    }
}
